//! Fetching and parsing the printer's timelapse listing page.
//!
//! The firmware serves a generated HTML index: one `<tr>` per item, an
//! `<a href>` for the item itself, and `<td name="...">` cells carrying
//! the epoch mtime (and sometimes a byte size).

use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use crate::core::locator::ArtifactDescriptor;

/// Parse the listing's HTML table into descriptors.
///
/// Rows without a usable link or mtime cell are skipped. Direct `.mp4`
/// links are skipped too; exports are addressed through the item's
/// directory entry, not through files the page already exposes.
pub fn parse_listing(html: &str) -> Vec<ArtifactDescriptor> {
    let row_re = Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap();
    let link_re = Regex::new(r#"(?is)<a[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    let td_name_re = Regex::new(r#"(?i)<td[^>]*\bname\s*=\s*"?(-?\d+)"?[^>]*>"#).unwrap();
    let tag_re = Regex::new(r"<[^>]*>").unwrap();

    let mut entries = Vec::new();
    for row in row_re.captures_iter(html) {
        let row = &row[1];

        let Some((href, label)) = link_re
            .captures_iter(row)
            .map(|link| (link[1].to_string(), link[2].to_string()))
            .find(|(href, _)| !href.contains(".mp4"))
        else {
            continue;
        };

        let name = tag_re.replace_all(&label, "").trim().to_string();
        let name = if name.is_empty() { href.clone() } else { name };

        let mut cells = td_name_re
            .captures_iter(row)
            .filter_map(|cell| cell[1].parse::<i64>().ok());
        let Some(modified) = cells.next() else {
            continue;
        };
        let size = cells.next().and_then(|value| u64::try_from(value).ok());

        entries.push(ArtifactDescriptor {
            name,
            href,
            modified,
            size,
        });
    }
    entries
}

/// Listing path with the leading and trailing slash the device URLs use.
pub fn normalized_list_path(list_path: &str) -> String {
    let mut path = list_path.to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

/// Turn a listing entry's href into the path of its rendered video.
///
/// `NAME/` under `/local/aic_tlp/` becomes `/local/aic_tlp/NAME.mp4`.
pub fn resolve_video_path(list_path: &str, href: &str) -> String {
    let base = if href.starts_with('/') {
        href.to_string()
    } else {
        let mut joined = normalized_list_path(list_path);
        joined.push_str(href);
        joined
    };
    let base = base.strip_suffix('/').unwrap_or(&base);
    format!("{base}.mp4")
}

/// Fetch and parse the listing at `http://<host><list_path>`.
///
/// `timeout` bounds the whole request; a device that stops answering
/// fails the fetch instead of hanging the run.
pub async fn fetch_listing(
    client: &reqwest::Client,
    host: &str,
    list_path: &str,
    timeout: Duration,
) -> Result<Vec<ArtifactDescriptor>> {
    let path = normalized_list_path(list_path);
    let url = format!("http://{host}{path}");
    debug!(url = %url, "Fetching timelapse listing");

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("Failed to fetch listing at {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("Listing request to {url} returned {status}");
    }
    let html = response
        .text()
        .await
        .context("Failed to read listing body")?;

    let entries = parse_listing(&html);
    debug!(count = entries.len(), "Parsed listing entries");
    Ok(entries)
}
