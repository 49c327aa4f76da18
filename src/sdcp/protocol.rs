//! SDCP frame types for the timelapse export command.
//!
//! The controller speaks JSON frames over its WebSocket. Outbound we send
//! exactly one command shape; inbound traffic is a mix of acks, status
//! pushes, and frames about other clients' requests, so decoding is
//! deliberately tolerant and funnels everything into [`Notification`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command code the mainboard uses for "export timelapse to HTTP".
pub const CMD_EXPORT_TIMELAPSE: u32 = 323;

/// Sender tag the vendor's desktop tools put in the `From` field.
const FROM_PC: u8 = 1;

/// Identity of one export in flight.
///
/// Carries what we asked for and the two keys the controller can echo
/// back: the target path itself and the per-command request token.
#[derive(Debug, Clone)]
pub struct ExportTicket {
    /// Printer host or IP, no scheme.
    pub host: String,
    /// Absolute path of the video on the printer, e.g. `/local/aic_tlp/NAME.mp4`.
    pub target: String,
    /// Hex token the controller echoes in responses to our command.
    pub request_id: String,
}

impl ExportTicket {
    /// Mint a ticket with a fresh request token.
    pub fn new(host: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            target: target.into(),
            request_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Where the artifact will be fetchable once the device says ready.
    pub fn download_url(&self) -> String {
        format!("http://{}{}", self.host, self.target)
    }
}

/// One inbound frame, classified against the export in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The controller acknowledged our request; the render is still running.
    Progress,
    /// The export finished and the artifact is fetchable at this URL.
    Ready { download_url: String },
    /// The controller reported the export as failed.
    Failed { reason: String },
    /// Traffic about something else on a shared channel.
    Unrelated,
}

/// Envelope for the outbound export command.
#[derive(Debug, Clone, Serialize)]
pub struct ExportCommand {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Data")]
    pub data: CommandFrame,
}

/// Inner command frame.
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame {
    #[serde(rename = "Cmd")]
    pub cmd: u32,
    #[serde(rename = "Data")]
    pub data: CommandPayload,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    /// Left empty; the mainboard answers regardless.
    #[serde(rename = "MainboardID")]
    pub mainboard_id: String,
    #[serde(rename = "TimeStamp")]
    pub timestamp: i64,
    #[serde(rename = "From")]
    pub from: u8,
}

/// Command arguments. Export takes a list of paths; we always send one.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPayload {
    #[serde(rename = "Url")]
    pub url: Vec<String>,
}

impl ExportCommand {
    /// Build the export trigger for the ticket's target path.
    pub fn export_timelapse(ticket: &ExportTicket) -> Self {
        Self {
            id: String::new(),
            data: CommandFrame {
                cmd: CMD_EXPORT_TIMELAPSE,
                data: CommandPayload {
                    url: vec![ticket.target.clone()],
                },
                request_id: ticket.request_id.clone(),
                mainboard_id: String::new(),
                timestamp: Utc::now().timestamp_millis(),
                from: FROM_PC,
            },
        }
    }
}

/// Loose mirror of the envelope for inbound traffic.
///
/// Firmware frames vary by topic, so every field is optional and unknown
/// shapes fall through to [`Notification::Unrelated`].
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "Data", default)]
    data: Option<InboundFrame>,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "Cmd", default)]
    cmd: Option<u32>,
    #[serde(rename = "Data", default)]
    data: Option<InboundPayload>,
    #[serde(rename = "RequestID", default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboundPayload {
    #[serde(rename = "Url", default)]
    url: Vec<String>,
    #[serde(rename = "Ack", default)]
    ack: Option<i64>,
}

/// Classify one raw text frame against the export in flight.
///
/// This is the single place inbound traffic is interpreted; callers never
/// see raw frames. Correlation is strict: the echoed target path is the
/// terminal key, the request token marks our own command's acks. Frames
/// matching neither, and frames that do not parse, are `Unrelated`.
pub fn decode(raw: &str, ticket: &ExportTicket) -> Notification {
    let Ok(envelope) = serde_json::from_str::<InboundEnvelope>(raw) else {
        return Notification::Unrelated;
    };
    let Some(frame) = envelope.data else {
        return Notification::Unrelated;
    };

    let token_match = frame.request_id.as_deref() == Some(ticket.request_id.as_str());

    if frame.cmd != Some(CMD_EXPORT_TIMELAPSE) {
        // Status chatter tied to our request keeps the wait alive.
        return if token_match {
            Notification::Progress
        } else {
            Notification::Unrelated
        };
    }

    let (echoed, ack) = match &frame.data {
        Some(payload) => (payload.url.first().map(String::as_str), payload.ack),
        None => (None, None),
    };
    let url_match = echoed == Some(ticket.target.as_str());

    if !url_match && !token_match {
        // An export frame, but for somebody else's file.
        return Notification::Unrelated;
    }

    if let Some(code) = ack.filter(|&code| code != 0) {
        return Notification::Failed {
            reason: format!("device ack code {code}"),
        };
    }

    if url_match {
        Notification::Ready {
            download_url: ticket.download_url(),
        }
    } else {
        Notification::Progress
    }
}
