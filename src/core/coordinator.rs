//! The export coordinator.
//!
//! Drives one export end to end: open the control channel, send the
//! trigger, wait for the readiness echo under a fixed wall-clock budget,
//! optionally verify the artifact answers over HTTP, and close the
//! session exactly once on every path out.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::sdcp::channel::{ControlChannel, ControlSession};
use crate::sdcp::protocol::{ExportTicket, Notification};

/// How long the optional existence probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// What the caller asked for.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Printer host or IP, no scheme.
    pub host: String,
    /// Absolute path of the video to export.
    pub target: String,
    /// Listing path the target was resolved against, kept for logging.
    pub list_path: Option<String>,
    /// Probe the URL over HTTP after the device says ready.
    pub check: bool,
}

/// Runs exports against one control channel implementation.
pub struct Coordinator<C> {
    channel: C,
    http: reqwest::Client,
    /// Budget from trigger to readiness. Progress chatter does not
    /// extend it.
    timeout: Duration,
    keepalive_every: Duration,
}

impl<C: ControlChannel> Coordinator<C> {
    pub fn new(channel: C, timeout: Duration, keepalive_every: Duration) -> Self {
        Self {
            channel,
            http: reqwest::Client::new(),
            timeout,
            keepalive_every,
        }
    }

    /// Run one export to completion.
    ///
    /// Returns the download URL the device confirmed. The control session
    /// is closed before this returns, on success and on every failure.
    pub async fn export(&self, request: &ExportRequest) -> Result<String, ExportError> {
        let ticket = ExportTicket::new(request.host.clone(), request.target.clone());
        info!(
            target = %ticket.target,
            request_id = %ticket.request_id,
            "Starting export"
        );
        if let Some(list_path) = &request.list_path {
            debug!(list_path = %list_path, "Target was resolved from the listing");
        }

        let mut session = self.channel.open(&ticket).await?;

        let result = self.drive(session.as_mut(), &ticket, request).await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "Error closing control session");
        }

        match &result {
            Ok(url) => info!(url = %url, "Export complete"),
            Err(e) => warn!(error = %e, "Export failed"),
        }
        result
    }

    async fn drive(
        &self,
        session: &mut dyn ControlSession,
        ticket: &ExportTicket,
        request: &ExportRequest,
    ) -> Result<String, ExportError> {
        // The budget starts when we commit to triggering and never moves.
        let started = Instant::now();
        let deadline = started + self.timeout;

        session.send_trigger().await?;
        info!(target = %ticket.target, "Export requested, awaiting readiness");

        let download_url = self.await_ready(session, ticket, started, deadline).await?;

        if request.check {
            debug!(url = %download_url, "Verifying the artifact answers");
            if !self.probe(&download_url).await {
                return Err(ExportError::Verification(format!(
                    "{download_url} did not answer an existence probe"
                )));
            }
        }

        Ok(download_url)
    }

    /// Wait for a terminal notification, pinging through the silence.
    async fn await_ready(
        &self,
        session: &mut dyn ControlSession,
        ticket: &ExportTicket,
        started: Instant,
        deadline: Instant,
    ) -> Result<String, ExportError> {
        let mut next_ping = Instant::now() + self.keepalive_every;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExportError::TimedOut {
                    target: ticket.target.clone(),
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }

            if now >= next_ping {
                // Keeps the firmware from dropping a silent socket.
                if let Err(e) = session.keepalive().await {
                    debug!(error = %e, "Keepalive failed");
                }
                next_ping = now + self.keepalive_every;
            }

            let wake = deadline.min(next_ping);
            let notification = match tokio::time::timeout_at(wake, session.recv()).await {
                Ok(Ok(notification)) => notification,
                // A dead channel can never deliver the echo; fail now
                // instead of burning the rest of the budget.
                Ok(Err(e)) => return Err(e.into()),
                // Nothing arrived before the ping or budget boundary.
                Err(_) => continue,
            };

            match notification {
                Notification::Ready { download_url } => {
                    info!(
                        elapsed_secs = started.elapsed().as_secs(),
                        "Device reports export ready"
                    );
                    return Ok(download_url);
                }
                Notification::Failed { reason } => {
                    return Err(ExportError::Export {
                        target: ticket.target.clone(),
                        reason,
                    });
                }
                Notification::Progress => {
                    debug!("Export still in progress");
                }
                Notification::Unrelated => {
                    // Shared channel; other traffic is not ours to judge.
                }
            }
        }
    }

    /// HEAD the artifact URL. Any failure counts as "not there".
    async fn probe(&self, url: &str) -> bool {
        match self.http.head(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Existence probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::ChannelError;

    enum Step {
        Notify(Notification),
        Delay(Duration),
        Fail(String),
    }

    #[derive(Clone, Default)]
    struct Counters {
        triggers: Arc<AtomicU32>,
        pings: Arc<AtomicU32>,
        closes: Arc<AtomicU32>,
    }

    /// Channel whose single session replays a fixed script, then goes
    /// silent. `refusing()` fails at open; `failing_send()` and
    /// `rejecting_pings()` fail the matching session calls.
    struct ScriptedChannel {
        steps: Mutex<Option<VecDeque<Step>>>,
        fail_sends: bool,
        fail_pings: bool,
        counters: Counters,
    }

    impl ScriptedChannel {
        fn new(steps: Vec<Step>) -> (Self, Counters) {
            Self::build(Some(steps.into()), false, false)
        }

        fn refusing() -> (Self, Counters) {
            Self::build(None, false, false)
        }

        fn failing_send() -> (Self, Counters) {
            Self::build(Some(VecDeque::new()), true, false)
        }

        fn rejecting_pings(steps: Vec<Step>) -> (Self, Counters) {
            Self::build(Some(steps.into()), false, true)
        }

        fn build(
            steps: Option<VecDeque<Step>>,
            fail_sends: bool,
            fail_pings: bool,
        ) -> (Self, Counters) {
            let counters = Counters::default();
            let channel = Self {
                steps: Mutex::new(steps),
                fail_sends,
                fail_pings,
                counters: counters.clone(),
            };
            (channel, counters)
        }
    }

    #[async_trait]
    impl ControlChannel for ScriptedChannel {
        async fn open(
            &self,
            _ticket: &ExportTicket,
        ) -> Result<Box<dyn ControlSession>, ChannelError> {
            match self.steps.lock().unwrap().take() {
                Some(steps) => Ok(Box::new(ScriptedSession {
                    steps,
                    fail_sends: self.fail_sends,
                    fail_pings: self.fail_pings,
                    counters: self.counters.clone(),
                })),
                None => Err(ChannelError::Connect("nobody listening".to_string())),
            }
        }
    }

    struct ScriptedSession {
        steps: VecDeque<Step>,
        fail_sends: bool,
        fail_pings: bool,
        counters: Counters,
    }

    #[async_trait]
    impl ControlSession for ScriptedSession {
        async fn send_trigger(&mut self) -> Result<(), ChannelError> {
            self.counters.triggers.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends {
                return Err(ChannelError::Send("broken pipe".to_string()));
            }
            Ok(())
        }

        async fn recv(&mut self) -> Result<Notification, ChannelError> {
            loop {
                match self.steps.pop_front() {
                    Some(Step::Delay(delay)) => tokio::time::sleep(delay).await,
                    Some(Step::Notify(notification)) => return Ok(notification),
                    Some(Step::Fail(message)) => return Err(ChannelError::Recv(message)),
                    // Script exhausted: stay silent forever.
                    None => futures::future::pending::<()>().await,
                }
            }
        }

        async fn keepalive(&mut self) -> Result<(), ChannelError> {
            self.counters.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail_pings {
                return Err(ChannelError::Send("ping refused".to_string()));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request(check: bool) -> ExportRequest {
        ExportRequest {
            host: "printer.local".to_string(),
            target: "/local/aic_tlp/clip.mp4".to_string(),
            list_path: None,
            check,
        }
    }

    #[tokio::test]
    async fn test_ready_notification_completes_the_export() {
        let url = "http://printer.local/local/aic_tlp/clip.mp4".to_string();
        let (channel, counters) = ScriptedChannel::new(vec![
            Step::Notify(Notification::Progress),
            Step::Notify(Notification::Unrelated),
            Step::Notify(Notification::Ready {
                download_url: url.clone(),
            }),
        ]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let got = coordinator.export(&request(false)).await.unwrap();

        assert_eq!(got, url);
        assert_eq!(counters.triggers.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_and_still_closes_once() {
        let (channel, counters) = ScriptedChannel::new(vec![]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(30), Duration::from_secs(20));

        let err = coordinator.export(&request(false)).await.unwrap_err();

        match err {
            ExportError::TimedOut {
                target,
                elapsed_secs,
            } => {
                assert_eq!(target, "/local/aic_tlp/clip.mp4");
                assert_eq!(elapsed_secs, 30);
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
        // One keepalive fits into a 30s budget with a 20s cadence.
        assert_eq!(counters.pings.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_does_not_extend_the_deadline() {
        let (channel, counters) = ScriptedChannel::new(vec![
            Step::Delay(Duration::from_secs(25)),
            Step::Notify(Notification::Progress),
        ]);
        // Long keepalive cadence keeps the timeline down to budget only.
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(30), Duration::from_secs(600));

        let before = Instant::now();
        let err = coordinator.export(&request(false)).await.unwrap_err();

        assert!(matches!(err, ExportError::TimedOut { elapsed_secs: 30, .. }));
        // A deadline reset on progress would have stretched this to 55s.
        assert_eq!(before.elapsed(), Duration::from_secs(30));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_chatter_never_completes_an_export() {
        let (channel, counters) = ScriptedChannel::new(vec![
            Step::Notify(Notification::Unrelated),
            Step::Delay(Duration::from_secs(10)),
            Step::Notify(Notification::Unrelated),
            Step::Delay(Duration::from_secs(10)),
            Step::Notify(Notification::Unrelated),
        ]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(30), Duration::from_secs(600));

        let err = coordinator.export(&request(false)).await.unwrap_err();

        assert!(matches!(err, ExportError::TimedOut { elapsed_secs: 30, .. }));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_notification_surfaces_the_device_reason() {
        let (channel, counters) = ScriptedChannel::new(vec![
            Step::Notify(Notification::Progress),
            Step::Notify(Notification::Failed {
                reason: "device ack code 2".to_string(),
            }),
        ]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let err = coordinator.export(&request(false)).await.unwrap_err();

        match err {
            ExportError::Export { target, reason } => {
                assert_eq!(target, "/local/aic_tlp/clip.mp4");
                assert_eq!(reason, "device ack code 2");
            }
            other => panic!("expected Export, got {other:?}"),
        }
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recv_error_fails_fast_as_connection_error() {
        let (channel, counters) =
            ScriptedChannel::new(vec![Step::Fail("socket reset".to_string())]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let err = coordinator.export(&request(false)).await.unwrap_err();

        match err {
            ExportError::Connection(message) => assert!(message.contains("socket reset")),
            other => panic!("expected Connection, got {other:?}"),
        }
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_failure_fails_fast_and_still_closes() {
        let (channel, counters) = ScriptedChannel::failing_send();
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let err = coordinator.export(&request(false)).await.unwrap_err();

        match err {
            ExportError::Connection(message) => assert!(message.contains("send failed")),
            other => panic!("expected Connection, got {other:?}"),
        }
        assert_eq!(counters.triggers.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pings.load(Ordering::SeqCst), 0);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failure_does_not_abort_the_wait() {
        let url = "http://printer.local/local/aic_tlp/clip.mp4".to_string();
        let (channel, counters) = ScriptedChannel::rejecting_pings(vec![
            Step::Delay(Duration::from_secs(25)),
            Step::Notify(Notification::Ready {
                download_url: url.clone(),
            }),
        ]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let got = coordinator.export(&request(false)).await.unwrap();

        assert_eq!(got, url);
        // The 20s ping errored but the wait carried on to the echo.
        assert_eq!(counters.pings.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_nothing_to_close() {
        let (channel, counters) = ScriptedChannel::refusing();
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let err = coordinator.export(&request(false)).await.unwrap_err();

        assert!(matches!(err, ExportError::Connection(_)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_check_accepts_an_artifact_that_answers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/local/aic_tlp/clip.mp4"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let url = format!("{}/local/aic_tlp/clip.mp4", server.uri());

        let (channel, counters) = ScriptedChannel::new(vec![Step::Notify(Notification::Ready {
            download_url: url.clone(),
        })]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let got = coordinator.export(&request(true)).await.unwrap();

        assert_eq!(got, url);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_check_rejects_an_artifact_that_does_not_answer() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/local/aic_tlp/clip.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let url = format!("{}/local/aic_tlp/clip.mp4", server.uri());

        let (channel, counters) =
            ScriptedChannel::new(vec![Step::Notify(Notification::Ready { download_url: url })]);
        let coordinator =
            Coordinator::new(channel, Duration::from_secs(180), Duration::from_secs(20));

        let err = coordinator.export(&request(true)).await.unwrap_err();

        assert!(matches!(err, ExportError::Verification(_)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }
}
