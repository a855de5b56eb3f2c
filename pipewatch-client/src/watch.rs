//! Watch channel
//!
//! Wraps the watch endpoint of one resource. Every successfully decoded
//! event triggers a fresh GET of the resource, and the fetched snapshot is
//! yielded instead of the event body. This catches changes made before the
//! watch was opened or between reconnects.
//!
//! The channel is driven by an explicit state machine:
//!
//! ```text
//! Connecting --ok--> Streaming --closed/reset--> Backoff --delay--> Connecting
//!     |                                             |
//!     +--rejected too often--> Failed               +--attempts used up--> Exhausted
//! ```

use pipewatch_core::dto::watch::WatchEvent;
use pipewatch_core::{ResourceKind, ResourceSnapshot};
use std::marker::PhantomData;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::transport::{ApiRequest, LineStream};
use crate::PipelineClient;

/// One notification produced by a watch channel
#[derive(Debug, Clone, PartialEq)]
pub enum WatchItem {
    /// Fresh snapshot fetched right after an event
    Snapshot(ResourceSnapshot),
    /// The fresh fetch found no such resource
    Absent,
    /// The connection failed transiently; existence should be re-checked
    Unknown,
}

/// Connection state of a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Connecting,
    Streaming,
    Backoff,
    /// All connection attempts used up; the sequence has ended
    Exhausted,
    /// A hard failure was returned; the sequence has ended
    Failed,
}

/// Restartable sequence of change notifications for one resource
///
/// Owns at most one connection at a time.
pub struct WatchChannel<K: ResourceKind> {
    client: PipelineClient,
    name: String,
    state: WatchState,
    attempts: u32,
    bad_responses: u32,
    stream: Option<Box<dyn LineStream>>,
    _kind: PhantomData<K>,
}

impl<K: ResourceKind> WatchChannel<K> {
    pub fn new(client: PipelineClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            state: WatchState::Connecting,
            attempts: 0,
            bad_responses: 0,
            stream: None,
            _kind: PhantomData,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Number of connection attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Next notification.
    ///
    /// Returns `Ok(None)` once the channel is exhausted. Errors are returned
    /// when the backend keeps rejecting the watch or a fresh fetch fails for
    /// a non-transient reason.
    pub async fn next(&mut self) -> Result<Option<WatchItem>> {
        loop {
            match self.state {
                WatchState::Connecting => {
                    if let Some(item) = self.connect().await? {
                        return Ok(Some(item));
                    }
                }
                WatchState::Streaming => {
                    if let Some(item) = self.read().await? {
                        return Ok(Some(item));
                    }
                }
                WatchState::Backoff => {
                    debug!(
                        "connection closed, reconnecting in {}s",
                        self.client.config().watch.retry_delay.as_secs()
                    );
                    tokio::time::sleep(self.client.config().watch.retry_delay).await;
                    self.state = WatchState::Connecting;
                }
                WatchState::Exhausted | WatchState::Failed => return Ok(None),
            }
        }
    }

    async fn connect(&mut self) -> Result<Option<WatchItem>> {
        let settings = &self.client.config().watch;
        self.attempts += 1;
        debug!(
            "watching for updates for {} '{}' (attempt {}/{})",
            K::KIND,
            self.name,
            self.attempts,
            settings.max_attempts
        );

        let request = ApiRequest::get(self.client.watch_path::<K>(&self.name))
            .with_header("Connection", "close");

        match self.client.transport().stream(request).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = WatchState::Streaming;
                Ok(None)
            }
            Err(e) if e.is_transient() => {
                debug!("watch connection for {} '{}' failed: {}", K::KIND, self.name, e);
                self.disconnected();
                Ok(Some(WatchItem::Unknown))
            }
            Err(e) => {
                self.bad_responses += 1;
                if self.bad_responses >= settings.max_bad_responses {
                    error!(
                        "giving up watching {} '{}' after {} rejected requests",
                        K::KIND,
                        self.name,
                        self.bad_responses
                    );
                    self.state = WatchState::Failed;
                    return Err(e);
                }
                self.disconnected();
                Ok(None)
            }
        }
    }

    async fn read(&mut self) -> Result<Option<WatchItem>> {
        let Some(stream) = self.stream.as_mut() else {
            self.disconnected();
            return Ok(None);
        };

        let line = match stream.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.disconnected();
                return Ok(None);
            }
            Err(e) if e.is_transient() => {
                debug!("watch stream for {} '{}' interrupted: {}", K::KIND, self.name, e);
                self.disconnected();
                return Ok(None);
            }
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        if line.trim().is_empty() {
            return Ok(None);
        }

        let event = match WatchEvent::from_line(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("{}: {}", e, line);
                return Ok(None);
            }
        };

        debug!(
            "{} event for {} '{}', retrieving fresh version",
            event.kind,
            K::KIND,
            self.name
        );

        match self.client.get_resource::<K>(&self.name).await {
            Ok(Some(snapshot)) => Ok(Some(WatchItem::Snapshot(snapshot))),
            Ok(None) => Ok(Some(WatchItem::Absent)),
            Err(e) if e.is_transient() => Ok(Some(WatchItem::Unknown)),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Drops the connection and either backs off or ends the sequence
    fn disconnected(&mut self) {
        self.stream = None;
        if self.attempts >= self.client.config().watch.max_attempts {
            warn!(
                "watch exhausted for {} '{}' after {} attempts",
                K::KIND,
                self.name,
                self.attempts
            );
            self.state = WatchState::Exhausted;
        } else {
            self.state = WatchState::Backoff;
        }
    }

    fn fail(&mut self) {
        self.stream = None;
        self.state = WatchState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::{self, FakeReply, FakeStep, FakeTransport};
    use crate::transport::Method;
    use pipewatch_core::PipelineRunKind;
    use std::time::Duration;

    fn setup() -> (std::sync::Arc<FakeTransport>, PipelineClient, String, String) {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        let watch = client.watch_path::<PipelineRunKind>("pr");
        let get = client.resource_path::<PipelineRunKind>("pr");
        (fake, client, watch, get)
    }

    #[tokio::test]
    async fn test_yields_fresh_snapshot_not_event_body() {
        let (fake, client, watch, get) = setup();
        let stale = fake::pipeline_run("pr", Some(("Unknown", "Pending")), &[]);
        let fresh = fake::pipeline_run("pr", Some(("Unknown", "Running")), &[("a", "pr-a")]);

        fake.set_resource(&get, stale.clone());
        fake.push_stream(
            &watch,
            vec![FakeStep::LineThenSet(
                fake::watch_line("MODIFIED", &stale),
                get.clone(),
                Some(fresh),
            )],
        );

        let mut channel = client.watch::<PipelineRunKind>("pr");
        let Some(WatchItem::Snapshot(snapshot)) = channel.next().await.unwrap() else {
            panic!("expected a snapshot");
        };

        assert!(snapshot.condition().unwrap().is_running());
        assert_eq!(snapshot.children.len(), 1);

        let requests = fake.requests();
        assert_eq!(requests[0].path, watch);
        assert!(requests[0]
            .headers
            .contains(&("Connection".to_string(), "close".to_string())));
        assert_eq!(requests[1].path, get);
    }

    #[tokio::test]
    async fn test_skips_malformed_lines() {
        let (fake, client, watch, get) = setup();
        let object = fake::pipeline_run("pr", Some(("Unknown", "Running")), &[]);
        fake.set_resource(&get, object.clone());
        fake.push_stream(
            &watch,
            vec![
                FakeStep::Line("{not json".to_string()),
                FakeStep::Line(r#"{"type": "ADDED"}"#.to_string()),
                FakeStep::Line(r#"{"object": {}}"#.to_string()),
                FakeStep::Line(String::new()),
                FakeStep::Line(fake::watch_line("ADDED", &object)),
            ],
        );

        let mut channel = client.watch::<PipelineRunKind>("pr");
        assert!(matches!(
            channel.next().await.unwrap(),
            Some(WatchItem::Snapshot(_))
        ));
        // only the valid event triggered a GET
        assert_eq!(fake.requests_to(&get).len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_event_type_still_fetches() {
        let (fake, client, watch, get) = setup();
        let object = fake::pipeline_run("pr", Some(("Unknown", "Running")), &[]);
        fake.set_resource(&get, object.clone());
        fake.push_stream(&watch, vec![FakeStep::Line(fake::watch_line("BOOKMARK", &object))]);

        let mut channel = client.watch::<PipelineRunKind>("pr");
        assert!(matches!(
            channel.next().await.unwrap(),
            Some(WatchItem::Snapshot(_))
        ));
        assert_eq!(fake.requests_to(&get).len(), 1);
    }

    #[tokio::test]
    async fn test_absent_after_event_when_resource_deleted() {
        let (fake, client, watch, get) = setup();
        let object = fake::pipeline_run("pr", Some(("Unknown", "Running")), &[]);
        fake.set_resource(&get, object.clone());
        fake.push_stream(
            &watch,
            vec![FakeStep::LineThenSet(
                fake::watch_line("DELETED", &object),
                get.clone(),
                None,
            )],
        );

        let mut channel = client.watch::<PipelineRunKind>("pr");
        assert_eq!(channel.next().await.unwrap(), Some(WatchItem::Absent));
    }

    #[tokio::test]
    async fn test_transient_connect_failure_yields_unknown() {
        let (fake, client, watch, _) = setup();
        fake.push(Method::Get, &watch, FakeReply::ConnectionError);

        let mut channel = client.watch::<PipelineRunKind>("pr");
        assert_eq!(channel.next().await.unwrap(), Some(WatchItem::Unknown));
        assert_eq!(channel.state(), WatchState::Backoff);
    }

    #[tokio::test]
    async fn test_reconnects_after_stream_closes() {
        let (fake, client, watch, get) = setup();
        let object = fake::pipeline_run("pr", Some(("True", "Succeeded")), &[]);
        fake.set_resource(&get, object.clone());
        fake.push_stream(&watch, vec![]);
        fake.push_stream(&watch, vec![FakeStep::Drop]);
        fake.push_stream(&watch, vec![FakeStep::Line(fake::watch_line("ADDED", &object))]);

        let mut channel = client.watch::<PipelineRunKind>("pr");
        assert!(matches!(
            channel.next().await.unwrap(),
            Some(WatchItem::Snapshot(_))
        ));
        assert_eq!(channel.attempts(), 3);
        assert_eq!(fake.requests_to(&watch).len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let (fake, client, watch, _) = setup();

        let mut channel = client.watch::<PipelineRunKind>("pr");
        // every connection closes immediately without events
        assert_eq!(channel.next().await.unwrap(), None);
        assert_eq!(channel.state(), WatchState::Exhausted);
        assert_eq!(fake.requests_to(&watch).len(), 20);

        // stays ended
        assert_eq!(channel.next().await.unwrap(), None);
        assert_eq!(fake.requests_to(&watch).len(), 20);
    }

    #[tokio::test]
    async fn test_rejected_watch_propagates_after_limit() {
        let fake = FakeTransport::new();
        let mut config = crate::Config::new("https://api.example.test", "builds");
        config.watch.retry_delay = Duration::ZERO;
        config.watch.max_bad_responses = 3;
        let client = PipelineClient::with_transport(config, fake.clone());
        let watch = client.watch_path::<PipelineRunKind>("pr");

        for _ in 0..3 {
            fake.push(Method::Get, &watch, FakeReply::Response(403, "forbidden".to_string()));
        }

        let mut channel = client.watch::<PipelineRunKind>("pr");
        let err = channel.next().await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(channel.state(), WatchState::Failed);
        assert_eq!(fake.requests_to(&watch).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_retry_delay() {
        let fake = FakeTransport::new();
        let mut config = crate::Config::new("https://api.example.test", "builds");
        config.watch.max_attempts = 2;
        let client = PipelineClient::with_transport(config, fake.clone());

        let started = tokio::time::Instant::now();
        let mut channel = client.watch::<PipelineRunKind>("pr");
        assert_eq!(channel.next().await.unwrap(), None);

        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(channel.attempts(), 2);
    }
}
