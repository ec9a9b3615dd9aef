use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::EventLog;
use crate::models::{Event, EventCategory};

/// Long-poll wait bounds (spec §5: default 5s, max 30s).
const DEFAULT_WAIT: Duration = Duration::from_secs(5);
const MAX_WAIT: Duration = Duration::from_secs(30);
/// Poll quantum: how often the loop re-checks for new events and for
/// cancellation while waiting.
const POLL_QUANTUM: Duration = Duration::from_millis(250);
/// SSE heartbeat interval, must stay within the 30s ceiling.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// SSE connection hard lifetime; past this the client must reconnect with
/// `Last-Event-ID`.
const SSE_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
/// Minimum backoff after a recoverable poll error before retrying.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct StreamFilter {
    pub graph_id: String,
    pub since: Option<String>,
    pub categories: Option<Vec<EventCategory>>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LongPollResponse {
    pub events: Vec<Event>,
    pub last_event_id: Option<String>,
}

/// Owns the single poll loop shared by the long-poll and SSE endpoints,
/// generalizing the teacher's broadcast-channel `SSEManager`/`SSEConnection`
/// pair (`sse.rs`) to a stateless poll-the-graph model: there is no
/// in-process fan-out registry because every subscriber reads straight from
/// the event log's own ordering, which is already the source of truth.
#[derive(Clone)]
pub struct EventStream {
    log: EventLog,
}

impl EventStream {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }

    /// Blocks up to `wait` for at least one new event after `filter.since`,
    /// returning immediately once any are found. On timeout returns an empty
    /// set with the unchanged cursor. Honors cancellation by returning early
    /// if the passed-in future is dropped (the caller's connection future),
    /// since each quantum re-polls rather than blocking for the full wait.
    pub async fn poll_since(&self, filter: &StreamFilter, wait: Option<Duration>) -> anyhow::Result<LongPollResponse> {
        let wait = wait.unwrap_or(DEFAULT_WAIT).min(MAX_WAIT);
        let deadline = Instant::now() + wait;
        let mut last_event_id = filter.since.clone();

        loop {
            let events = self
                .log
                .read_forward_since(
                    &filter.graph_id,
                    last_event_id.as_deref(),
                    filter.categories.as_deref(),
                    filter.agent_id.as_deref(),
                )
                .await?;

            if !events.is_empty() {
                last_event_id = events.last().map(|e| e.id.clone());
                return Ok(LongPollResponse { events, last_event_id });
            }

            if Instant::now() >= deadline {
                return Ok(LongPollResponse { events: Vec::new(), last_event_id });
            }

            tokio::time::sleep(POLL_QUANTUM.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    /// Drives the SSE response: a `connected` frame, then `event` frames in
    /// order with the SSE `id:` field set for `Last-Event-ID` resumption, a
    /// `heartbeat` frame on every quiet interval, and an `error` frame
    /// (stream stays open, per spec §7) if a poll attempt fails. The stream
    /// yields naturally when the caller's response future is dropped, which
    /// is how axum propagates client disconnects into a cancelled poll
    /// within one quantum.
    pub fn sse(self, filter: StreamFilter) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
        let stream = async_stream::stream! {
            yield Ok(SseEvent::default().event("connected").data("{}"));

            let opened_at = Instant::now();
            let mut cursor = filter.since.clone();
            let mut last_heartbeat = Instant::now();

            loop {
                if opened_at.elapsed() >= SSE_MAX_LIFETIME {
                    debug!(graph_id = %filter.graph_id, "sse connection reached max lifetime, closing");
                    break;
                }

                let result = self
                    .log
                    .read_forward_since(&filter.graph_id, cursor.as_deref(), filter.categories.as_deref(), filter.agent_id.as_deref())
                    .await;

                match result {
                    Ok(events) if !events.is_empty() => {
                        for event in &events {
                            let data = match serde_json::to_string(event) {
                                Ok(data) => data,
                                Err(e) => {
                                    warn!(error = %e, "failed to serialize event for sse frame, skipping");
                                    continue;
                                }
                            };
                            yield Ok(SseEvent::default().event("event").id(event.id.clone()).data(data));
                        }
                        cursor = events.last().map(|e| e.id.clone());
                        last_heartbeat = Instant::now();
                    }
                    Ok(_) => {
                        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                            let ts = chrono::Utc::now().to_rfc3339();
                            yield Ok(SseEvent::default().event("heartbeat").data(format!("{{\"timestamp\":\"{ts}\"}}")));
                            last_heartbeat = Instant::now();
                        }
                        tokio::time::sleep(POLL_QUANTUM).await;
                    }
                    Err(e) => {
                        warn!(error = %e, graph_id = %filter.graph_id, "sse poll failed, emitting error frame and backing off");
                        yield Ok(SseEvent::default().event("error").data(format!("{{\"message\":\"{e}\"}}")));
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        };

        Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_duration_is_capped_at_max() {
        let wait = Some(Duration::from_secs(120)).unwrap_or(DEFAULT_WAIT).min(MAX_WAIT);
        assert_eq!(wait, MAX_WAIT);
    }

    #[test]
    fn default_wait_is_used_when_unspecified() {
        let wait: Option<Duration> = None;
        assert_eq!(wait.unwrap_or(DEFAULT_WAIT), DEFAULT_WAIT);
    }
}
