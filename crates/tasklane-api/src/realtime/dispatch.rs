//! Inbound frame classification and typed event publishing.
//!
//! The reader loop hands every text frame to [`EventDispatcher::dispatch`].
//! Frames are parsed as [`Envelope`]s and routed by `event`:
//!
//! - `postgres_changes` → by `payload.table` and `payload.type` into a
//!   [`RealtimeEvent`] data variant
//! - `phx_reply` → join acknowledgment, recorded per topic and logged
//! - `heartbeat` → ignored
//! - anything else → logged and dropped
//!
//! Publishing never blocks the reader: when the bounded channel is full the
//! new event is dropped and counted (drop-newest).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::event::RealtimeEvent;
use super::protocol::{
    ChangePayload, ChangeType, EVENT_HEARTBEAT, EVENT_POSTGRES_CHANGES, EVENT_REPLY, Envelope,
    ReplyPayload,
};
use crate::error::Error;
use crate::model::{Project, Task};

const TABLE_TASKS: &str = "tasks";
const TABLE_PROJECTS: &str = "projects";

// ── Join tracking ────────────────────────────────────────────────────

/// Acknowledgment state of a channel join.
///
/// Informational only: change events are processed regardless of whether
/// a join was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    /// Join sent, no reply seen yet.
    Pending,
    /// Server replied `ok`.
    Joined,
    /// Server replied with a non-`ok` status.
    Rejected { reason: String },
}

// ── Dispatcher ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EventDispatcher {
    tx: mpsc::Sender<RealtimeEvent>,
    dropped: AtomicU64,
    joins: DashMap<String, JoinStatus>,
}

impl EventDispatcher {
    /// Create a dispatcher and the receiving end of its bounded channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Self {
            tx,
            dropped: AtomicU64::new(0),
            joins: DashMap::new(),
        };
        (dispatcher, rx)
    }

    /// Parse, classify, and publish one inbound text frame.
    ///
    /// Never fails: malformed frames and unknown combinations are logged
    /// and dropped.
    pub fn dispatch(&self, frame: &str) {
        match self.decode(frame) {
            Ok(Some(event)) => {
                self.publish(event);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "dropping unparsable realtime frame"),
        }
    }

    /// Non-blocking send. Returns `false` if the event was dropped.
    pub fn publish(&self, event: RealtimeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = event.kind(),
                    dropped_total = total,
                    "event channel full, dropping newest event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                trace!(kind = event.kind(), "event receiver gone");
                false
            }
        }
    }

    /// Number of events dropped because the channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record that a join for `topic` has been sent.
    pub fn mark_pending(&self, topic: &str) {
        self.joins.insert(topic.to_owned(), JoinStatus::Pending);
    }

    pub fn join_status(&self, topic: &str) -> Option<JoinStatus> {
        self.joins.get(topic).map(|entry| entry.value().clone())
    }

    /// Snapshot of every tracked topic, sorted by topic.
    pub fn subscriptions(&self) -> Vec<(String, JoinStatus)> {
        let mut subs: Vec<_> = self
            .joins
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        subs.sort_by(|a, b| a.0.cmp(&b.0));
        subs
    }

    pub(crate) fn clear_subscriptions(&self) {
        self.joins.clear();
    }

    // ── Decoding ─────────────────────────────────────────────────────

    /// Classify a frame. `Ok(None)` means the frame was valid but produces
    /// no event (ack, heartbeat, unknown event or table/type).
    pub fn decode(&self, frame: &str) -> Result<Option<RealtimeEvent>, Error> {
        let envelope: Envelope =
            serde_json::from_str(frame).map_err(|e| Error::Protocol(e.to_string()))?;

        match envelope.event.as_str() {
            EVENT_POSTGRES_CHANGES => change_event(&envelope),
            EVENT_REPLY => {
                self.record_reply(&envelope);
                Ok(None)
            }
            EVENT_HEARTBEAT => Ok(None),
            other => {
                debug!(event = other, topic = %envelope.topic, "ignoring unknown realtime event");
                Ok(None)
            }
        }
    }

    fn record_reply(&self, envelope: &Envelope) {
        let reply: ReplyPayload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, topic = %envelope.topic, "unparsable phx_reply payload");
                return;
            }
        };

        // Replies to heartbeats and other non-join messages carry topics
        // we never joined.
        let Some(mut status) = self.joins.get_mut(&envelope.topic) else {
            trace!(topic = %envelope.topic, status = %reply.status, "reply for untracked topic");
            return;
        };

        if reply.is_ok() {
            info!(topic = %envelope.topic, "channel join acknowledged");
            *status = JoinStatus::Joined;
        } else {
            let reason = reply
                .response
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| reply.response.to_string(), str::to_owned);
            warn!(
                topic = %envelope.topic,
                status = %reply.status,
                reason = %reason,
                "channel join rejected, no events will arrive for this topic"
            );
            *status = JoinStatus::Rejected { reason };
        }
    }
}

// ── Change routing ───────────────────────────────────────────────────

fn change_event(envelope: &Envelope) -> Result<Option<RealtimeEvent>, Error> {
    let change: ChangePayload = serde_json::from_value(envelope.payload.clone())
        .map_err(|e| Error::Protocol(format!("invalid postgres_changes payload: {e}")))?;

    let event = match (change.table.as_str(), change.change_type) {
        (TABLE_TASKS, ChangeType::Insert) => RealtimeEvent::TaskCreated {
            task: record_as(&change.record)?,
        },
        (TABLE_TASKS, ChangeType::Update) => {
            let task: Task = record_as(&change.record)?;
            RealtimeEvent::TaskUpdated {
                task_id: task.id.clone(),
                old: old_record_as(change.old_record.as_ref())?,
                task,
            }
        }
        (TABLE_TASKS, ChangeType::Delete) => {
            let task: Task = deleted_row(&change)?;
            RealtimeEvent::TaskDeleted {
                task_id: task.id.clone(),
                task,
            }
        }
        (TABLE_PROJECTS, ChangeType::Insert) => RealtimeEvent::ProjectCreated {
            project: record_as(&change.record)?,
        },
        (TABLE_PROJECTS, ChangeType::Update) => {
            let project: Project = record_as(&change.record)?;
            RealtimeEvent::ProjectUpdated {
                project_id: project.id.clone(),
                old: old_record_as(change.old_record.as_ref())?,
                project,
            }
        }
        (TABLE_PROJECTS, ChangeType::Delete) => {
            let project: Project = deleted_row(&change)?;
            RealtimeEvent::ProjectDeleted {
                project_id: project.id.clone(),
                project,
            }
        }
        (table, change_type) => {
            debug!(
                table,
                ?change_type,
                schema = %change.schema,
                "dropping unrecognized change notification"
            );
            return Ok(None);
        }
    };

    Ok(Some(event))
}

/// Convert a generic row into a typed record through serde, which
/// tolerates missing and extra columns.
fn record_as<T: DeserializeOwned>(record: &serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(record.clone())
        .map_err(|e| Error::Protocol(format!("invalid change record: {e}")))
}

fn is_empty_row(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn old_record_as<T: DeserializeOwned>(old: Option<&serde_json::Value>) -> Result<Option<T>, Error> {
    match old {
        Some(value) if !is_empty_row(value) => record_as(value).map(Some),
        _ => Ok(None),
    }
}

/// DELETE notifications carry the row in `old_record`; `record` is
/// usually empty.
fn deleted_row<T: DeserializeOwned>(change: &ChangePayload) -> Result<T, Error> {
    match change.old_record.as_ref() {
        Some(old) if !is_empty_row(old) => record_as(old),
        _ => record_as(&change.record),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change_frame(table: &str, change_type: &str, record: serde_json::Value) -> String {
        json!({
            "event": "postgres_changes",
            "topic": format!("realtime:public:{table}"),
            "payload": {
                "schema": "public",
                "table": table,
                "type": change_type,
                "record": record,
            },
            "ref": "1"
        })
        .to_string()
    }

    #[test]
    fn task_insert_becomes_task_created() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        dispatcher.dispatch(&change_frame(
            "tasks",
            "INSERT",
            json!({ "id": "t-1", "title": "Write docs" }),
        ));

        match rx.try_recv().unwrap() {
            RealtimeEvent::TaskCreated { task } => {
                assert_eq!(task.id, "t-1");
                assert_eq!(task.title, "Write docs");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn task_update_carries_old_record() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        let frame = json!({
            "event": "postgres_changes",
            "topic": "realtime:public:tasks",
            "payload": {
                "schema": "public",
                "table": "tasks",
                "type": "UPDATE",
                "record": { "id": "t-1", "title": "New title" },
                "old_record": { "id": "t-1", "title": "Old title" }
            },
            "ref": null
        });
        dispatcher.dispatch(&frame.to_string());

        let RealtimeEvent::TaskUpdated { task_id, task, old } = rx.try_recv().unwrap() else {
            panic!("expected TaskUpdated");
        };
        assert_eq!(task_id, "t-1");
        assert_eq!(task.title, "New title");
        assert_eq!(old.unwrap().title, "Old title");
    }

    #[test]
    fn numeric_ref_and_null_columns_still_dispatch() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        let frame = json!({
            "event": "postgres_changes",
            "topic": "realtime:public:projects",
            "payload": {
                "schema": "public",
                "table": "projects",
                "type": "UPDATE",
                "record": { "id": "p-1", "name": null, "archived": null }
            },
            "ref": 12
        });
        dispatcher.dispatch(&frame.to_string());

        let RealtimeEvent::ProjectUpdated { project_id, project, .. } = rx.try_recv().unwrap()
        else {
            panic!("expected ProjectUpdated");
        };
        assert_eq!(project_id, "p-1");
        assert_eq!(project.name, "");
        assert!(!project.archived);
    }

    #[test]
    fn empty_old_record_is_none() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        let frame = json!({
            "event": "postgres_changes",
            "topic": "realtime:public:projects",
            "payload": {
                "table": "projects",
                "type": "UPDATE",
                "record": { "id": "p-1", "name": "Roadmap" },
                "old_record": {}
            }
        });
        dispatcher.dispatch(&frame.to_string());

        let RealtimeEvent::ProjectUpdated {
            project_id, old, ..
        } = rx.try_recv().unwrap()
        else {
            panic!("expected ProjectUpdated");
        };
        assert_eq!(project_id, "p-1");
        assert!(old.is_none());
    }

    #[test]
    fn delete_reads_row_from_old_record() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        let frame = json!({
            "event": "postgres_changes",
            "topic": "realtime:public:tasks",
            "payload": {
                "table": "tasks",
                "type": "DELETE",
                "record": {},
                "old_record": { "id": "t-9", "title": "Gone" }
            }
        });
        dispatcher.dispatch(&frame.to_string());

        let RealtimeEvent::TaskDeleted { task_id, task } = rx.try_recv().unwrap() else {
            panic!("expected TaskDeleted");
        };
        assert_eq!(task_id, "t-9");
        assert_eq!(task.title, "Gone");
    }

    #[test]
    fn unknown_table_and_event_are_dropped() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        dispatcher.dispatch(&change_frame("comments", "INSERT", json!({ "id": "c-1" })));
        dispatcher.dispatch(&change_frame("tasks", "TRUNCATE", json!({})));
        dispatcher.dispatch(r#"{"event":"presence_diff","topic":"x","payload":{}}"#);
        dispatcher.dispatch(r#"{"event":"heartbeat","topic":"phoenix","payload":{}}"#);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_frames_do_not_panic() {
        let (dispatcher, mut rx) = EventDispatcher::new(8);
        dispatcher.dispatch("not json at all");
        dispatcher.dispatch(r#"{"event":"postgres_changes","payload":{"type":"INSERT"}}"#);

        assert!(rx.try_recv().is_err());
        assert!(matches!(
            dispatcher.decode("{"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn full_channel_drops_newest() {
        let (dispatcher, mut rx) = EventDispatcher::new(1);
        assert!(dispatcher.publish(RealtimeEvent::Connected));
        assert!(!dispatcher.publish(RealtimeEvent::Disconnected {
            reason: "gone".into()
        }));

        assert_eq!(dispatcher.dropped_events(), 1);
        assert_eq!(rx.try_recv().unwrap(), RealtimeEvent::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn join_replies_update_subscription_status() {
        let (dispatcher, _rx) = EventDispatcher::new(8);
        dispatcher.mark_pending("realtime:public:tasks");
        dispatcher.mark_pending("realtime:public:projects");

        dispatcher.dispatch(
            &json!({
                "event": "phx_reply",
                "topic": "realtime:public:tasks",
                "payload": { "status": "ok", "response": {} },
                "ref": "1"
            })
            .to_string(),
        );
        dispatcher.dispatch(
            &json!({
                "event": "phx_reply",
                "topic": "realtime:public:projects",
                "payload": { "status": "error", "response": { "reason": "unauthorized" } },
                "ref": "2"
            })
            .to_string(),
        );

        assert_eq!(
            dispatcher.join_status("realtime:public:tasks"),
            Some(JoinStatus::Joined)
        );
        assert_eq!(
            dispatcher.join_status("realtime:public:projects"),
            Some(JoinStatus::Rejected {
                reason: "unauthorized".into()
            })
        );
        assert_eq!(dispatcher.subscriptions().len(), 2);
    }
}
