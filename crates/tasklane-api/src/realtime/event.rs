use serde::Serialize;

use crate::model::{Project, Task};

/// A typed event delivered on the realtime channel.
///
/// Every data variant is derived from exactly one inbound
/// `postgres_changes` frame. `Connected` and `Disconnected` describe the
/// link itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RealtimeEvent {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task_id: String,
        task: Task,
        old: Option<Task>,
    },
    TaskDeleted {
        task_id: String,
        task: Task,
    },
    ProjectCreated {
        project: Project,
    },
    ProjectUpdated {
        project_id: String,
        project: Project,
        old: Option<Project>,
    },
    ProjectDeleted {
        project_id: String,
        project: Project,
    },
    Connected,
    Disconnected {
        reason: String,
    },
}

impl RealtimeEvent {
    /// Short label for logs and the CLI event feed.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::ProjectCreated { .. } => "project_created",
            Self::ProjectUpdated { .. } => "project_updated",
            Self::ProjectDeleted { .. } => "project_deleted",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    /// `true` for `Connected` / `Disconnected`.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected { .. })
    }
}
