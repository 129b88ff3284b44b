// ── Task / project records ──
//
// Wire shapes shared by the REST transport and the realtime feed. Both
// structs default every field so rows with missing, null, or extra columns
// still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

/// Workflow status of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Done,
    Closed,
    /// Any status this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// Closed-out statuses hidden from listings unless explicitly requested.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Done | Self::Closed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    pub project_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub status: TaskStatus,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub archived: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Nullable column into a non-optional field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub type TaskList = Vec<Task>;
pub type ProjectList = Vec<Project>;

/// Filters for [`Transport::list_tasks`](crate::Transport::list_tasks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub project_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub include_closed: bool,
}

impl TaskQuery {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }
}

/// Partial update for a task. Only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn task_tolerates_missing_and_extra_fields() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "t-1",
            "title": "Ship it",
            "status": "in_progress",
            "some_new_column": 42
        }))
        .unwrap();

        assert_eq!(task.id, "t-1");
        assert_eq!(task.title, "Ship it");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.project_id.is_none());
    }

    #[test]
    fn null_columns_fall_back_to_defaults() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "t-3",
            "title": null,
            "status": null,
            "priority": null
        }))
        .unwrap();
        assert_eq!(task.title, "");
        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.priority.is_none());

        let project: Project = serde_json::from_value(serde_json::json!({
            "id": "p-1",
            "name": null,
            "archived": null
        }))
        .unwrap();
        assert_eq!(project.id, "p-1");
        assert_eq!(project.name, "");
        assert!(!project.archived);
    }

    #[test]
    fn unknown_status_maps_to_unknown() {
        let task: Task =
            serde_json::from_value(serde_json::json!({ "id": "t-2", "status": "triage" })).unwrap();
        assert_eq!(task.status, TaskStatus::Unknown);
    }

    #[test]
    fn status_parses_from_cli_strings() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("DONE".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert!(TaskStatus::Closed.is_closed());
        assert!(!TaskStatus::Blocked.is_closed());
    }

    #[test]
    fn task_update_serializes_only_set_fields() {
        let update = TaskUpdate {
            status: Some(TaskStatus::Done),
            ..TaskUpdate::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "status": "done" })
        );
        assert!(TaskUpdate::default().is_empty());
        assert!(!update.is_empty());
    }
}
