use std::fmt;
use std::time::Instant;

use folio_model::InvoiceId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who asked for the render.
///
/// Admission is strictly first-come first-served; priority is carried for
/// logging and auditing only.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    #[default]
    Normal,
    Admin,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Normal => "normal",
            JobPriority::Admin => "admin",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a render job inside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut
        )
    }
}

/// One request for generation work. Lives only for the duration of a
/// single [`super::RenderQueue::submit`] call.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: Uuid,
    pub document_id: InvoiceId,
    pub force_regenerate: bool,
    pub priority: JobPriority,
    pub submitted_at: Instant,
}

impl RenderJob {
    pub fn new(document_id: InvoiceId, force_regenerate: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            document_id,
            force_regenerate,
            priority: JobPriority::default(),
            submitted_at: Instant::now(),
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}
