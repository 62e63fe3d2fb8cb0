//! Job lifecycle event payloads.

use serde::{Deserialize, Serialize};

use crate::job::{ContentType, Job, JobStatus};

/// Compact job view carried by `created` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub task: String,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            title: job.title.clone(),
            content_type: job.content_type,
            status: job.status,
            progress: job.progress,
            task: job.task.clone(),
        }
    }
}

/// Event published for every job creation and every accepted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// A job was created.
    #[serde(rename = "new")]
    Created { download: JobSnapshot },

    /// A job record changed.
    #[serde(rename = "update")]
    Updated {
        id: String,
        status: JobStatus,
        progress: Option<u8>,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl JobEvent {
    pub fn created(job: &Job) -> Self {
        JobEvent::Created {
            download: JobSnapshot::from(job),
        }
    }

    pub fn updated(job: &Job) -> Self {
        JobEvent::Updated {
            id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            task: job.task.clone(),
            error: job.error.clone(),
        }
    }

    /// ID of the job the event refers to.
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Created { download } => &download.id,
            JobEvent::Updated { id, .. } => id,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Created { .. } => "new",
            JobEvent::Updated { .. } => "update",
        }
    }
}
