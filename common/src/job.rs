use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id del job. El coordinador usa el mismo id de la ejecución.
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnAllTasksComplete {
    #[default]
    NoAction,
    /// Cerrar el job cuando todas sus tareas terminaron.
    TerminateJob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: JobId,
    #[serde(default)]
    pub on_all_tasks_complete: OnAllTasksComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub status: JobStatus,
    pub on_all_tasks_complete: OnAllTasksComplete,

    /// -------- Métricas del job --------
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub retries: u32,
}
