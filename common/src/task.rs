use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::JobId;

pub type TaskId = String;

/// Reintentos ilimitados.
pub const UNLIMITED_RETRIES: i32 = -1;

/// Archivo que el nodo descarga antes de correr la tarea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFile {
    /// URL (normalmente firmada con `?sig=`) de donde bajarlo
    pub url: String,
    /// Ruta relativa dentro del directorio de la tarea
    pub file_path: String,
}

/// Lo que envía el coordinador para crear una tarea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Argumento posicional del worker: el archivo de entrada local
    pub input_file: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub resource_files: Vec<ResourceFile>,
    /// `-1` = sin límite
    #[serde(default)]
    pub max_task_retries: i32,
}

/// Tarea tal como se le entrega a un worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub attempt: u32,
    pub spec: TaskSpec,
}

impl Task {
    /// Clave única de la tarea en todo el master.
    pub fn key(&self) -> String {
        task_key(&self.job_id, &self.id)
    }

    /// Decide si un fallo en el intento actual admite otro intento.
    pub fn can_retry(&self) -> bool {
        let max = self.spec.max_task_retries;
        max == UNLIMITED_RETRIES || (max > 0 && self.attempt < max as u32)
    }
}

pub fn task_key(job_id: &str, task_id: &str) -> String {
    format!("{}/{}", job_id, task_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Active,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub job_id: JobId,
    pub state: TaskState,
    pub attempt: u32,
    pub result: Option<TaskResult>,
    /// Último error reportado por un worker
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTasksResponse {
    pub added: usize,
}
