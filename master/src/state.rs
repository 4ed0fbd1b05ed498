// master/src/state.rs

use chrono::{DateTime, Utc};
use common::{
    AccessPermission, JobId, JobInfo, MemoryBlobStore, Task, TaskInfo, WorkerId,
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::SystemTime,
};

#[derive(Clone)]
pub struct AppState {
    // ---- servicio de blobs ----
    pub namespaces: Arc<Mutex<HashMap<String, Arc<MemoryBlobStore>>>>,
    // tokens de acceso temporal
    pub grants: Arc<Mutex<HashMap<String, Grant>>>,
    pub list_page_size: usize,

    // ---- scheduler ----
    pub jobs: Arc<Mutex<HashMap<JobId, JobInfo>>>,
    // estado visible de cada tarea, por task_key
    pub tasks: Arc<Mutex<HashMap<String, TaskInfo>>>,
    pub workers: Arc<Mutex<HashMap<WorkerId, WorkerMeta>>>,
    // tareas pendientes de asignar
    pub tasks_queue: Arc<Mutex<VecDeque<Task>>>,
    // tareas ya asignadas pero no completadas, por task_key
    pub in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl AppState {
    pub fn new(list_page_size: usize) -> Self {
        Self {
            namespaces: Arc::new(Mutex::new(HashMap::new())),
            grants: Arc::new(Mutex::new(HashMap::new())),
            list_page_size: list_page_size.max(1),

            jobs: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Mutex::new(HashMap::new())),
            tasks_queue: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<MemoryBlobStore>> {
        lock(&self.namespaces).get(name).cloned()
    }
}

/// Un mutex envenenado no invalida los datos del master; seguimos usándolos.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct Grant {
    pub namespace: String,
    pub permissions: HashSet<AccessPermission>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
    pub max_concurrency: u32,

    // Métricas
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_task_time_ms: u64,

    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub task: Task,
    pub worker_id: WorkerId,
    pub started_at: SystemTime,
}
