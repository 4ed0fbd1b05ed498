use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use common::{
    task::task_key, AccessGrant, AccessPermission, AccessRequest, AddTasksResponse, BlobPage,
    BlobStore, JobInfo, JobRequest, JobStatus, ListBlobsQuery, MemoryBlobStore,
    NamespaceCreated, SigQuery, StorageError, Task, TaskAssignmentRequest,
    TaskAssignmentResponse, TaskCompleteRequest, TaskCompleteResponse, TaskInfo, TaskSpec,
    TaskState, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerMetrics,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::scheduling;
use crate::state::{lock, AppState, Grant, InFlight, WorkerMeta};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // servicio de blobs
        .route(
            "/api/v1/namespaces/:ns",
            put(create_namespace).delete(delete_namespace),
        )
        .route("/api/v1/namespaces/:ns/access", post(grant_access))
        .route("/api/v1/namespaces/:ns/blobs", get(list_blobs))
        .route(
            "/api/v1/namespaces/:ns/blobs/*key",
            put(put_blob).get(get_blob),
        )
        // scheduler
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/jobs/:id", get(get_job).delete(delete_job))
        .route("/api/v1/jobs/:id/tasks", post(add_tasks).get(list_tasks))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/next", post(assign_task))
        .route("/api/v1/tasks/complete", post(complete_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

fn storage_status(e: StorageError) -> StatusCode {
    match e {
        StorageError::NamespaceNotFound { .. } | StorageError::BlobNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        StorageError::Forbidden { .. } => StatusCode::FORBIDDEN,
        StorageError::Transport(_) | StorageError::Status { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn namespace_or_404(state: &AppState, ns: &str) -> Result<Arc<MemoryBlobStore>, StatusCode> {
    state.namespace(ns).ok_or(StatusCode::NOT_FOUND)
}

/// Sin `sig` se confía en el llamador. Con `sig`, el token tiene que existir,
/// no estar vencido, ser de este namespace y tener el permiso pedido.
fn authorize(
    state: &AppState,
    ns: &str,
    sig: Option<&str>,
    needed: AccessPermission,
) -> Result<(), StatusCode> {
    let Some(token) = sig else {
        return Ok(());
    };

    let grants = lock(&state.grants);
    let grant = grants.get(token).ok_or(StatusCode::FORBIDDEN)?;

    if grant.namespace != ns || grant.expires_at <= Utc::now() {
        return Err(StatusCode::FORBIDDEN);
    }
    if !grant.permissions.contains(&needed) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

// Crea el namespace si no existe
async fn create_namespace(
    State(state): State<AppState>,
    Path(ns): Path<String>,
) -> (StatusCode, Json<NamespaceCreated>) {
    let mut namespaces = lock(&state.namespaces);
    if namespaces.contains_key(&ns) {
        return (StatusCode::OK, Json(NamespaceCreated { created: false }));
    }

    namespaces.insert(
        ns.clone(),
        Arc::new(MemoryBlobStore::new(ns.clone()).with_page_size(state.list_page_size)),
    );
    info!("namespace {} creado", ns);
    (StatusCode::CREATED, Json(NamespaceCreated { created: true }))
}

async fn delete_namespace(State(state): State<AppState>, Path(ns): Path<String>) -> StatusCode {
    let removed = lock(&state.namespaces).remove(&ns);
    if removed.is_none() {
        return StatusCode::NOT_FOUND;
    }

    // los tokens de ese namespace ya no sirven
    lock(&state.grants).retain(|_, g| g.namespace != ns);
    info!("namespace {} borrado", ns);
    StatusCode::NO_CONTENT
}

async fn grant_access(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(req): Json<AccessRequest>,
) -> Result<Json<AccessGrant>, StatusCode> {
    namespace_or_404(&state, &ns)?;

    let secs = i64::try_from(req.expires_in_secs).map_err(|_| StatusCode::BAD_REQUEST)?;
    let ttl = chrono::Duration::try_seconds(secs).ok_or(StatusCode::BAD_REQUEST)?;
    let expires_at = Utc::now() + ttl;
    let token = uuid::Uuid::new_v4().simple().to_string();

    lock(&state.grants).insert(
        token.clone(),
        Grant {
            namespace: ns.clone(),
            permissions: req.permissions.iter().copied().collect(),
            expires_at,
        },
    );

    debug!("token temporal para {} hasta {}", ns, expires_at);
    Ok(Json(AccessGrant { token, expires_at }))
}

async fn list_blobs(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Query(q): Query<ListBlobsQuery>,
) -> Result<Json<BlobPage>, StatusCode> {
    authorize(&state, &ns, q.sig.as_deref(), AccessPermission::List)?;
    let store = namespace_or_404(&state, &ns)?;

    let limit = q.max_results.unwrap_or(state.list_page_size).max(1);
    let page = store
        .page(&q.prefix, q.marker.as_deref(), limit)
        .map_err(storage_status)?;
    Ok(Json(page))
}

async fn put_blob(
    State(state): State<AppState>,
    Path((ns, key)): Path<(String, String)>,
    Query(q): Query<SigQuery>,
    body: String,
) -> Result<StatusCode, StatusCode> {
    authorize(&state, &ns, q.sig.as_deref(), AccessPermission::Write)?;
    let store = namespace_or_404(&state, &ns)?;

    store.put_blob(&key, &body).await.map_err(storage_status)?;
    debug!("blob {}/{} escrito ({} bytes)", ns, key, body.len());
    Ok(StatusCode::CREATED)
}

async fn get_blob(
    State(state): State<AppState>,
    Path((ns, key)): Path<(String, String)>,
    Query(q): Query<SigQuery>,
) -> Result<String, StatusCode> {
    authorize(&state, &ns, q.sig.as_deref(), AccessPermission::Read)?;
    let store = namespace_or_404(&state, &ns)?;

    store.get_blob(&key).await.map_err(storage_status)
}

// Crea un job vacío; las tareas se agregan después
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobInfo>, StatusCode> {
    let mut jobs = lock(&state.jobs);
    if jobs.contains_key(&req.id) {
        return Err(StatusCode::CONFLICT);
    }

    let job_info = JobInfo {
        id: req.id.clone(),
        status: JobStatus::Active,
        on_all_tasks_complete: req.on_all_tasks_complete,
        created_at: Utc::now(),
        finished_at: None,
        total_tasks: 0,
        completed_tasks: 0,
        failed_tasks: 0,
        retries: 0,
    };
    jobs.insert(req.id.clone(), job_info.clone());

    info!("job {} creado", req.id);
    Ok(Json(job_info))
}

// Devuelve info básica de un job
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, StatusCode> {
    let jobs = lock(&state.jobs);

    if let Some(job) = jobs.get(&id) {
        Ok(Json(job.clone()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Borra el job y todo lo que quede de sus tareas
async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if lock(&state.jobs).remove(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }

    lock(&state.tasks).retain(|_, t| t.job_id != id);
    lock(&state.tasks_queue).retain(|t| t.job_id != id);
    lock(&state.in_flight).retain(|_, f| f.task.job_id != id);

    info!("job {} borrado", id);
    StatusCode::NO_CONTENT
}

async fn add_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(specs): Json<Vec<TaskSpec>>,
) -> Result<Json<AddTasksResponse>, StatusCode> {
    {
        let jobs = lock(&state.jobs);
        let job = jobs.get(&id).ok_or(StatusCode::NOT_FOUND)?;
        if job.status != JobStatus::Active {
            return Err(StatusCode::CONFLICT);
        }
    }

    // ids únicos dentro del lote y contra lo ya existente
    let mut seen = HashSet::new();
    {
        let tasks = lock(&state.tasks);
        for spec in &specs {
            if !seen.insert(spec.id.clone()) || tasks.contains_key(&task_key(&id, &spec.id)) {
                warn!("tarea duplicada {} en job {}", spec.id, id);
                return Err(StatusCode::CONFLICT);
            }
        }
    }

    let added = specs.len();
    {
        let mut tasks = lock(&state.tasks);
        let mut queue = lock(&state.tasks_queue);
        for spec in specs {
            let task = Task {
                id: spec.id.clone(),
                job_id: id.clone(),
                attempt: 0,
                spec,
            };
            tasks.insert(
                task.key(),
                TaskInfo {
                    id: task.id.clone(),
                    job_id: id.clone(),
                    state: TaskState::Active,
                    attempt: 0,
                    result: None,
                    failure: None,
                },
            );
            queue.push_back(task);
        }
    }

    {
        let mut jobs = lock(&state.jobs);
        if let Some(job) = jobs.get_mut(&id) {
            job.total_tasks += added as u32;
        }
    }

    info!("{} tareas agregadas al job {}", added, id);
    Ok(Json(AddTasksResponse { added }))
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskInfo>>, StatusCode> {
    if !lock(&state.jobs).contains_key(&id) {
        return Err(StatusCode::NOT_FOUND);
    }

    let mut out: Vec<TaskInfo> = lock(&state.tasks)
        .values()
        .filter(|t| t.job_id == id)
        .cloned()
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(out))
}

// Registra un worker nuevo
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let worker_id = uuid::Uuid::new_v4().to_string();

    lock(&state.workers).insert(
        worker_id.clone(),
        WorkerMeta {
            hostname: req.hostname,
            last_heartbeat: SystemTime::now(),
            dead: false,
            max_concurrency: req.max_concurrency.max(1),

            tasks_started: 0,
            tasks_succeeded: 0,
            tasks_failed: 0,
            total_task_time_ms: 0,

            last_cpu_percent: None,
            last_mem_bytes: None,
        },
    );

    info!(
        "worker registrado: {} (max_concurrency={})",
        worker_id, req.max_concurrency
    );
    Json(WorkerRegisterResponse { worker_id })
}

// Heartbeat de worker
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, StatusCode> {
    let mut workers = lock(&state.workers);
    if let Some(meta) = workers.get_mut(&req.worker_id) {
        meta.last_heartbeat = SystemTime::now();
        meta.dead = false;
        meta.last_cpu_percent = req.cpu_percent;
        meta.last_mem_bytes = req.mem_bytes;
        Ok(Json(WorkerHeartbeatResponse { ok: true }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Asigna la siguiente tarea en cola (si hay)
async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Result<Json<TaskAssignmentResponse>, StatusCode> {
    // 1) Capacidad máxima de este worker (max_concurrency)
    let max_for_worker: u32 = {
        let workers = lock(&state.workers);
        match workers.get(&req.worker_id) {
            Some(meta) if !meta.dead => meta.max_concurrency,
            _ => return Err(StatusCode::NOT_FOUND),
        }
    };

    // 2) Cuántas tareas tiene ya este worker en vuelo
    let active_for_worker = lock(&state.in_flight)
        .values()
        .filter(|entry| entry.worker_id == req.worker_id)
        .count();

    // Si ya está al tope, no le damos más tareas
    if active_for_worker as u32 >= max_for_worker {
        debug!(
            "worker {} pidió tarea pero ya tiene {}/{} en vuelo",
            req.worker_id, active_for_worker, max_for_worker
        );
        return Ok(Json(TaskAssignmentResponse { task: None }));
    }

    // 3) Sacar la siguiente tarea de la cola global
    let task_opt = lock(&state.tasks_queue).pop_front();

    if let Some(ref t) = task_opt {
        info!(
            "asignando tarea {} (job={}, attempt={}) al worker {} ({}/{} en vuelo -> +1)",
            t.id, t.job_id, t.attempt, req.worker_id, active_for_worker, max_for_worker,
        );

        // 4) Registrar la tarea en in_flight con timestamp de inicio
        lock(&state.in_flight).insert(
            t.key(),
            InFlight {
                task: t.clone(),
                worker_id: req.worker_id.clone(),
                started_at: SystemTime::now(),
            },
        );

        // 5) Estado visible de la tarea
        if let Some(info) = lock(&state.tasks).get_mut(&t.key()) {
            info.state = TaskState::Running;
        }

        // 6) Métricas del worker: incrementar tareas iniciadas
        if let Some(meta) = lock(&state.workers).get_mut(&req.worker_id) {
            meta.tasks_started += 1;
        }
    }

    Ok(Json(TaskAssignmentResponse { task: task_opt }))
}

// Worker reporta que terminó una tarea
async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCompleteRequest>,
) -> Result<Json<TaskCompleteResponse>, StatusCode> {
    // Sacar la tarea de in_flight
    let inflight = lock(&state.in_flight)
        .remove(&task_key(&req.job_id, &req.task_id))
        .ok_or(StatusCode::NOT_FOUND)?;

    // ---- Métricas de worker: duración de la tarea ----
    let duration_ms: u64 = inflight
        .started_at
        .elapsed()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    if let Some(meta) = lock(&state.workers).get_mut(&inflight.worker_id) {
        meta.total_task_time_ms += duration_ms;
        if req.success {
            meta.tasks_succeeded += 1;
        } else {
            meta.tasks_failed += 1;
        }
    }

    if req.success {
        info!("tarea {} del job {} terminada", req.task_id, req.job_id);
        scheduling::complete_success(&state, &inflight.task);
    } else {
        let reason = req
            .failure
            .unwrap_or_else(|| "fallo sin detalle".to_string());
        scheduling::fail_task(&state, inflight.task, reason);
    }

    Ok(Json(TaskCompleteResponse { ok: true }))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerMetrics>> {
    let now = SystemTime::now();

    // Contar tareas activas por worker (desde in_flight)
    let mut active_by_worker: HashMap<WorkerId, u32> = HashMap::new();
    for inf in lock(&state.in_flight).values() {
        *active_by_worker.entry(inf.worker_id.clone()).or_insert(0) += 1;
    }

    let workers = lock(&state.workers);
    let mut out = Vec::new();

    for (wid, meta) in workers.iter() {
        let age_secs = now
            .duration_since(meta.last_heartbeat)
            .unwrap_or_default()
            .as_secs();

        let avg_ms = if meta.tasks_succeeded > 0 {
            Some(meta.total_task_time_ms as f64 / meta.tasks_succeeded as f64)
        } else {
            None
        };

        out.push(WorkerMetrics {
            worker_id: wid.clone(),
            hostname: meta.hostname.clone(),
            dead: meta.dead,
            max_concurrency: meta.max_concurrency,
            last_heartbeat_secs_ago: age_secs,
            active_tasks: active_by_worker.get(wid).copied().unwrap_or(0),
            tasks_started: meta.tasks_started,
            tasks_succeeded: meta.tasks_succeeded,
            tasks_failed: meta.tasks_failed,
            avg_task_ms: avg_ms,
            cpu_percent: meta.last_cpu_percent,
            mem_bytes: meta.last_mem_bytes,
        });
    }

    Json(out)
}
