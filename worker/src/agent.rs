use anyhow::{bail, Context, Result};
use common::{
    config::ENV_NAMESPACE, run_invocation, HttpBlobStore, InvocationSummary, ResourceFile, Task,
    TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest, WorkerHeartbeatRequest,
    WorkerRegisterRequest, WorkerRegisterResponse, WorkerSettings,
};
use reqwest::{Client, StatusCode};
use std::{
    env,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, warn};

const DEFAULT_WORKER_CONCURRENCY: u32 = 2;
const DEFAULT_WORK_DIR: &str = "work";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub struct AgentConfig {
    pub max_concurrency: u32,
    pub work_root: PathBuf,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let max_concurrency = match env::var("WORKER_CONCURRENCY") {
            Ok(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("WORKER_CONCURRENCY inválido: {v}"))?,
            Err(_) => DEFAULT_WORKER_CONCURRENCY,
        };

        let work_root = env::var("WORKER_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORK_DIR));

        Ok(Self {
            max_concurrency,
            work_root,
        })
    }
}

async fn register(client: &Client, base_url: &str, max_concurrency: u32) -> Result<String> {
    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let register_url = format!("{}/api/v1/workers/register", base_url);
    let res = client
        .post(&register_url)
        .json(&WorkerRegisterRequest {
            hostname,
            max_concurrency,
        })
        .send()
        .await?
        .error_for_status()?;
    let WorkerRegisterResponse { worker_id } = res.json().await?;
    Ok(worker_id)
}

/// Loop principal del nodo.
/// - Se registra en el master.
/// - Hace heartbeats periódicos con CPU/MEM.
/// - Pide tareas mientras tenga "slots" libres.
/// - Ejecuta cada tarea en paralelo (hasta WORKER_CONCURRENCY), una
///   invocación por tarea.
pub async fn run(settings: WorkerSettings, config: AgentConfig) -> Result<()> {
    let base_url = settings.storage.master_url.clone();
    let client = Client::new();
    let settings = Arc::new(settings);
    let work_root = Arc::new(config.work_root);

    let mut worker_id = register(&client, &base_url, config.max_concurrency).await?;
    info!(
        "worker {} registrado con concurrency={} contra {}",
        worker_id, config.max_concurrency, base_url
    );

    let sem = Arc::new(Semaphore::new(config.max_concurrency as usize));

    // System para leer CPU y memoria
    let mut sys = System::new_all();
    let mut last_heartbeat: Option<Instant> = None;

    loop {
        // --------- Heartbeat al master con CPU/MEM ---------
        if last_heartbeat.map_or(true, |t| t.elapsed() >= HEARTBEAT_INTERVAL) {
            sys.refresh_cpu();
            sys.refresh_memory();

            let hb_url = format!("{}/api/v1/workers/heartbeat", base_url);
            let hb = client
                .post(&hb_url)
                .json(&WorkerHeartbeatRequest {
                    worker_id: worker_id.clone(),
                    cpu_percent: Some(sys.global_cpu_info().cpu_usage()),
                    mem_bytes: Some(sys.used_memory()),
                })
                .send()
                .await;
            if let Err(e) = hb {
                warn!("heartbeat falló: {}", e);
            }
            last_heartbeat = Some(Instant::now());
        }

        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                // No hay capacidad para nuevas tareas; esperamos un poco
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        // Pedimos tarea al master
        let assign_url = format!("{}/api/v1/tasks/next", base_url);
        let res = match client
            .post(&assign_url)
            .json(&TaskAssignmentRequest {
                worker_id: worker_id.clone(),
            })
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!("no se pudo pedir tarea: {}", e);
                drop(permit);
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        // El master no nos conoce (reinicio o nos dio por muertos)
        if res.status() == StatusCode::NOT_FOUND {
            drop(permit);
            worker_id = register(&client, &base_url, config.max_concurrency).await?;
            info!("worker re-registrado con id {}", worker_id);
            last_heartbeat = None;
            continue;
        }

        let assignment: TaskAssignmentResponse = res.error_for_status()?.json().await?;

        let Some(task) = assignment.task else {
            // No hay tarea: devolvemos el permiso y dormimos
            drop(permit);
            sleep(Duration::from_secs(2)).await;
            continue;
        };

        info!(
            "tengo tarea {} del job {} (attempt={})",
            task.id, task.job_id, task.attempt
        );

        // Clonar lo que usamos en la tarea asíncrona
        let client_cloned = client.clone();
        let base_url_cloned = base_url.clone();
        let settings = settings.clone();
        let work_root = work_root.clone();

        tokio::spawn(async move {
            let outcome = execute_task(&client_cloned, &settings, &work_root, &task).await;

            let (success, failure) = match outcome {
                Ok(summary) => {
                    info!(
                        "terminé tarea {}: {}/{} chunks hechos ({} en esta corrida)",
                        task.id,
                        summary.already_done + summary.dispatched,
                        summary.total_chunks,
                        summary.dispatched
                    );
                    (true, None)
                }
                Err(e) => {
                    warn!("error procesando tarea {}: {:#}", task.id, e);
                    (false, Some(format!("{e:#}")))
                }
            };

            // Reportar al master que terminamos
            let complete_url = format!("{}/api/v1/tasks/complete", base_url_cloned);
            let report = client_cloned
                .post(&complete_url)
                .json(&TaskCompleteRequest {
                    job_id: task.job_id.clone(),
                    task_id: task.id.clone(),
                    success,
                    failure,
                })
                .send()
                .await;
            if let Err(e) = report {
                warn!("no se pudo reportar la tarea {}: {}", task.id, e);
            }

            // Liberar el "slot" de concurrencia al terminar
            drop(permit);
        });
    }
}

/// Prepara el directorio de la tarea, baja sus archivos y corre una
/// invocación del worker sobre el input.
async fn execute_task(
    client: &Client,
    settings: &WorkerSettings,
    work_root: &Path,
    task: &Task,
) -> Result<InvocationSummary> {
    let task_dir = work_root.join(&task.job_id).join(&task.id);
    tokio::fs::create_dir_all(&task_dir)
        .await
        .with_context(|| format!("creando {}", task_dir.display()))?;

    for rf in &task.spec.resource_files {
        download_resource_file(client, &task_dir, rf).await?;
    }

    // El entorno de la tarea manda sobre el del nodo
    let mut task_settings = settings.clone();
    if let Some(ns) = task.spec.environment.get(ENV_NAMESPACE) {
        task_settings = task_settings.with_namespace(ns.clone());
    }

    let mut processor = task_settings.processor;
    processor.local_output_dir = processor.local_output_dir.map(|dir| task_dir.join(dir));

    let store = Arc::new(HttpBlobStore::with_client(client.clone(), task_settings.storage));

    let input_path = task_dir.join(relative_path(&task.spec.input_file)?);
    let summary = run_invocation(store, &processor, &input_path).await?;
    Ok(summary)
}

async fn download_resource_file(client: &Client, task_dir: &Path, rf: &ResourceFile) -> Result<()> {
    let dest = task_dir.join(relative_path(&rf.file_path)?);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body = client
        .get(&rf.url)
        .send()
        .await?
        .error_for_status()
        .with_context(|| format!("bajando {}", rf.file_path))?
        .bytes()
        .await?;

    tokio::fs::write(&dest, &body)
        .await
        .with_context(|| format!("escribiendo {}", dest.display()))?;
    Ok(())
}

/// Sólo rutas relativas sin `..`: todo queda dentro del directorio de la tarea.
fn relative_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if raw.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("ruta de archivo inválida para la tarea: {raw}");
    }
    Ok(path.to_path_buf())
}
