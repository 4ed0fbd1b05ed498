use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{
    chunk::join_lines,
    config::ENV_NAMESPACE,
    layout::{input_file_name, input_key, output_prefix, BLOB_SUFFIX, INPUT_ROOT},
    task::UNLIMITED_RETRIES,
    AccessPermission, BlobStore, HttpBlobStore, ResourceFile, StorageConfig, TaskResult,
    TaskSpec, TaskState,
};
use reqwest::Client;
use std::{
    collections::{BTreeMap, HashMap},
    env,
    io::{self, BufRead, Write},
    time::Duration,
};

use crate::batch::BatchClient;

const DEFAULT_TIMEOUT_MINS: u64 = 30;
const INPUT_ACCESS_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Coordinador: sube inputs, crea el job y espera a los workers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flujo completo: submit + wait + cleanup
    Run {
        #[arg(long, default_value_t = 10)]
        files: usize,
        #[arg(long, default_value_t = 1000)]
        lines: usize,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_MINS)]
        timeout_mins: u64,
        /// Borrar job y namespace sin preguntar
        #[arg(long)]
        yes: bool,
    },
    /// Sube los inputs y crea el job con una tarea por input
    Submit {
        #[arg(long, default_value_t = 10)]
        files: usize,
        #[arg(long, default_value_t = 1000)]
        lines: usize,
    },
    /// Espera a que terminen todas las tareas de una ejecución
    Wait {
        #[arg(value_name = "EXEC_ID")]
        id: String,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_MINS)]
        timeout_mins: u64,
    },
    /// Estado del job y de sus tareas
    Status {
        #[arg(value_name = "EXEC_ID")]
        id: String,
    },
    /// Cantidad de marcadores de salida por input
    Results {
        #[arg(value_name = "EXEC_ID")]
        id: String,
    },
    Workers,
    /// Borra el job y el namespace de una ejecución
    Cleanup {
        #[arg(value_name = "EXEC_ID")]
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

/// Contenido de un input generado: líneas `1..=lines`.
pub fn generate_input_content(lines: usize) -> String {
    join_lines((1..=lines).map(|i| i.to_string()))
}

fn wait_timeout(timeout_mins: u64) -> Duration {
    Duration::from_secs(timeout_mins.saturating_mul(60))
}

struct Coordinator {
    client: Client,
    base_url: String,
    batch: BatchClient,
}

impl Coordinator {
    fn new(base_url: String) -> Self {
        let client = Client::new();
        let batch = BatchClient::new(client.clone(), base_url.clone());
        Self {
            client,
            base_url,
            batch,
        }
    }

    fn store(&self, execution_id: &str) -> HttpBlobStore {
        HttpBlobStore::with_client(
            self.client.clone(),
            StorageConfig::new(self.base_url.clone(), execution_id),
        )
    }

    async fn submit(&self, files: usize, lines: usize) -> Result<String> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let input_names: Vec<String> = (0..files)
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();

        println!("ExecutionId: {}", execution_id);
        println!("Archivos a procesar: {}", input_names.len());

        // create_namespace
        let store = self.store(&execution_id);
        store.ensure_exists().await?;

        // put_blob por cada input
        let content = generate_input_content(lines);
        for name in &input_names {
            let key = input_key(name);
            store.put_blob(&key, &content).await?;
            println!("Subido: {}", key);
        }

        // create_job + add_tasks
        self.batch.create_job(&execution_id).await?;

        let mut tasks = Vec::with_capacity(input_names.len());
        for name in &input_names {
            let url = store
                .get_blob_url_with_temporary_access(
                    &input_key(name),
                    &[AccessPermission::Read],
                    INPUT_ACCESS_EXPIRY,
                )
                .await?;

            tasks.push(TaskSpec {
                id: name.clone(),
                input_file: input_file_name(name),
                environment: HashMap::from([(ENV_NAMESPACE.to_string(), execution_id.clone())]),
                resource_files: vec![ResourceFile {
                    url,
                    file_path: input_file_name(name),
                }],
                max_task_retries: UNLIMITED_RETRIES,
            });
        }

        let added = self.batch.add_tasks(&execution_id, &tasks).await?;
        println!("Job y {} tareas creados.", added);

        Ok(execution_id)
    }

    async fn wait(&self, execution_id: &str, timeout_mins: u64) -> Result<()> {
        println!("Esperando a que terminen las tareas...");
        let tasks = self
            .batch
            .wait_for_all_tasks(
                execution_id,
                TaskState::Completed,
                wait_timeout(timeout_mins),
            )
            .await?;

        let failed = tasks
            .iter()
            .filter(|t| t.result == Some(TaskResult::Failure))
            .count();
        println!("Tareas completadas: {} (fallidas: {})", tasks.len(), failed);
        Ok(())
    }

    async fn status(&self, execution_id: &str) -> Result<()> {
        let Some(job) = self.batch.get_job(execution_id).await? else {
            println!("No se encontró el job {}", execution_id);
            return Ok(());
        };

        println!("Job:");
        println!("  id: {}", job.id);
        println!("  estado: {:?}", job.status);
        println!(
            "  tareas: total={}, completadas={}, fallidas={}, reintentos={}",
            job.total_tasks, job.completed_tasks, job.failed_tasks, job.retries
        );

        // progreso calculado localmente
        let done = job.completed_tasks + job.failed_tasks;
        if job.total_tasks > 0 {
            let pct = (done as f64 / job.total_tasks as f64) * 100.0;
            println!("  progreso: {:.1}%", pct);
        } else {
            println!("  progreso: (sin tareas)");
        }
        println!("  creado: {}", job.created_at);
        if let Some(ref finished) = job.finished_at {
            println!("  finalizado: {}", finished);
        }

        for t in self.batch.list_tasks(execution_id).await? {
            println!(
                "  - {} {:?} attempt={} {}",
                t.id,
                t.state,
                t.attempt,
                t.failure.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }

    async fn results(&self, execution_id: &str) -> Result<()> {
        let store = self.store(execution_id);
        let input_prefix = format!("{}/", INPUT_ROOT);
        let inputs = store.list_blobs(&input_prefix).await?;

        if inputs.is_empty() {
            println!("(sin inputs en {})", execution_id);
            return Ok(());
        }

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for key in inputs {
            let Some(name) = key
                .strip_prefix(&input_prefix)
                .and_then(|k| k.strip_suffix(BLOB_SUFFIX))
            else {
                continue;
            };
            let name = name.to_string();
            let markers = store.list_blobs(&output_prefix(&name)).await?;
            counts.insert(name, markers.len());
        }

        println!("Resultados para {}:", execution_id);
        for (name, n) in counts {
            println!("  {}: {} chunks procesados", name, n);
        }
        Ok(())
    }

    async fn workers(&self) -> Result<()> {
        let workers = self.batch.list_workers().await?;
        if workers.is_empty() {
            println!("No hay workers registrados.");
            return Ok(());
        }

        for w in workers {
            println!("Worker {}", w.worker_id);
            println!("  host           : {}", w.hostname);
            println!("  dead           : {}", w.dead);
            println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
            println!(
                "  concurrency    : max={} activas={}",
                w.max_concurrency, w.active_tasks
            );
            println!(
                "  tareas         : started={}, ok={}, failed={}",
                w.tasks_started, w.tasks_succeeded, w.tasks_failed
            );
            match w.avg_task_ms {
                Some(avg) => println!("  avg_task_ms    : {:.1}", avg),
                None => println!("  avg_task_ms    : (sin datos)"),
            }
            match w.cpu_percent {
                Some(cpu) => println!("  cpu_percent    : {:.1}%", cpu),
                None => println!("  cpu_percent    : (sin datos)"),
            }
            match w.mem_bytes {
                Some(mem) => println!("  mem_bytes      : {}", mem),
                None => println!("  mem_bytes      : (sin datos)"),
            }
            println!();
        }
        Ok(())
    }

    async fn cleanup(&self, execution_id: &str, yes: bool) -> Result<()> {
        if !yes && !confirm("Delete job and namespace? [Y/n]")? {
            println!("Se dejan los recursos de {}", execution_id);
            return Ok(());
        }

        println!("Limpiando recursos...");
        if !self.batch.delete_job(execution_id).await? {
            println!("  (el job {} ya no existía)", execution_id);
        }
        if !self.store(execution_id).delete().await? {
            println!("  (el namespace {} ya no existía)", execution_id);
        }
        Ok(())
    }
}

/// Cualquier respuesta que no sea "n" cuenta como sí.
fn confirm(question: &str) -> Result<bool> {
    println!("{}", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("leyendo respuesta")?;
    Ok(!answer.trim().eq_ignore_ascii_case("n"))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let coordinator = Coordinator::new(master_base_url());

    match cli.command {
        Commands::Run {
            files,
            lines,
            timeout_mins,
            yes,
        } => {
            println!("Starting");
            let execution_id = coordinator.submit(files, lines).await?;
            coordinator.wait(&execution_id, timeout_mins).await?;
            coordinator.cleanup(&execution_id, yes).await?;
            println!("Finished");
        }
        Commands::Submit { files, lines } => {
            let execution_id = coordinator.submit(files, lines).await?;
            println!("{}", execution_id);
        }
        Commands::Wait { id, timeout_mins } => coordinator.wait(&id, timeout_mins).await?,
        Commands::Status { id } => coordinator.status(&id).await?,
        Commands::Results { id } => coordinator.results(&id).await?,
        Commands::Workers => coordinator.workers().await?,
        Commands::Cleanup { id, yes } => coordinator.cleanup(&id, yes).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::split_into_chunks;

    #[test]
    fn input_generado_tiene_una_linea_por_numero() {
        let content = generate_input_content(1000);
        let chunks = split_into_chunks(&content);

        assert_eq!(chunks.len(), 1000);
        assert_eq!(chunks[0].content, "1");
        assert_eq!(chunks[999].content, "1000");
    }

    #[test]
    fn timeout_enorme_no_desborda() {
        assert_eq!(wait_timeout(30), Duration::from_secs(1800));
        assert_eq!(wait_timeout(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn input_generado_con_una_linea() {
        assert_eq!(generate_input_content(1), "1");
    }
}
