//! Cliente del scheduler del master (jobs, tareas, workers).

use anyhow::{bail, Context, Result};
use common::{
    AddTasksResponse, JobInfo, JobRequest, OnAllTasksComplete, TaskInfo, TaskSpec, TaskState,
    WorkerMetrics,
};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct BatchClient {
    client: Client,
    base_url: String,
}

impl BatchClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    pub async fn create_job(&self, id: &str) -> Result<JobInfo> {
        let resp = self
            .client
            .post(self.url("jobs"))
            .json(&JobRequest {
                id: id.to_string(),
                on_all_tasks_complete: OnAllTasksComplete::TerminateJob,
            })
            .send()
            .await?;

        if resp.status() == StatusCode::CONFLICT {
            bail!("ya existe un job con id {id}");
        }
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobInfo>> {
        let resp = self.client.get(self.url(&format!("jobs/{id}"))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }

    pub async fn add_tasks(&self, job_id: &str, tasks: &[TaskSpec]) -> Result<usize> {
        let resp = self
            .client
            .post(self.url(&format!("jobs/{job_id}/tasks")))
            .json(tasks)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("agregando tareas al job {job_id}"))?;
        let body: AddTasksResponse = resp.json().await?;
        Ok(body.added)
    }

    pub async fn list_tasks(&self, job_id: &str) -> Result<Vec<TaskInfo>> {
        let resp = self
            .client
            .get(self.url(&format!("jobs/{job_id}/tasks")))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Espera hasta que todas las tareas del job estén en `terminal_state`.
    /// Falla si se pasa el `timeout`.
    pub async fn wait_for_all_tasks(
        &self,
        job_id: &str,
        terminal_state: TaskState,
        timeout: Duration,
    ) -> Result<Vec<TaskInfo>> {
        let started = Instant::now();

        loop {
            let tasks = self.list_tasks(job_id).await?;
            let pending = tasks.iter().filter(|t| t.state != terminal_state).count();
            debug!("job {}: {}/{} tareas pendientes", job_id, pending, tasks.len());

            if pending == 0 {
                return Ok(tasks);
            }
            if started.elapsed() >= timeout {
                bail!(
                    "timeout de {:?} esperando el job {} ({} tareas sin terminar)",
                    timeout,
                    job_id,
                    pending
                );
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Devuelve `false` si el job no existía.
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(self.url(&format!("jobs/{id}")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        resp.error_for_status()?;
        Ok(true)
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerMetrics>> {
        let resp = self
            .client
            .get(self.url("workers"))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}
