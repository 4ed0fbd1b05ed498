//! Transiciones de tareas compartidas por los handlers y el failover.

use chrono::Utc;
use common::{JobStatus, OnAllTasksComplete, Task, TaskResult, TaskState};
use tracing::{info, warn};

use crate::state::{lock, AppState};

/// La tarea terminó bien en un worker.
pub fn complete_success(state: &AppState, task: &Task) {
    {
        let mut tasks = lock(&state.tasks);
        if let Some(info) = tasks.get_mut(&task.key()) {
            info.state = TaskState::Completed;
            info.result = Some(TaskResult::Success);
            info.attempt = task.attempt;
        }
    }
    {
        let mut jobs = lock(&state.jobs);
        if let Some(job) = jobs.get_mut(&task.job_id) {
            job.completed_tasks += 1;
        }
    }
    finish_job_if_done(state, &task.job_id);
}

/// La tarea falló (error reportado o worker caído). Se reencola si la
/// política de reintentos lo permite; si no, queda completada con fallo.
/// Devuelve `true` si se reencoló.
pub fn fail_task(state: &AppState, mut task: Task, reason: String) -> bool {
    if task.can_retry() {
        task.attempt += 1;
        info!(
            "reencolando tarea {} del job {} (attempt={}): {}",
            task.id, task.job_id, task.attempt, reason
        );

        {
            let mut tasks = lock(&state.tasks);
            if let Some(info) = tasks.get_mut(&task.key()) {
                info.state = TaskState::Active;
                info.attempt = task.attempt;
                info.failure = Some(reason);
            }
        }
        {
            let mut jobs = lock(&state.jobs);
            if let Some(job) = jobs.get_mut(&task.job_id) {
                job.retries += 1;
            }
        }

        lock(&state.tasks_queue).push_back(task);
        return true;
    }

    warn!(
        "tarea {} del job {} agotó sus reintentos (max={}): {}",
        task.id, task.job_id, task.spec.max_task_retries, reason
    );

    {
        let mut tasks = lock(&state.tasks);
        if let Some(info) = tasks.get_mut(&task.key()) {
            info.state = TaskState::Completed;
            info.result = Some(TaskResult::Failure);
            info.failure = Some(reason);
        }
    }
    {
        let mut jobs = lock(&state.jobs);
        if let Some(job) = jobs.get_mut(&task.job_id) {
            job.failed_tasks += 1;
        }
    }
    finish_job_if_done(state, &task.job_id);
    false
}

/// Cierra el job si todas sus tareas están completadas y la política lo pide.
pub fn finish_job_if_done(state: &AppState, job_id: &str) {
    let all_completed = {
        let tasks = lock(&state.tasks);
        let mut of_job = tasks.values().filter(|t| t.job_id == job_id).peekable();
        of_job.peek().is_some() && of_job.all(|t| t.state == TaskState::Completed)
    };

    if !all_completed {
        return;
    }

    let mut jobs = lock(&state.jobs);
    if let Some(job) = jobs.get_mut(job_id) {
        if job.on_all_tasks_complete == OnAllTasksComplete::TerminateJob
            && job.status == JobStatus::Active
        {
            job.status = JobStatus::Completed;
            job.finished_at = Some(Utc::now());
            info!(
                "job {} completado (ok={}, fallidas={}, reintentos={})",
                job_id, job.completed_tasks, job.failed_tasks, job.retries
            );
        }
    }
}
