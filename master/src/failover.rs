use std::time::{Duration, SystemTime};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::scheduling;
use crate::state::{lock, AppState, InFlight};
use crate::{FAILOVER_SWEEP_INTERVAL_SECS, WORKER_HEARTBEAT_TIMEOUT_SECS};

/// Loop principal de tolerancia a fallos:
/// - detecta workers muertos (sin heartbeat)
/// - devuelve sus tareas al scheduler como fallidas
pub async fn run_failover_loop(state: AppState) {
    loop {
        sleep(Duration::from_secs(FAILOVER_SWEEP_INTERVAL_SECS)).await;

        let requeued = sweep_once(&state, SystemTime::now());
        if requeued > 0 {
            info!("failover: {} tareas devueltas al scheduler", requeued);
        }
    }
}

/// Una pasada de chequeo:
/// 1. marca workers muertos
/// 2. saca de in_flight las tareas de esos workers
/// 3. las pasa por el mismo camino que un fallo reportado
///
/// Devuelve cuántas tareas se sacaron de in_flight.
pub fn sweep_once(state: &AppState, now: SystemTime) -> usize {
    let timeout = Duration::from_secs(WORKER_HEARTBEAT_TIMEOUT_SECS);

    // 1) Detectar qué workers están muertos
    let mut newly_dead_workers: Vec<String> = Vec::new();
    {
        let mut workers = lock(&state.workers);

        for (worker_id, meta) in workers.iter_mut() {
            if meta.dead {
                continue;
            }

            // last_heartbeat en el futuro? raro, lo ignoramos.
            if let Ok(elapsed) = now.duration_since(meta.last_heartbeat) {
                if elapsed > timeout {
                    meta.dead = true;
                    newly_dead_workers.push(worker_id.clone());
                    warn!(
                        "marcando worker {} como DEAD (sin heartbeat hace {:?})",
                        worker_id, elapsed
                    );
                }
            }
        }
    }

    if newly_dead_workers.is_empty() {
        // nada que hacer esta pasada
        return 0;
    }

    // 2) Sacar tareas de in_flight que pertenecían a esos workers
    let orphaned: Vec<InFlight> = {
        let mut in_flight = lock(&state.in_flight);
        let keys: Vec<String> = in_flight
            .iter()
            .filter(|(_, f)| newly_dead_workers.contains(&f.worker_id))
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter().filter_map(|k| in_flight.remove(k)).collect()
    };

    // 3) Reintentar o cerrar cada tarea según su política
    let count = orphaned.len();
    for inflight in orphaned {
        let reason = format!("worker {} dejó de responder", inflight.worker_id);
        scheduling::fail_task(state, inflight.task, reason);
    }

    count
}
