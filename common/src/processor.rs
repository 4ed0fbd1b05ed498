use std::{path::Path, sync::Arc};

use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{info, warn};

use crate::config::ProcessorSettings;
use crate::error::{ChunkFailure, ProcessError, StorageError};
use crate::layout::{marker_key, BLOB_SUFFIX};
use crate::reconcile::RemainingWork;
use crate::storage::BlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    pub dispatched: usize,
    pub succeeded: usize,
}

/// Procesa los chunks pendientes de un input en paralelo.
///
/// Cada chunk es una tarea tokio independiente. Se espera a todas; si alguna
/// falla se devuelve el error con la lista de fallos, pero los marcadores que
/// ya se escribieron quedan en el storage.
pub struct ChunkProcessor {
    store: Arc<dyn BlobStore>,
    input_name: String,
    settings: ProcessorSettings,
}

impl ChunkProcessor {
    pub fn new(
        store: Arc<dyn BlobStore>,
        input_name: impl Into<String>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            input_name: input_name.into(),
            settings,
        }
    }

    pub async fn process_all(&self, remaining: RemainingWork) -> Result<ProcessReport, ProcessError> {
        let dispatched = remaining.len();

        if let Some(dir) = &self.settings.local_output_dir {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("no se pudo crear {}: {}", dir.display(), e);
            }
        }

        let limiter = self
            .settings
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n)));

        let mut handles: Vec<(usize, JoinHandle<Result<(), StorageError>>)> =
            Vec::with_capacity(dispatched);

        for (index, content) in remaining {
            let store = self.store.clone();
            let input_name = self.input_name.clone();
            let settings = self.settings.clone();
            let limiter = limiter.clone();

            let handle = tokio::spawn(async move {
                // El permiso vive mientras dure el chunk
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                process_chunk(store.as_ref(), &input_name, index, &content, &settings).await
            });
            handles.push((index, handle));
        }

        // Barrera: esperar a todos antes de decidir
        let mut failures = Vec::new();
        for (index, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("tarea abortada: {e}"),
            };
            warn!("chunk {} de {} falló: {}", index, self.input_name, reason);
            failures.push(ChunkFailure { index, reason });
        }

        if failures.is_empty() {
            Ok(ProcessReport {
                dispatched,
                succeeded: dispatched,
            })
        } else {
            Err(ProcessError::ChunksFailed { failures })
        }
    }
}

/// Trabajo de un chunk: espera simulada, copia local best-effort y marcador.
/// Repetirlo deja el mismo estado (ambas escrituras sobrescriben).
async fn process_chunk(
    store: &dyn BlobStore,
    input_name: &str,
    index: usize,
    content: &str,
    settings: &ProcessorSettings,
) -> Result<(), StorageError> {
    info!("procesando chunk {}", index);

    if !settings.work_delay.is_zero() {
        tokio::time::sleep(settings.work_delay).await;
    }

    if let Some(dir) = &settings.local_output_dir {
        write_local_output(dir, index, content).await;
    }

    store.put_blob(&marker_key(input_name, index), content).await?;

    info!("chunk {} terminado", index);
    Ok(())
}

async fn write_local_output(dir: &Path, index: usize, content: &str) {
    let path = dir.join(format!("{}{}", index, BLOB_SUFFIX));
    if let Err(e) = tokio::fs::write(&path, content).await {
        warn!("no se pudo escribir {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobPage;
    use crate::chunk::split_into_chunks;
    use crate::layout::output_prefix;
    use crate::reconcile::remaining_work;
    use crate::storage::MemoryBlobStore;
    use async_trait::async_trait;
    use std::{collections::HashSet, fs, path::PathBuf, time::Duration};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("processor_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn settings(dir: Option<PathBuf>) -> ProcessorSettings {
        ProcessorSettings {
            work_delay: Duration::ZERO,
            local_output_dir: dir,
            max_concurrency: None,
        }
    }

    /// Store que falla al escribir ciertas claves.
    struct FailingStore {
        inner: MemoryBlobStore,
        fail_keys: HashSet<String>,
    }

    #[async_trait]
    impl BlobStore for FailingStore {
        fn namespace(&self) -> &str {
            self.inner.namespace()
        }
        async fn ensure_exists(&self) -> Result<bool, StorageError> {
            self.inner.ensure_exists().await
        }
        async fn put_blob(&self, key: &str, content: &str) -> Result<(), StorageError> {
            if self.fail_keys.contains(key) {
                return Err(StorageError::Transport("conexión rechazada".into()));
            }
            self.inner.put_blob(key, content).await
        }
        async fn get_blob(&self, key: &str) -> Result<String, StorageError> {
            self.inner.get_blob(key).await
        }
        async fn list_blobs_page(
            &self,
            prefix: &str,
            marker: Option<&str>,
        ) -> Result<BlobPage, StorageError> {
            self.inner.list_blobs_page(prefix, marker).await
        }
        async fn delete(&self) -> Result<bool, StorageError> {
            self.inner.delete().await
        }
    }

    #[tokio::test]
    async fn escribe_marcadores_y_salida_local() {
        let dir = temp_dir("basic").join("output");
        let store = Arc::new(MemoryBlobStore::new("exec"));
        let processor = ChunkProcessor::new(store.clone(), "in", settings(Some(dir.clone())));

        let chunks = split_into_chunks("a\nb\nc");
        let report = processor
            .process_all(remaining_work(&chunks, &HashSet::new()))
            .await
            .unwrap();

        assert_eq!(report, ProcessReport { dispatched: 3, succeeded: 3 });
        for (i, content) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(store.get_blob(&marker_key("in", i)).await.unwrap(), *content);
            assert_eq!(fs::read_to_string(dir.join(format!("{i}.txt"))).unwrap(), *content);
        }
    }

    #[tokio::test]
    async fn reprocesar_el_mismo_chunk_es_idempotente() {
        let store = Arc::new(MemoryBlobStore::new("exec"));
        let processor = ChunkProcessor::new(store.clone(), "in", settings(None));
        let chunks = split_into_chunks("a\nb");

        for _ in 0..2 {
            processor
                .process_all(remaining_work(&chunks, &HashSet::new()))
                .await
                .unwrap();
        }

        assert_eq!(store.list_blobs(&output_prefix("in")).await.unwrap().len(), 2);
        assert_eq!(store.get_blob(&marker_key("in", 1)).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn fallo_de_un_chunk_no_afecta_a_los_demas() {
        let store = Arc::new(FailingStore {
            inner: MemoryBlobStore::new("exec"),
            fail_keys: HashSet::from([marker_key("in", 1)]),
        });
        let processor = ChunkProcessor::new(store.clone(), "in", settings(None));
        let chunks = split_into_chunks("a\nb\nc");

        let err = processor
            .process_all(remaining_work(&chunks, &HashSet::new()))
            .await
            .unwrap_err();

        let ProcessError::ChunksFailed { failures } = err;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);

        let markers = store.inner.list_blobs(&output_prefix("in")).await.unwrap();
        assert_eq!(markers, vec![marker_key("in", 0), marker_key("in", 2)]);
    }

    #[tokio::test]
    async fn con_tope_de_concurrencia_procesa_todo() {
        let store = Arc::new(MemoryBlobStore::new("exec"));
        let mut s = settings(None);
        s.max_concurrency = Some(2);
        s.work_delay = Duration::from_millis(5);
        let processor = ChunkProcessor::new(store.clone(), "in", s);

        let content = (0..20).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let chunks = split_into_chunks(&content);
        let report = processor
            .process_all(remaining_work(&chunks, &HashSet::new()))
            .await
            .unwrap();

        assert_eq!(report.succeeded, 20);
        assert_eq!(store.list_blobs(&output_prefix("in")).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn orden_de_procesamiento_no_cambia_el_resultado() {
        let content = (0..30).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");
        let chunks = split_into_chunks(&content);

        // concurrente
        let concurrent = Arc::new(MemoryBlobStore::new("a"));
        ChunkProcessor::new(concurrent.clone(), "in", settings(None))
            .process_all(remaining_work(&chunks, &HashSet::new()))
            .await
            .unwrap();

        // secuencial, de atrás hacia adelante
        let sequential = Arc::new(MemoryBlobStore::new("b"));
        for chunk in chunks.iter().rev() {
            let single = [(chunk.index, chunk.content.clone())].into_iter().collect();
            ChunkProcessor::new(sequential.clone(), "in", settings(None))
                .process_all(single)
                .await
                .unwrap();
        }

        let prefix = output_prefix("in");
        let a = concurrent.list_blobs(&prefix).await.unwrap();
        let b = sequential.list_blobs(&prefix).await.unwrap();
        assert_eq!(a, b);
        for key in &a {
            assert_eq!(
                concurrent.get_blob(key).await.unwrap(),
                sequential.get_blob(key).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn sin_trabajo_no_despacha_nada() {
        let store = Arc::new(MemoryBlobStore::new("exec"));
        let report = ChunkProcessor::new(store.clone(), "in", settings(None))
            .process_all(RemainingWork::new())
            .await
            .unwrap();

        assert_eq!(report.dispatched, 0);
        assert!(store.is_empty());
    }
}
