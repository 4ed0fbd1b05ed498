//! Una invocación del worker sobre un input: partir, descubrir, reconciliar
//! y procesar lo que falta.

use std::{path::Path, sync::Arc};

use tracing::{info, warn};

use crate::chunk::split_into_chunks;
use crate::config::ProcessorSettings;
use crate::discovery::discover_completed;
use crate::error::InvocationError;
use crate::processor::ChunkProcessor;
use crate::reconcile::{remaining_work, stale_markers};
use crate::storage::BlobStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSummary {
    pub input_name: String,
    pub total_chunks: usize,
    pub already_done: usize,
    pub dispatched: usize,
}

/// Nombre del input a partir de la ruta local (`dir/abc.txt` -> `abc`).
pub fn input_name_from_path(path: &Path) -> Result<String, InvocationError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| InvocationError::InvalidInputPath(path.display().to_string()))
}

pub async fn run_invocation(
    store: Arc<dyn BlobStore>,
    settings: &ProcessorSettings,
    input_path: &Path,
) -> Result<InvocationSummary, InvocationError> {
    info!("starting");

    let input_name = input_name_from_path(input_path)?;
    info!("input file: {}", input_path.display());

    if store.ensure_exists().await? {
        info!("namespace {} creado", store.namespace());
    }

    let content = tokio::fs::read_to_string(input_path)
        .await
        .map_err(|source| InvocationError::ReadInput {
            path: input_path.display().to_string(),
            source,
        })?;

    let chunks = split_into_chunks(&content);
    let done = discover_completed(store.as_ref(), &input_name).await?;
    let remaining = remaining_work(&chunks, &done);

    let stale = stale_markers(chunks.len(), &done);
    if !stale.is_empty() {
        warn!(
            "input {}: {} marcadores no corresponden a ningún chunk: {:?}",
            input_name,
            stale.len(),
            stale
        );
    }

    let already_done = chunks.len() - remaining.len();
    info!("total de chunks: {}", chunks.len());
    info!("chunks ya procesados: {}", already_done);
    info!("chunks restantes: {}", remaining.len());

    let mut summary = InvocationSummary {
        input_name: input_name.clone(),
        total_chunks: chunks.len(),
        already_done,
        dispatched: 0,
    };

    if remaining.is_empty() {
        info!("no queda trabajo para {}", input_name);
        return Ok(summary);
    }

    let processor = ChunkProcessor::new(store, input_name, settings.clone());
    let report = processor.process_all(remaining).await?;
    summary.dispatched = report.dispatched;

    info!("all remaining work complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use crate::layout::{marker_key, output_prefix};
    use crate::storage::MemoryBlobStore;
    use std::{fs, path::PathBuf, time::Duration};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("invocation_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn write_input(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(format!("{name}.txt"));
        fs::write(&path, content).unwrap();
        path
    }

    fn settings(dir: &Path) -> ProcessorSettings {
        ProcessorSettings {
            work_delay: Duration::ZERO,
            local_output_dir: Some(dir.join("output")),
            max_concurrency: None,
        }
    }

    #[tokio::test]
    async fn tres_lineas_sin_marcadores() {
        let dir = temp_dir("abc");
        let input = write_input(&dir, "in", "a\nb\nc");
        let store = Arc::new(MemoryBlobStore::new("exec"));

        let summary = run_invocation(store.clone(), &settings(&dir), &input)
            .await
            .unwrap();

        assert_eq!(
            summary,
            InvocationSummary {
                input_name: "in".into(),
                total_chunks: 3,
                already_done: 0,
                dispatched: 3,
            }
        );
        assert_eq!(
            store.list_blobs(&output_prefix("in")).await.unwrap(),
            vec![marker_key("in", 0), marker_key("in", 1), marker_key("in", 2)]
        );
        assert_eq!(store.get_blob(&marker_key("in", 2)).await.unwrap(), "c");
    }

    #[tokio::test]
    async fn con_marcador_previo_despacha_solo_lo_que_falta() {
        let dir = temp_dir("resume");
        let input = write_input(&dir, "in", "a\nb\nc");
        let store = Arc::new(MemoryBlobStore::new("exec"));
        store.put_blob(&marker_key("in", 1), "b").await.unwrap();

        let summary = run_invocation(store.clone(), &settings(&dir), &input)
            .await
            .unwrap();

        assert_eq!(summary.already_done, 1);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(store.list_blobs(&output_prefix("in")).await.unwrap().len(), 3);
        assert_eq!(store.get_blob(&marker_key("in", 0)).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn segunda_corrida_de_mil_lineas_no_hace_nada() {
        let dir = temp_dir("mil");
        let content = (1..=1000).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let input = write_input(&dir, "grande", &content);
        let store = Arc::new(MemoryBlobStore::new("exec").with_page_size(100));

        let first = run_invocation(store.clone(), &settings(&dir), &input)
            .await
            .unwrap();
        assert_eq!(first.dispatched, 1000);

        let second = run_invocation(store.clone(), &settings(&dir), &input)
            .await
            .unwrap();
        assert_eq!(second.already_done, 1000);
        assert_eq!(second.dispatched, 0);
        assert_eq!(store.list_blobs(&output_prefix("grande")).await.unwrap().len(), 1000);
    }

    #[tokio::test]
    async fn todas_las_combinaciones_de_hechos_reanudan_bien() {
        let dir = temp_dir("subsets");
        let input = write_input(&dir, "in", "a\nb\nc\nd");

        // todos los subconjuntos de [0, 4), incluidos vacío y completo
        for mask in 0u32..16 {
            let store = Arc::new(MemoryBlobStore::new("exec"));
            let mut seeded = 0;
            for i in 0..4 {
                if mask & (1 << i) != 0 {
                    store.put_blob(&marker_key("in", i), "hecho").await.unwrap();
                    seeded += 1;
                }
            }

            let summary = run_invocation(store.clone(), &settings(&dir), &input)
                .await
                .unwrap();

            assert_eq!(summary.already_done, seeded);
            assert_eq!(summary.dispatched, 4 - seeded);
            assert_eq!(store.list_blobs(&output_prefix("in")).await.unwrap().len(), 4);
        }
    }

    #[tokio::test]
    async fn crea_el_namespace_si_no_existe() {
        let dir = temp_dir("ns");
        let input = write_input(&dir, "in", "x");
        let store = Arc::new(MemoryBlobStore::absent("exec"));

        run_invocation(store.clone(), &settings(&dir), &input)
            .await
            .unwrap();

        assert!(store.exists());
        assert_eq!(store.get_blob(&marker_key("in", 0)).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn marcador_corrupto_aborta_la_invocacion() {
        let dir = temp_dir("corrupt");
        let input = write_input(&dir, "in", "a\nb");
        let store = Arc::new(MemoryBlobStore::new("exec"));
        store.put_blob("output-files/in/x1.txt", "?").await.unwrap();

        let err = run_invocation(store.clone(), &settings(&dir), &input)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InvocationError::Discovery(DiscoveryError::CorruptMarker { .. })
        ));
        // no se procesó nada
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn input_inexistente_es_error_de_lectura() {
        let dir = temp_dir("missing");
        let store = Arc::new(MemoryBlobStore::new("exec"));

        let err = run_invocation(store, &settings(&dir), &dir.join("no_existe.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::ReadInput { .. }));
    }

    #[test]
    fn nombre_del_input_es_el_stem() {
        assert_eq!(input_name_from_path(Path::new("/tmp/x/abc.txt")).unwrap(), "abc");
        assert_eq!(input_name_from_path(Path::new("abc")).unwrap(), "abc");
        assert!(input_name_from_path(Path::new("/")).is_err());
    }
}
