use std::collections::HashSet;

use tracing::debug;

use crate::error::DiscoveryError;
use crate::layout::{output_prefix, BLOB_SUFFIX};
use crate::storage::BlobStore;

/// Busca en el storage los marcadores de chunks ya procesados de un input y
/// devuelve sus índices. Recorre todas las páginas del listado.
///
/// Cualquier clave bajo el prefijo que no sea exactamente `<index>.txt`
/// aborta el descubrimiento: saltarla podría esconder una corrupción.
pub async fn discover_completed(
    store: &dyn BlobStore,
    input_name: &str,
) -> Result<HashSet<usize>, DiscoveryError> {
    let prefix = output_prefix(input_name);
    let names = store.list_blobs(&prefix).await?;

    let mut done = HashSet::with_capacity(names.len());
    for key in &names {
        done.insert(parse_marker_index(&prefix, key)?);
    }

    debug!(
        "input {}: {} marcadores encontrados en {}",
        input_name,
        done.len(),
        store.namespace()
    );
    Ok(done)
}

/// Extrae el índice de `<prefix><index>.txt`. El índice tiene que estar en
/// forma canónica: sólo dígitos, sin signo y sin ceros a la izquierda.
pub fn parse_marker_index(prefix: &str, key: &str) -> Result<usize, DiscoveryError> {
    let corrupt = || DiscoveryError::CorruptMarker {
        key: key.to_string(),
    };

    let digits = key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(BLOB_SUFFIX))
        .ok_or_else(corrupt)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(corrupt());
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(corrupt());
    }

    digits.parse::<usize>().map_err(|_| corrupt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::marker_key;
    use crate::storage::MemoryBlobStore;

    #[test]
    fn parse_indices_validos() {
        let prefix = output_prefix("in");
        assert_eq!(parse_marker_index(&prefix, "output-files/in/0.txt").unwrap(), 0);
        assert_eq!(parse_marker_index(&prefix, "output-files/in/137.txt").unwrap(), 137);
    }

    #[test]
    fn parse_rechaza_claves_fuera_de_convencion() {
        let prefix = output_prefix("in");
        for key in [
            "output-files/in/abc.txt",
            "output-files/in/1.csv",
            "output-files/in/.txt",
            "output-files/in/-1.txt",
            "output-files/in/+1.txt",
            "output-files/in/01.txt",
            "output-files/in/sub/1.txt",
            "output-files/in/99999999999999999999999999.txt",
            "otra-cosa/in/1.txt",
        ] {
            let err = parse_marker_index(&prefix, key).unwrap_err();
            assert!(
                matches!(err, DiscoveryError::CorruptMarker { .. }),
                "clave {key} debería ser corrupta"
            );
        }
    }

    #[tokio::test]
    async fn descubre_solo_los_marcadores_del_input() {
        let store = MemoryBlobStore::new("exec");
        store.put_blob(&marker_key("in", 0), "a").await.unwrap();
        store.put_blob(&marker_key("in", 2), "c").await.unwrap();
        store.put_blob(&marker_key("in2", 1), "x").await.unwrap();
        store.put_blob("input-files/in.txt", "a\nb\nc").await.unwrap();

        let done = discover_completed(&store, "in").await.unwrap();
        assert_eq!(done, HashSet::from([0, 2]));
    }

    #[tokio::test]
    async fn sin_marcadores_devuelve_vacio() {
        let store = MemoryBlobStore::new("exec");
        let done = discover_completed(&store, "in").await.unwrap();
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn recorre_todas_las_paginas() {
        let store = MemoryBlobStore::new("exec").with_page_size(3);
        for i in 0..10 {
            store.put_blob(&marker_key("in", i), "x").await.unwrap();
        }

        let done = discover_completed(&store, "in").await.unwrap();
        assert_eq!(done, (0..10).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn marcador_corrupto_es_fatal() {
        let store = MemoryBlobStore::new("exec");
        store.put_blob(&marker_key("in", 0), "a").await.unwrap();
        store.put_blob("output-files/in/basura.txt", "?").await.unwrap();

        let err = discover_completed(&store, "in").await.unwrap_err();
        match err {
            DiscoveryError::CorruptMarker { key } => {
                assert_eq!(key, "output-files/in/basura.txt")
            }
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn namespace_inexistente_es_error_de_storage() {
        let store = MemoryBlobStore::absent("exec");
        let err = discover_completed(&store, "in").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Storage(_)));
    }
}
