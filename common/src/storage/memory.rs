use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::blob::BlobPage;
use crate::error::StorageError;

use super::BlobStore;

/// Tamaño de página por defecto del listado (igual que los stores en la nube).
pub const DEFAULT_PAGE_SIZE: usize = 5000;

type Blobs = Option<BTreeMap<String, String>>;

/// Namespace de blobs en memoria. `None` = namespace inexistente.
pub struct MemoryBlobStore {
    namespace: String,
    page_size: usize,
    blobs: Mutex<Blobs>,
}

impl MemoryBlobStore {
    /// Crea un namespace ya existente y vacío.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            page_size: DEFAULT_PAGE_SIZE,
            blobs: Mutex::new(Some(BTreeMap::new())),
        }
    }

    /// Namespace que todavía no existe (hay que llamar a `ensure_exists`).
    pub fn absent(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            page_size: DEFAULT_PAGE_SIZE,
            blobs: Mutex::new(None),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn exists(&self) -> bool {
        self.lock().is_some()
    }

    /// Cantidad de blobs (0 si el namespace no existe).
    pub fn len(&self) -> usize {
        self.lock().as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listado de una página con un límite explícito (acotado por `page_size`).
    pub fn page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<BlobPage, StorageError> {
        let limit = limit.clamp(1, self.page_size);
        let guard = self.lock();
        let blobs = guard.as_ref().ok_or_else(|| self.not_found())?;

        // Sólo tiene sentido arrancar desde el marker si está dentro del prefijo
        let start = match marker {
            Some(m) if m >= prefix => Bound::Excluded(m.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        let mut names = Vec::new();
        let mut more = false;

        for key in blobs.range::<String, _>((start, Bound::Unbounded)).map(|(k, _)| k) {
            if !key.starts_with(prefix) {
                break;
            }
            if names.len() == limit {
                more = true;
                break;
            }
            names.push(key.clone());
        }

        let next_marker = if more { names.last().cloned() } else { None };
        Ok(BlobPage { names, next_marker })
    }

    fn lock(&self) -> MutexGuard<'_, Blobs> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn not_found(&self) -> StorageError {
        StorageError::NamespaceNotFound {
            namespace: self.namespace.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ensure_exists(&self) -> Result<bool, StorageError> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Ok(false);
        }
        *guard = Some(BTreeMap::new());
        Ok(true)
    }

    async fn put_blob(&self, key: &str, content: &str) -> Result<(), StorageError> {
        let mut guard = self.lock();
        let blobs = guard.as_mut().ok_or_else(|| self.not_found())?;
        blobs.insert(key.to_string(), content.to_string());
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<String, StorageError> {
        let guard = self.lock();
        let blobs = guard.as_ref().ok_or_else(|| self.not_found())?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::BlobNotFound {
                key: key.to_string(),
            })
    }

    async fn list_blobs_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<BlobPage, StorageError> {
        self.page(prefix, marker, self.page_size)
    }

    async fn delete(&self) -> Result<bool, StorageError> {
        Ok(self.lock().take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(page_size: usize, keys: &[&str]) -> MemoryBlobStore {
        let store = MemoryBlobStore::new("ns").with_page_size(page_size);
        for k in keys {
            store.put_blob(k, "x").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn put_y_get_sobrescriben() {
        let store = MemoryBlobStore::new("ns");
        store.put_blob("a.txt", "uno").await.unwrap();
        store.put_blob("a.txt", "dos").await.unwrap();

        assert_eq!(store.get_blob("a.txt").await.unwrap(), "dos");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_de_blob_inexistente_falla() {
        let store = MemoryBlobStore::new("ns");
        let err = store.get_blob("nada").await.unwrap_err();
        assert!(matches!(err, StorageError::BlobNotFound { .. }));
    }

    #[tokio::test]
    async fn namespace_ausente_hasta_ensure_exists() {
        let store = MemoryBlobStore::absent("ns");
        assert!(matches!(
            store.put_blob("k", "v").await,
            Err(StorageError::NamespaceNotFound { .. })
        ));

        assert!(store.ensure_exists().await.unwrap());
        assert!(!store.ensure_exists().await.unwrap());
        store.put_blob("k", "v").await.unwrap();

        assert!(store.delete().await.unwrap());
        assert!(!store.exists());
        assert!(!store.delete().await.unwrap());
    }

    #[tokio::test]
    async fn listado_filtra_por_prefijo() {
        let store = seeded(10, &["a/1", "a/2", "ab/1", "b/1"]).await;
        let page = store.list_blobs_page("a/", None).await.unwrap();

        assert_eq!(page.names, vec!["a/1", "a/2"]);
        assert_eq!(page.next_marker, None);
    }

    #[tokio::test]
    async fn listado_paginado_devuelve_todo_sin_repetir() {
        let keys = ["p/0", "p/1", "p/2", "p/3", "p/4", "q/0"];
        let store = seeded(2, &keys).await;

        let first = store.list_blobs_page("p/", None).await.unwrap();
        assert_eq!(first.names, vec!["p/0", "p/1"]);
        assert_eq!(first.next_marker.as_deref(), Some("p/1"));

        let all = store.list_blobs("p/").await.unwrap();
        assert_eq!(all, vec!["p/0", "p/1", "p/2", "p/3", "p/4"]);
    }

    #[tokio::test]
    async fn pagina_exacta_no_deja_marker() {
        let store = seeded(2, &["p/0", "p/1"]).await;
        let page = store.list_blobs_page("p/", None).await.unwrap();
        assert_eq!(page.names.len(), 2);
        assert_eq!(page.next_marker, None);
    }

    #[tokio::test]
    async fn page_respeta_el_limite_pedido() {
        let store = seeded(100, &["p/0", "p/1", "p/2"]).await;
        let page = store.page("p/", None, 1).unwrap();
        assert_eq!(page.names, vec!["p/0"]);
        assert_eq!(page.next_marker.as_deref(), Some("p/0"));

        let page = store.page("p/", Some("p/0"), 1).unwrap();
        assert_eq!(page.names, vec!["p/1"]);
    }
}
