//! Abstracción de almacenamiento: un namespace de blobs clave/valor con
//! listado por prefijo paginado.

mod http;
mod memory;

pub use http::HttpBlobStore;
pub use memory::{MemoryBlobStore, DEFAULT_PAGE_SIZE};

use async_trait::async_trait;

use crate::blob::BlobPage;
use crate::error::StorageError;

/// Un namespace de blobs (el "contenedor" de una ejecución).
///
/// Las escrituras son crear-o-sobrescribir: escribir dos veces la misma clave
/// con el mismo contenido deja el mismo estado.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn namespace(&self) -> &str;

    /// Crea el namespace si no existe. Devuelve `true` si lo creó.
    async fn ensure_exists(&self) -> Result<bool, StorageError>;

    async fn put_blob(&self, key: &str, content: &str) -> Result<(), StorageError>;

    async fn get_blob(&self, key: &str) -> Result<String, StorageError>;

    /// Una página de nombres bajo `prefix`, en orden lexicográfico y
    /// estrictamente posteriores a `marker`.
    async fn list_blobs_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<BlobPage, StorageError>;

    /// Borra el namespace completo. Devuelve `false` si no existía.
    async fn delete(&self) -> Result<bool, StorageError>;

    /// Lista todos los nombres bajo `prefix`, recorriendo todas las páginas.
    async fn list_blobs(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_blobs_page(prefix, marker.as_deref()).await?;
            names.extend(page.names);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(names)
    }
}
