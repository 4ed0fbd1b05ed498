use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::blob::{AccessGrant, AccessPermission, AccessRequest, BlobPage, NamespaceCreated};
use crate::config::StorageConfig;
use crate::error::StorageError;

use super::BlobStore;

/// Caracteres que no pueden ir literales dentro de un segmento de path.
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string()
}

/// Codifica cada segmento de la clave; los `/` quedan como separadores.
fn encode_key(key: &str) -> String {
    key.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}

/// Cliente del servicio de blobs del master.
#[derive(Clone)]
pub struct HttpBlobStore {
    client: Client,
    config: StorageConfig,
}

impl HttpBlobStore {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn namespace_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}",
            self.config.master_url,
            encode_segment(&self.config.namespace)
        )
    }

    pub fn blob_url(&self, key: &str) -> String {
        format!("{}/blobs/{}", self.namespace_url(), encode_key(key))
    }

    /// Pide al master un token temporal y devuelve la URL del blob firmada
    /// con él (la que se entrega como resource file a las tareas).
    pub async fn get_blob_url_with_temporary_access(
        &self,
        key: &str,
        permissions: &[AccessPermission],
        expiry: Duration,
    ) -> Result<String, StorageError> {
        let url = format!("{}/access", self.namespace_url());
        let resp = self
            .client
            .post(&url)
            .json(&AccessRequest {
                permissions: permissions.to_vec(),
                expires_in_secs: expiry.as_secs(),
            })
            .send()
            .await?;

        let resp = check(resp, "access", || self.namespace_missing())?;
        let grant: AccessGrant = resp.json().await?;

        Ok(format!("{}?sig={}", self.blob_url(key), grant.token))
    }

    fn namespace_missing(&self) -> StorageError {
        StorageError::NamespaceNotFound {
            namespace: self.config.namespace.clone(),
        }
    }
}

/// Traduce status HTTP a errores de storage. `on_404` decide qué significa
/// un 404 para cada operación.
fn check<F>(resp: Response, operation: &str, on_404: F) -> Result<Response, StorageError>
where
    F: FnOnce() -> StorageError,
{
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::NOT_FOUND => Err(on_404()),
        StatusCode::FORBIDDEN => Err(StorageError::Forbidden {
            key: resp.url().path().to_string(),
        }),
        s => Err(StorageError::Status {
            operation: operation.to_string(),
            status: s.as_u16(),
        }),
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn namespace(&self) -> &str {
        &self.config.namespace
    }

    async fn ensure_exists(&self) -> Result<bool, StorageError> {
        let resp = self.client.put(self.namespace_url()).send().await?;
        let resp = check(resp, "create_namespace", || self.namespace_missing())?;
        let body: NamespaceCreated = resp.json().await?;
        if body.created {
            debug!("namespace {} creado", self.config.namespace);
        }
        Ok(body.created)
    }

    async fn put_blob(&self, key: &str, content: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .put(self.blob_url(key))
            .body(content.to_string())
            .send()
            .await?;
        check(resp, "put_blob", || self.namespace_missing())?;
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<String, StorageError> {
        let resp = self.client.get(self.blob_url(key)).send().await?;
        let resp = check(resp, "get_blob", || StorageError::BlobNotFound {
            key: key.to_string(),
        })?;
        Ok(resp.text().await?)
    }

    async fn list_blobs_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<BlobPage, StorageError> {
        let mut query: Vec<(&str, &str)> = vec![("prefix", prefix)];
        if let Some(m) = marker {
            query.push(("marker", m));
        }

        let resp = self
            .client
            .get(format!("{}/blobs", self.namespace_url()))
            .query(&query)
            .send()
            .await?;
        let resp = check(resp, "list_blobs", || self.namespace_missing())?;
        Ok(resp.json().await?)
    }

    async fn delete(&self) -> Result<bool, StorageError> {
        let resp = self.client.delete(self.namespace_url()).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                check(resp, "delete_namespace", || self.namespace_missing())?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_del_namespace_y_blobs() {
        let store = HttpBlobStore::new(StorageConfig::new("http://master:8080/", "exec"));
        assert_eq!(
            store.blob_url("input-files/a.txt"),
            "http://master:8080/api/v1/namespaces/exec/blobs/input-files/a.txt"
        );
        assert_eq!(store.namespace(), "exec");
    }

    #[test]
    fn claves_con_caracteres_reservados_se_codifican_por_segmento() {
        let store = HttpBlobStore::new(StorageConfig::new("http://master:8080", "ex ec"));
        assert_eq!(
            store.blob_url("output-files/a#b?c%d/0.txt"),
            "http://master:8080/api/v1/namespaces/ex%20ec/blobs/output-files/a%23b%3Fc%25d/0.txt"
        );
    }
}
