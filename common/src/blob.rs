use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Una página de un listado por prefijo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobPage {
    pub names: Vec<String>,
    /// Último nombre devuelto cuando quedan más resultados; se pasa como
    /// `marker` para pedir la página siguiente.
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBlobsQuery {
    #[serde(default)]
    pub prefix: String,
    pub marker: Option<String>,
    pub max_results: Option<usize>,
    pub sig: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceCreated {
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessPermission {
    Read,
    Write,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub permissions: Vec<AccessPermission>,
    pub expires_in_secs: u64,
}

/// Token de acceso temporal sobre un namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigQuery {
    pub sig: Option<String>,
}
