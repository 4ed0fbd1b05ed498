use thiserror::Error;

/// Errores del almacenamiento de blobs (memoria o HTTP contra el master).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("el namespace {namespace} no existe")]
    NamespaceNotFound { namespace: String },

    #[error("no existe el blob {key}")]
    BlobNotFound { key: String },

    #[error("acceso denegado a {key}")]
    Forbidden { key: String },

    #[error("error de transporte: {0}")]
    Transport(String),

    #[error("{operation} devolvió status {status}")]
    Status { operation: String, status: u16 },
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Transport(e.to_string())
    }
}

/// Errores al descubrir los marcadores de chunks ya procesados.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Un blob bajo el prefijo de salida no sigue la convención `<index>.txt`.
    #[error("marcador corrupto: {key}")]
    CorruptMarker { key: String },
}

/// Fallo de un chunk individual dentro de una invocación.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("fallaron {} chunk(s): {}", failures.len(), describe_failures(failures))]
    ChunksFailed { failures: Vec<ChunkFailure> },
}

fn describe_failures(failures: &[ChunkFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.index, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("no se pudo leer el archivo de entrada {path}: {source}")]
    ReadInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ruta de entrada sin nombre de archivo: {0}")]
    InvalidInputPath(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Errores de configuración: se detectan al arrancar, antes de tocar trabajo.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("falta la variable de entorno {0}")]
    Missing(&'static str),

    #[error("valor inválido para {key}: {value}")]
    Invalid { key: &'static str, value: String },
}
