use std::{path::PathBuf, time::Duration};

use crate::error::ConfigError;

pub const ENV_MASTER_URL: &str = "MASTER_URL";
pub const ENV_NAMESPACE: &str = "BATCH_NAMESPACE";
pub const ENV_WORK_DELAY_MS: &str = "CHUNK_WORK_DELAY_MS";
pub const ENV_OUTPUT_DIR: &str = "CHUNK_OUTPUT_DIR";
pub const ENV_CHUNK_CONCURRENCY: &str = "CHUNK_CONCURRENCY";

pub const DEFAULT_NAMESPACE: &str = "test";
pub const DEFAULT_INPUT_FILE_PATH: &str = "sample-input.txt";
pub const DEFAULT_WORK_DELAY_MS: u64 = 1000;
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// A qué master hablar y en qué namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub master_url: String,
    pub namespace: String,
}

impl StorageConfig {
    pub fn new(master_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            master_url: master_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Trabajo simulado por chunk.
    pub work_delay: Duration,
    /// Directorio de salida local (scratch). `None` = no escribir local.
    pub local_output_dir: Option<PathBuf>,
    /// Tope de chunks en vuelo; `None` = sin tope.
    pub max_concurrency: Option<usize>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            work_delay: Duration::from_millis(DEFAULT_WORK_DELAY_MS),
            local_output_dir: Some(PathBuf::from(DEFAULT_OUTPUT_DIR)),
            max_concurrency: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub storage: StorageConfig,
    pub processor: ProcessorSettings,
}

impl WorkerSettings {
    /// Lee la configuración del entorno del proceso. Se llama una sola vez en
    /// `main`; el resto del código recibe el valor ya armado.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let master_url = lookup(ENV_MASTER_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_MASTER_URL))?;

        if !(master_url.starts_with("http://") || master_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: ENV_MASTER_URL,
                value: master_url,
            });
        }

        let namespace = lookup(ENV_NAMESPACE)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let work_delay_ms = match lookup(ENV_WORK_DELAY_MS) {
            Some(v) => v.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: ENV_WORK_DELAY_MS,
                value: v,
            })?,
            None => DEFAULT_WORK_DELAY_MS,
        };

        // Variable vacía desactiva la salida local
        let local_output_dir = match lookup(ENV_OUTPUT_DIR) {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(PathBuf::from(DEFAULT_OUTPUT_DIR)),
        };

        let max_concurrency = match lookup(ENV_CHUNK_CONCURRENCY) {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: ENV_CHUNK_CONCURRENCY,
                        value: v,
                    })
                }
            },
            None => None,
        };

        Ok(Self {
            storage: StorageConfig::new(master_url, namespace),
            processor: ProcessorSettings {
                work_delay: Duration::from_millis(work_delay_ms),
                local_output_dir,
                max_concurrency,
            },
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage.namespace = namespace.into();
        self
    }
}
