mod agent;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{config::DEFAULT_INPUT_FILE_PATH, run_invocation, HttpBlobStore, WorkerSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Procesa los chunks pendientes de un input (o corre como nodo del pool)")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Archivo de entrada local; atajo de `worker run INPUT_FILE`
    #[arg(value_name = "INPUT_FILE", default_value = DEFAULT_INPUT_FILE_PATH)]
    input: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Una invocación sobre un input (también sirve para un archivo llamado `agent`)
    Run {
        #[arg(value_name = "INPUT_FILE", default_value = DEFAULT_INPUT_FILE_PATH)]
        input: PathBuf,
    },
    /// Nodo del pool: se registra en el master y ejecuta tareas
    Agent,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,common=info")),
        )
        .init();

    let cli = Cli::parse();

    // Toda la configuración sale del entorno acá y sólo acá
    let settings = WorkerSettings::from_env()?;

    match cli.command {
        Some(Commands::Agent) => {
            let agent_config = agent::AgentConfig::from_env()?;
            agent::run(settings, agent_config).await
        }
        Some(Commands::Run { input }) => run_once(&settings, &input).await,
        None => run_once(&settings, &cli.input).await,
    }
}

async fn run_once(settings: &WorkerSettings, input: &Path) -> Result<()> {
    let store = Arc::new(HttpBlobStore::new(settings.storage.clone()));
    let summary = run_invocation(store, &settings.processor, input).await?;
    info!(
        "input {}: {} chunks, {} ya hechos, {} procesados ahora",
        summary.input_name, summary.total_chunks, summary.already_done, summary.dispatched
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sin_argumentos_usa_el_input_por_defecto() {
        let cli = Cli::try_parse_from(["worker"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.input, PathBuf::from(DEFAULT_INPUT_FILE_PATH));
    }

    #[test]
    fn run_acepta_un_archivo_llamado_agent() {
        let cli = Cli::try_parse_from(["worker", "run", "agent"]).unwrap();
        match cli.command {
            Some(Commands::Run { input }) => assert_eq!(input, PathBuf::from("agent")),
            _ => panic!("se esperaba el subcomando run"),
        }
    }

    #[test]
    fn agent_es_el_modo_pool() {
        let cli = Cli::try_parse_from(["worker", "agent"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Agent)));
    }

    #[test]
    fn input_posicional_sigue_funcionando() {
        let cli = Cli::try_parse_from(["worker", "datos.txt"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.input, PathBuf::from("datos.txt"));
    }
}
