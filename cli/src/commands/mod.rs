//! CLI command definitions and dispatch.

mod add;
mod inspect;
mod ls;
mod pull;
mod push;
mod rm;

use std::path::PathBuf;
use std::time::Duration;

use a3s_artifact_core::config::StoreConfig;
use a3s_artifact_store::{ArtifactStore, OpContext};
use clap::{Args, Parser, Subcommand};

/// A3S Artifact - store and transfer files as OCI artifacts.
#[derive(Parser)]
#[command(name = "a3s-artifact", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Store root directory (default: ~/.a3s/artifacts)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Store configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Add files as layers of an artifact, creating it if needed
    Add(add::AddArgs),
    /// Remove one or more artifacts
    Rm(rm::RmArgs),
    /// List artifacts
    Ls(ls::LsArgs),
    /// Display detailed artifact information as JSON
    Inspect(inspect::InspectArgs),
    /// Pull an artifact from a registry
    Pull(pull::PullArgs),
    /// Push an artifact to a registry
    Push(push::PushArgs),
}

/// Build the store configuration from `--config`, the environment and
/// `--store`, in increasing precedence.
pub(crate) fn store_config(global: &GlobalArgs) -> Result<StoreConfig, Box<dyn std::error::Error>> {
    let config = match &global.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(store) = &global.store {
        config.store_path = Some(store.clone());
    }
    Ok(config)
}

/// Open the artifact store.
pub(crate) async fn open_store(
    global: &GlobalArgs,
) -> Result<ArtifactStore, Box<dyn std::error::Error>> {
    let config = store_config(global)?;
    Ok(ArtifactStore::open(config).await?)
}

/// Operation context honouring `--timeout` and cancelled by Ctrl-C.
pub(crate) fn op_context(global: &GlobalArgs) -> OpContext {
    let ctx = match global.timeout {
        Some(secs) => OpContext::with_timeout(Duration::from_secs(secs)),
        None => OpContext::new(),
    };
    let token = ctx.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    ctx
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let global = cli.global;
    match cli.command {
        Command::Add(args) => add::execute(args, &global).await,
        Command::Rm(args) => rm::execute(args, &global).await,
        Command::Ls(args) => ls::execute(args, &global).await,
        Command::Inspect(args) => inspect::execute(args, &global).await,
        Command::Pull(args) => pull::execute(args, &global).await,
        Command::Push(args) => push::execute(args, &global).await,
    }
}
