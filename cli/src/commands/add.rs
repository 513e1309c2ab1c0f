//! `a3s-artifact add` command: append files to an artifact.

use std::path::PathBuf;

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct AddArgs {
    /// Artifact name (e.g., "quay.io/org/data:v1")
    pub name: String,

    /// Files to add, one layer each
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Layer media type (default: the configured layer type)
    #[arg(long = "type")]
    pub artifact_type: Option<String>,
}

pub async fn execute(args: AddArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(global).await?;
    let ctx = super::op_context(global);

    let mut digest = String::new();
    for path in &args.paths {
        digest = store
            .add(&ctx, &args.name, path, args.artifact_type.as_deref())
            .await?;
    }

    println!("{digest}");
    Ok(())
}
