//! `a3s-artifact inspect` command: display artifacts as JSON.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct InspectArgs {
    /// Artifact names to inspect
    #[arg(required = true)]
    pub names: Vec<String>,
}

pub async fn execute(args: InspectArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(global).await?;
    let ctx = super::op_context(global);

    let mut artifacts = Vec::with_capacity(args.names.len());
    for name in &args.names {
        artifacts.push(store.inspect(&ctx, name).await?);
    }

    println!("{}", serde_json::to_string_pretty(&artifacts)?);
    Ok(())
}
