//! `a3s-artifact rm` command: remove one or more artifacts.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct RmArgs {
    /// Artifact names to remove
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Ignore artifacts that do not exist
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: RmArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(global).await?;
    let ctx = super::op_context(global);

    let mut errors: Vec<String> = Vec::new();

    for name in &args.names {
        match store.remove(&ctx, name).await {
            Ok(()) => println!("Removed: {name}"),
            Err(e) if args.force && e.is_not_found() => continue,
            Err(e) => errors.push(e.to_string()),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = errors.join("\n");
        Err(format!("Failed to remove artifact(s):\n{msg}").into())
    }
}
