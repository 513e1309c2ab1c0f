//! `a3s-artifact pull` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct PullArgs {
    /// Artifact reference (e.g., "quay.io/org/data:v1")
    pub name: String,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PullArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(global).await?;
    let ctx = super::op_context(global);

    if !args.quiet {
        println!("Pulling {}...", args.name);
    }
    store.pull(&ctx, &args.name).await?;

    let artifact = store.inspect(&ctx, &args.name).await?;
    if args.quiet {
        println!("{}", artifact.digest());
    } else {
        println!("Pulled: {} ({})", args.name, artifact.digest());
    }
    Ok(())
}
