//! `a3s-artifact push` command.

use clap::Args;

use super::GlobalArgs;

#[derive(Args)]
pub struct PushArgs {
    /// Local artifact name
    pub name: String,

    /// Registry reference to push to (default: the artifact name)
    pub destination: Option<String>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PushArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(global).await?;
    let ctx = super::op_context(global);
    let destination = args.destination.as_deref().unwrap_or(&args.name);

    if !args.quiet {
        println!("Pushing {} to {}...", args.name, destination);
    }
    store.push_to(&ctx, &args.name, destination).await?;
    if !args.quiet {
        println!("Pushed: {destination}");
    }
    Ok(())
}
