//! `a3s-artifact ls` command.

use a3s_artifact_store::{Artifact, ArtifactStore};
use clap::Args;

use crate::output;

use super::GlobalArgs;

const HEADERS: [&str; 3] = ["NAME", "DIGEST", "SIZE"];

#[derive(Args)]
pub struct LsArgs {
    /// Only show artifact names (one per line)
    #[arg(short, long)]
    pub quiet: bool,

    /// Format output using placeholders: {{.Name}}, {{.Digest}}, {{.Size}},
    /// {{.Layers}}, {{.MediaType}}
    #[arg(long)]
    pub format: Option<String>,
}

pub async fn execute(args: LsArgs, global: &GlobalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(global).await?;
    let ctx = super::op_context(global);
    let artifacts = store.list(&ctx).await?;

    let rows: Vec<ArtifactRow> = artifacts.iter().map(ArtifactRow::from_artifact).collect();

    // --quiet: print only names
    if args.quiet {
        for row in &rows {
            println!("{}", row.name);
        }
        return Ok(());
    }

    // --format: custom template output
    if let Some(ref fmt) = args.format {
        for row in &rows {
            println!("{}", row.apply_format(fmt));
        }
        return Ok(());
    }

    let mut table = output::new_table(&HEADERS);
    for row in &rows {
        table.add_row([&row.name, &row.digest, &row.size]);
    }

    println!("{table}");
    Ok(())
}

/// Pre-computed display fields for a single artifact row.
struct ArtifactRow {
    name: String,
    digest: String,
    size: String,
    layers: String,
    media_type: String,
}

impl ArtifactRow {
    fn from_artifact(artifact: &Artifact) -> Self {
        let name = ArtifactStore::get_name(artifact)
            .map(str::to_string)
            .unwrap_or_else(|_| "<none>".to_string());
        let size = ArtifactStore::total_size_bytes(artifact).max(0) as u64;

        Self {
            name,
            digest: output::short_digest(artifact.digest()),
            size: output::format_bytes(size),
            layers: artifact.layer_count().to_string(),
            media_type: artifact.descriptor.media_type().to_string(),
        }
    }

    /// Apply a format template, replacing `{{.Field}}` placeholders.
    fn apply_format(&self, fmt: &str) -> String {
        fmt.replace("{{.Name}}", &self.name)
            .replace("{{.Digest}}", &self.digest)
            .replace("{{.Size}}", &self.size)
            .replace("{{.Layers}}", &self.layers)
            .replace("{{.MediaType}}", &self.media_type)
    }
}
