use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::app::App;
use crate::cli::output::get_formatter;
use crate::cli::progress::follow;
use crate::models::{Config, JobKind, OutputFormat};

#[derive(Debug, Args)]
pub struct IndexArgs {
    #[arg(default_value = ".", help = "Folder to index")]
    pub root: PathBuf,
}

pub async fn handle_index(
    args: IndexArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("cannot open folder {}", args.root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("not a directory: {}", root.display());
    }

    if verbose {
        eprintln!("Indexing {}", root.display());
        eprintln!("  Embedding: {}", config.embedding.provider);
        eprintln!(
            "  Chunks: {} chars, {} overlap",
            config.indexing.chunk_size, config.indexing.chunk_overlap
        );
    }

    let app = App::new(config);
    let handle = app.start_index(root).context("failed to start indexing")?;
    let report = follow(
        app.jobs(),
        JobKind::Index,
        handle,
        format == OutputFormat::Json,
    )
    .await?;

    print!("{}", formatter.format_index_report(&report));
    Ok(())
}
