use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::app::App;
use crate::cli::output::get_formatter;
use crate::cli::progress::follow;
use crate::models::{Config, JobKind, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ModelsCommand {
    #[command(about = "List downloadable models")]
    Catalog,
    #[command(about = "List models present on disk")]
    List,
    #[command(about = "Download a catalog model")]
    Download {
        #[arg(help = "Catalog model id")]
        id: String,
    },
    #[command(about = "Delete a local model file")]
    Delete {
        #[arg(help = "Path to the model file")]
        path: PathBuf,
    },
}

pub async fn handle_models(
    cmd: ModelsCommand,
    config: Config,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let app = App::new(config);
    let models = app.models();

    match cmd {
        ModelsCommand::Catalog => {
            let local = models.list_local()?;
            print!("{}", formatter.format_catalog(models.catalog(), &local));
        }
        ModelsCommand::List => {
            print!("{}", formatter.format_local_models(&models.list_local()?));
        }
        ModelsCommand::Download { id } => {
            let handle = models.download(&id).context("download rejected")?;
            let model = follow(
                app.jobs(),
                JobKind::Download,
                handle,
                format == OutputFormat::Json,
            )
            .await?;
            println!(
                "{}",
                formatter.format_message(&format!(
                    "Downloaded {} to {}",
                    model.name,
                    model.path.display()
                ))
            );
        }
        ModelsCommand::Delete { path } => {
            let removed = models.delete(&path)?;
            println!(
                "{}",
                formatter.format_message(&format!("Deleted {}", removed.path.display()))
            );
        }
    }
    Ok(())
}
