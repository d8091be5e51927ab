use anyhow::{Context, Result};
use clap::Args;

use crate::app::App;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'n', help = "Maximum number of results to return")]
    pub limit: Option<u32>,

    #[arg(long, help = "Synthesize an answer from the top results")]
    pub synthesize: bool,

    #[arg(long, conflicts_with = "synthesize", help = "Return ranked chunks only")]
    pub no_synthesize: bool,
}

pub async fn handle_search(
    args: SearchArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let limit = args.limit.unwrap_or(config.search.default_limit);
    if limit == 0 {
        anyhow::bail!("limit must be at least 1");
    }

    let synthesize = if args.synthesize {
        true
    } else if args.no_synthesize {
        false
    } else {
        config.search.synthesize
    };

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Limit: {limit}");
        eprintln!("  Synthesize: {synthesize}");
    }

    let formatter = get_formatter(format);
    let app = App::new(config);
    let results = app
        .search(query, limit as usize, synthesize)
        .await
        .context("search failed")?;

    if verbose {
        eprintln!("Timing: {}ms\n", results.duration_ms);
    }

    print!("{}", formatter.format_search_results(&results));
    Ok(())
}
