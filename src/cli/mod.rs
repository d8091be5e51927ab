//! CLI module for docseek.

pub mod commands;
pub mod output;
mod progress;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Semantic search over local documents with optional synthesized answers.
#[derive(Debug, Parser)]
#[command(name = "docseek")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show index statistics, providers, local models and jobs
    Status,

    /// Index (or re-index) a folder
    Index(commands::IndexArgs),

    /// Search indexed documents
    Search(commands::SearchArgs),

    /// Browse, download and delete local models
    #[command(subcommand)]
    Models(commands::ModelsCommand),

    /// Benchmark local models
    #[command(subcommand)]
    Benchmark(commands::BenchmarkCommand),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
