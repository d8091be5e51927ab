use anyhow::{Context, Result};
use clap::Subcommand;

use crate::app::App;
use crate::cli::output::get_formatter;
use crate::cli::progress::follow;
use crate::models::{Config, JobKind, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum BenchmarkCommand {
    #[command(about = "Benchmark every local model")]
    Run,
    #[command(about = "Show the last stored results")]
    Results,
}

pub async fn handle_benchmark(
    cmd: BenchmarkCommand,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let app = App::new(config);
    let harness = app.benchmark();

    match cmd {
        BenchmarkCommand::Run => {
            let handle = harness.run().context("benchmark rejected")?;
            let report = follow(
                app.jobs(),
                JobKind::Benchmark,
                handle,
                format == OutputFormat::Json,
            )
            .await?;
            print!("{}", formatter.format_benchmark(&report));
            if verbose {
                eprintln!("Report written to {}", harness.report_path().display());
            }
        }
        BenchmarkCommand::Results => match harness.results() {
            Some(report) => print!("{}", formatter.format_benchmark(&report)),
            None => println!(
                "{}",
                formatter.format_message("No benchmark results yet. Run `docseek benchmark run`.")
            ),
        },
    }
    Ok(())
}
