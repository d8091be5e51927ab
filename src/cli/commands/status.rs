use anyhow::Result;

use crate::app::App;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

pub async fn handle_status(config: Config, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let app = App::new(config);
    print!("{}", formatter.format_status(&app.status()));
    Ok(())
}
