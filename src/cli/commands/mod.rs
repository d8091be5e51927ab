mod benchmark;
mod config;
mod index;
mod models;
mod search;
mod status;

pub use benchmark::BenchmarkCommand;
pub use config::ConfigCommand;
pub use index::IndexArgs;
pub use models::ModelsCommand;
pub use search::SearchArgs;

pub use benchmark::handle_benchmark;
pub use config::handle_config;
pub use index::handle_index;
pub use models::handle_models;
pub use search::handle_search;
pub use status::handle_status;
