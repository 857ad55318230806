pub mod config;
pub mod errors;
pub mod logging;
pub mod storage;

pub use config::RunConfig;
pub use errors::AlphaError;
pub use storage::{BestAlpha, MiningLog};
