pub mod backtest;
pub mod engine;
pub mod export;
pub mod mining;
pub mod vm;
pub mod vocab;

pub use backtest::Backtest;
pub use engine::{AlphaEngine, StepStats};
pub use export::PineExporter;
pub use mining::{mine_all, run_one};
pub use vm::StackVm;
pub use vocab::{Op, Token, Vocab};
