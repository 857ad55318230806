pub mod optim;
pub mod policy;
pub mod rank;

pub use optim::AdamW;
pub use policy::{AlphaGpt, PolicyParams, SampledBatch};
pub use rank::{stable_rank, NewtonSchulzDecay, StableRankMonitor};
