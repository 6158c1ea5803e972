pub mod core;
pub mod corpus;
pub mod distortion;
pub mod evaluator;
pub mod models;
pub mod params;
pub mod stats;
pub mod trainer;

mod exact;
mod utils;

pub use crate::core::*;
pub use distortion::{DistortProbTable, WINDOW_SIZE};
pub use evaluator::{Evaluator, Performance};
pub use models::{ExpAlign, ModelKind, StateFamily};
pub use params::{Params, TransProbTable};
pub use stats::WordPairStats;
pub use trainer::{joint_train, AlignerOptions, AlignerOptionsBuilder, EmAligner};

pub use utils::parallelism;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A word pair was queried that was never allocated in the translation
    /// table. Fatal unless `handle_unknown_words` is enabled.
    #[error("unknown word pair ({0:?}, {1:?})")]
    UnknownWordPair(String, String),

    /// A persisted snapshot was trained under a different hidden-state
    /// family than the one this aligner is configured with.
    #[error("state family mismatch: snapshot uses {stored:?}, running with {current:?}")]
    StateFamilyMismatch {
        stored: Option<StateFamily>,
        current: Option<StateFamily>,
    },

    #[error("{0} does not support exact path likelihoods")]
    UnsupportedModel(&'static str),

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
