pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matching;
pub mod store;
pub mod video;
pub mod visualize;

pub use config::{CorruptPolicy, FingerprintParams, MatcherConfig, SearchParams};
pub use error::{FingerprintError, Result};
