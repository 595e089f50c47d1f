//! 指纹序列检索

pub mod engine;
pub mod profile;

pub use engine::{MatchEngine, MatchResult, SearchOutcome, SearchReport, SkippedVideo};
pub use profile::{score_profile, ScoreProfile};
