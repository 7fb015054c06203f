/// Intelligence module
///
/// Learns from the captured history: which failures got fixed by what, and
/// which command sequences keep coming back. Suggestions build on both.

pub mod analyzer;
pub mod error_linker;
pub mod pattern_miner;
pub mod suggestion_engine;

pub use analyzer::{AnalysisReport, Analyzer};
pub use error_linker::{ErrorSolutionLinker, ErrorWindow, LinkEvent};
pub use pattern_miner::{MinerConfig, MiningReport, Pattern, PatternKey, PatternKind, PatternMiner};
pub use suggestion_engine::{Suggestion, SuggestionEngine, SuggestionSource};
