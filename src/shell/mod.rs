/// Shell integration module
///
/// Identifies the shell a session runs in.

pub mod shell_detector;

pub use shell_detector::{Shell, ShellDetector};
