/// Core functionality modules
///
/// Classification, capture, background persistence, session tracking,
/// searching and export.

pub mod capture;
pub mod classifier;
pub mod dispatcher;
pub mod exporter;
pub mod searcher;
pub mod session;

pub use capture::{CapturePipeline, CapturePolicy, ClosedCommand, CommandRef, Rejection, StartOutcome};
pub use classifier::{classify, complexity, is_sensitive, redact, SemanticType, REDACTED};
pub use dispatcher::{PersistJob, PersistenceDispatcher};
pub use exporter::{ExportFormat, Exporter};
pub use searcher::Searcher;
pub use session::{Session, SessionStatus, SessionTracker};
