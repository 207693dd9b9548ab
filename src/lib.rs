//! Migration Analysis Pipeline: URL correspondence resolution,
//! bounded-concurrency probing, headless performance/responsiveness
//! auditing, and old-vs-new comparison.
//!
//! The HTTP/web transport layer, persistent document store, file-upload
//! staging, notification transports, report serializer, and auth layer
//! are external collaborators reached only through the traits in
//! [`store`] and [`pipeline`].

pub mod comparison;
pub mod correspondence;
pub mod error;
pub mod headless;
pub mod input_readers;
pub mod normalize;
pub mod pipeline;
pub mod probe;
pub mod store;
pub mod types;

pub use error::{AuditError, Result};
pub use pipeline::{run_pipeline, HeadlessBackend, PipelineConfig, ProbeBackend};
pub use store::{InMemoryProjectStore, InputFileReader, LocalFileReader, NullNotifier, Notifier, ProjectStore};
pub use types::{Project, ProjectInputs, ProjectStatus};
