//! Actualizers: the processors keeping projections up to date with the PLog.
//!
//! - [`AsyncActualizer`]: one per (app, partition, async projector). Reads the
//!   log from its stored offset, feeds an [`ActualizerPipeline`] whose
//!   [`AsyncProjector`] stage invokes the projector and flushes bundles of
//!   writes together with the new offset.
//! - [`SyncActualizerPipeline`]: one per partition. Runs the synchronous
//!   projectors inline with the command, all-or-nothing.
//!
//! Delivery is at least once. After a failure the actualizer replays from the
//! last flushed offset, so projector bodies must tolerate repeated events.

pub mod async_actualizer;
pub mod error;
pub mod pipeline;
pub mod projector;
pub mod run_state;
pub mod state;
pub mod sync;

pub use async_actualizer::{AsyncActualizer, ErrorSink, default_error_sink};
pub use error::{ActualizerError, ActualizerResult};
pub use pipeline::ActualizerPipeline;
pub use projector::{ActualizerServices, AsyncErrorHandler, AsyncProjector};
pub use run_state::RunState;
pub use state::{BundledState, InvocationState};
pub use sync::SyncActualizerPipeline;
