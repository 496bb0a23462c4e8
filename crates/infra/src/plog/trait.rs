use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use strata_core::{Offset, PartitionId};
use strata_events::LogEvent;

/// How far a read may go.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadLimit {
    /// Until the last event currently in the log.
    ToEnd,
    /// At most this many events.
    Count(u64),
}

impl ReadLimit {
    pub fn allows(&self, delivered: u64) -> bool {
        match self {
            ReadLimit::ToEnd => true,
            ReadLimit::Count(n) => delivered < *n,
        }
    }
}

/// PLog operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PLogError {
    #[error("partition {partition}: expected offset {expected}, got {found}")]
    OffsetMismatch {
        partition: PartitionId,
        expected: Offset,
        found: Offset,
    },

    #[error("plog storage failure: {0}")]
    Storage(String),
}

/// Per-event callback of [`LogReader::read_plog`]. `Break` stops the read.
pub type EventCallback<'a> = dyn FnMut(Arc<LogEvent>) -> ControlFlow<()> + Send + 'a;

/// Read side of the PLog.
///
/// ## Read Semantics
///
/// `read_plog()` delivers events of one partition in offset order, starting at
/// `from` and stopping at the end of the log, when `limit` is reached, or
/// when the callback breaks.
///
/// - Delivering zero events without an error means the reader is caught up.
/// - Implementations should not fail after delivering events. Callers keep
///   whatever was delivered before a failure and treat it as a partial read.
/// - Events are shared (`Arc`); a consumer releases an event by dropping it.
#[async_trait]
pub trait LogReader: Send + Sync {
    async fn read_plog(
        &self,
        partition: PartitionId,
        from: Offset,
        limit: ReadLimit,
        callback: &mut EventCallback<'_>,
    ) -> Result<(), PLogError>;
}

/// Write side of the PLog.
///
/// Offsets are assigned by the writer: `put()` must be called with the event
/// at `last_offset() + 1`, and callers serialise writes per partition.
#[async_trait]
pub trait LogWriter: Send + Sync {
    async fn last_offset(&self, partition: PartitionId) -> Result<Offset, PLogError>;

    async fn put(&self, event: Arc<LogEvent>) -> Result<(), PLogError>;
}

#[async_trait]
impl<R> LogReader for Arc<R>
where
    R: LogReader + ?Sized,
{
    async fn read_plog(
        &self,
        partition: PartitionId,
        from: Offset,
        limit: ReadLimit,
        callback: &mut EventCallback<'_>,
    ) -> Result<(), PLogError> {
        (**self).read_plog(partition, from, limit, callback).await
    }
}

#[async_trait]
impl<W> LogWriter for Arc<W>
where
    W: LogWriter + ?Sized,
{
    async fn last_offset(&self, partition: PartitionId) -> Result<Offset, PLogError> {
        (**self).last_offset(partition).await
    }

    async fn put(&self, event: Arc<LogEvent>) -> Result<(), PLogError> {
        (**self).put(event).await
    }
}
