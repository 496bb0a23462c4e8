use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use strata_core::{Offset, PartitionId};
use strata_events::{LogEvent, NewEvent};

use super::r#trait::{EventCallback, LogReader, LogWriter, PLogError, ReadLimit};

/// In-memory PLog.
///
/// Intended for tests/dev. Offsets start at 1 in every partition.
#[derive(Debug, Default)]
pub struct InMemoryPLog {
    partitions: RwLock<HashMap<PartitionId, Vec<Arc<LogEvent>>>>,
}

impl InMemoryPLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the next offset of the event's partition.
    pub fn append(&self, partition: PartitionId, event: NewEvent) -> Result<Arc<LogEvent>, PLogError> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| PLogError::Storage("lock poisoned".to_string()))?;
        let log = partitions.entry(partition).or_default();
        let offset = Offset::new(log.len() as u64 + 1);
        let event = Arc::new(event.into_log_event(partition, offset));
        log.push(event.clone());
        Ok(event)
    }

    fn slice(&self, partition: PartitionId, from: Offset) -> Result<Vec<Arc<LogEvent>>, PLogError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| PLogError::Storage("lock poisoned".to_string()))?;
        let Some(log) = partitions.get(&partition) else {
            return Ok(Vec::new());
        };
        let start = from.get().max(1) as usize - 1;
        Ok(log.get(start..).map(<[_]>::to_vec).unwrap_or_default())
    }
}

#[async_trait]
impl LogReader for InMemoryPLog {
    async fn read_plog(
        &self,
        partition: PartitionId,
        from: Offset,
        limit: ReadLimit,
        callback: &mut EventCallback<'_>,
    ) -> Result<(), PLogError> {
        // Snapshot first so the callback never runs under the lock.
        let events = self.slice(partition, from)?;

        let mut delivered = 0u64;
        for event in events {
            if !limit.allows(delivered) {
                break;
            }
            delivered += 1;
            if let ControlFlow::Break(()) = callback(event) {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LogWriter for InMemoryPLog {
    async fn last_offset(&self, partition: PartitionId) -> Result<Offset, PLogError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| PLogError::Storage("lock poisoned".to_string()))?;
        let len = partitions.get(&partition).map_or(0, Vec::len);
        Ok(Offset::new(len as u64))
    }

    async fn put(&self, event: Arc<LogEvent>) -> Result<(), PLogError> {
        let partition = event.partition();
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| PLogError::Storage("lock poisoned".to_string()))?;
        let log = partitions.entry(partition).or_default();

        let expected = Offset::new(log.len() as u64 + 1);
        if event.offset() != expected {
            return Err(PLogError::OffsetMismatch {
                partition,
                expected,
                found: event.offset(),
            });
        }
        log.push(event);
        Ok(())
    }
}
