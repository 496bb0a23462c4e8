//! Strongly-typed identifiers used across the platform.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Position of an event inside one partition's log.
///
/// Offsets start at `1`; [`Offset::NULL`] (`0`) means "nothing processed yet".
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(u64);

/// Identifier of a log partition.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u16);

/// Identifier of a workspace (the unit that owns records and views).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(u64);

/// Identifier of a notification channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

macro_rules! impl_numeric_newtype {
    ($t:ty, $inner:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$inner> for $t {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $inner {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = <$inner>::from_str(s)
                    .map_err(|e| CoreError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_numeric_newtype!(Offset, u64, "Offset");
impl_numeric_newtype!(PartitionId, u16, "PartitionId");
impl_numeric_newtype!(WorkspaceId, u64, "WorkspaceId");

impl Offset {
    /// Sentinel for "no event processed yet".
    pub const NULL: Offset = Offset(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The offset right after this one.
    pub const fn next(self) -> Offset {
        Offset(self.0 + 1)
    }

    /// Number of offsets in `(self, until]`; zero when `until` is not ahead.
    pub const fn distance_to(self, until: Offset) -> u64 {
        until.0.saturating_sub(self.0)
    }
}

impl WorkspaceId {
    /// Workspace used for application-wide records (e.g. actualizer offsets).
    pub const NULL: WorkspaceId = WorkspaceId(0);
}

impl From<PartitionId> for WorkspaceId {
    /// Partition-scoped notifications are keyed by the partition number used as
    /// a workspace id.
    fn from(value: PartitionId) -> Self {
        WorkspaceId(u64::from(value.0))
    }
}

impl ChannelId {
    /// Create a new channel identifier (UUIDv7, time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ChannelId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| CoreError::invalid_id(format!("ChannelId: {e}")))?;
        Ok(Self(uuid))
    }
}
