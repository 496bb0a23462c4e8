//! Qualified names for types, projectors, views and applications.

use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Package name reserved for platform-defined types.
pub const SYS_PACKAGE: &str = "sys";

/// A `package.entity` name.
///
/// Cheap to clone; names are shared by descriptors, events and metric keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    full: Arc<str>,
    dot: usize,
}

impl QName {
    /// Build a name from its two parts.
    pub fn new(package: &str, entity: &str) -> Result<Self, CoreError> {
        Self::from_str(&format!("{package}.{entity}"))
    }

    /// A name in the platform `sys` package.
    ///
    /// Only used with literal entity names, which are always valid.
    pub fn sys(entity: &str) -> Self {
        let full: Arc<str> = Arc::from(format!("{SYS_PACKAGE}.{entity}"));
        Self {
            full,
            dot: SYS_PACKAGE.len(),
        }
    }

    pub fn package(&self) -> &str {
        &self.full[..self.dot]
    }

    pub fn entity(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn is_sys(&self) -> bool {
        self.package() == SYS_PACKAGE
    }
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for QName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dot = s
            .find('.')
            .ok_or_else(|| CoreError::invalid_qname(format!("{s:?}: missing '.'")))?;
        let (package, entity) = (&s[..dot], &s[dot + 1..]);
        if !is_identifier(package) || !is_identifier(entity) {
            return Err(CoreError::invalid_qname(format!("{s:?}: expected package.entity")));
        }
        Ok(Self {
            full: Arc::from(s),
            dot,
        })
    }
}

impl core::fmt::Display for QName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.full)
    }
}

impl core::fmt::Debug for QName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "QName({})", self.full)
    }
}

impl Serialize for QName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}

impl<'de> Deserialize<'de> for QName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        QName::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// An application name, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(Arc<str>);

impl AppName {
    pub fn new(owner: &str, name: &str) -> Result<Self, CoreError> {
        Self::from_str(&format!("{owner}/{name}"))
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(owner, _)| owner).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, name)| name).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AppName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self(Arc::from(s)))
            }
            _ => Err(CoreError::invalid_app_name(format!("{s:?}: expected owner/name"))),
        }
    }
}

impl TryFrom<String> for AppName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AppName::from_str(&value)
    }
}

impl From<AppName> for String {
    fn from(value: AppName) -> Self {
        value.0.to_string()
    }
}

impl core::fmt::Display for AppName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
