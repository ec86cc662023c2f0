//! Start priority of a module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Start priority: lower values start earlier.
///
/// The named levels leave room between them so a bundle can slot a module in
/// between two well-known ones (e.g. `Priority(Priority::HIGH.0 + 1)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const HIGHER: Priority = Priority(1024);
    pub const HIGH: Priority = Priority(2048);
    pub const MEDIUM: Priority = Priority(3072);
    pub const LOW: Priority = Priority(4096);
    pub const LOWER: Priority = Priority(5120);
    pub const LOWEST: Priority = Priority(6144);

    /// Priority used by modules that don't override [`crate::Module::priority`].
    pub const DEFAULT: Priority = Priority::MEDIUM;

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
