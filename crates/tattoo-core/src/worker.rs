//! Worker identity.

use serde::{Deserialize, Serialize};

/// A `(name, arch)` pair identifying a connected Tester, or the empty
/// Controller sentinel (`arch` empty).
///
/// `arch` may carry a leading `~` marking a *keyword* (unstable) request
/// channel rather than a stabilisation one; [`Worker::canonical_arch`] strips
/// it for comparisons against bug `cc` addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub arch: String,
}

impl Worker {
    pub fn new(name: impl Into<String>, arch: impl Into<String>) -> Self {
        Worker {
            name: name.into(),
            arch: arch.into(),
        }
    }

    /// The Controller sentinel: empty name and arch.
    pub fn controller() -> Self {
        Worker::new("", "")
    }

    /// `arch` without a leading `~` marker.
    pub fn canonical_arch(&self) -> &str {
        self.arch.strip_prefix('~').unwrap_or(&self.arch)
    }

    /// True if this worker handles keyword (unstable) requests rather than
    /// stabilisation requests.
    pub fn is_rekeyword(&self) -> bool {
        self.arch.starts_with('~')
    }

    /// Empty `arch` marks a Controller connection rather than a Tester.
    pub fn is_controller(&self) -> bool {
        self.arch.is_empty()
    }
}
