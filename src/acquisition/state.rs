//! Device lifecycle states.

use std::fmt;

/// Lifecycle of a device handle.
///
/// Buffers are allocated in every state except `Idle` (and during the
/// first steps of `Initializing`). The device captures only in `Acquiring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Initializing,
    Acquiring,
    Stopping,
}

impl AcquisitionState {
    /// Returns true while the device is capturing.
    pub fn is_acquiring(self) -> bool {
        self == Self::Acquiring
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Acquiring => "acquiring",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}
