//! Audio patches: host-declared source → sink connections.

use std::collections::HashMap;
use std::fmt;

use crate::device::AudioDevices;
use crate::HalError;

/// Opaque handle for a created patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchHandle(u32);

impl PatchHandle {
    /// Raw handle value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One end of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPort {
    /// A physical device.
    Device(AudioDevices),
    /// A stream endpoint, by the host's I/O handle.
    Mix(u32),
}

/// A source → sink connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPatch {
    /// Ports audio flows from.
    pub sources: Vec<AudioPort>,
    /// Ports audio flows to.
    pub sinks: Vec<AudioPort>,
}

/// Patches created on one device.
#[derive(Debug, Default)]
pub(crate) struct PatchRegistry {
    last_patch_id: u32,
    patches: HashMap<PatchHandle, AudioPatch>,
}

impl PatchRegistry {
    pub fn create(
        &mut self,
        sources: &[AudioPort],
        sinks: &[AudioPort],
    ) -> Result<PatchHandle, HalError> {
        if sources.is_empty() || sinks.is_empty() {
            return Err(HalError::EmptyPatch);
        }
        self.last_patch_id = self.last_patch_id.wrapping_add(1);
        let handle = PatchHandle(self.last_patch_id);
        self.patches.insert(
            handle,
            AudioPatch {
                sources: sources.to_vec(),
                sinks: sinks.to_vec(),
            },
        );
        Ok(handle)
    }

    pub fn release(&mut self, handle: PatchHandle) -> Result<AudioPatch, HalError> {
        self.patches
            .remove(&handle)
            .ok_or(HalError::UnknownPatch { handle })
    }

    pub fn get(&self, handle: PatchHandle) -> Option<&AudioPatch> {
        self.patches.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }
}
