//! Mixer engine seam.

use std::sync::Arc;

use parking_lot::Mutex;

/// Engine that programs the codec's mixer from named paths.
///
/// A routing change is always `reset`, zero or more `apply_path` calls, then
/// `commit`. Applying an already-applied path must be harmless.
pub trait MixerEngine: Send {
    /// Returns all controls to their defaults (not yet written to hardware).
    fn reset(&mut self);

    /// Stages the controls of the named path.
    fn apply_path(&mut self, name: &str);

    /// Writes staged controls to hardware.
    fn commit(&mut self);
}

/// One call made on a [`RecordingMixer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerCall {
    /// `reset()`
    Reset,
    /// `apply_path(name)`
    ApplyPath(String),
    /// `commit()`
    Commit,
}

/// Mixer engine that records calls instead of touching hardware.
///
/// Clones share one log, so a test can hand one clone to the HAL and inspect
/// the other.
///
/// # Example
///
/// ```
/// use audio_hal::{MixerCall, MixerEngine, RecordingMixer};
///
/// let recorder = RecordingMixer::new();
/// let mut engine = recorder.clone();
/// engine.reset();
/// engine.apply_path("media-speaker");
/// engine.commit();
///
/// assert_eq!(recorder.applied_paths(), vec!["media-speaker".to_string()]);
/// assert_eq!(recorder.commits(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingMixer {
    calls: Arc<Mutex<Vec<MixerCall>>>,
}

impl RecordingMixer {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MixerCall> {
        self.calls.lock().clone()
    }

    /// Names passed to `apply_path`, in order.
    #[must_use]
    pub fn applied_paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MixerCall::ApplyPath(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `commit` calls.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| **call == MixerCall::Commit)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl MixerEngine for RecordingMixer {
    fn reset(&mut self) {
        self.calls.lock().push(MixerCall::Reset);
    }

    fn apply_path(&mut self, name: &str) {
        self.calls.lock().push(MixerCall::ApplyPath(name.to_string()));
    }

    fn commit(&mut self) {
        self.calls.lock().push(MixerCall::Commit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_mixer_shares_log() {
        let recorder = RecordingMixer::new();
        let mut engine = recorder.clone();
        engine.reset();
        engine.apply_path("bt-sco-headset");
        engine.commit();

        assert_eq!(
            recorder.calls(),
            vec![
                MixerCall::Reset,
                MixerCall::ApplyPath("bt-sco-headset".to_string()),
                MixerCall::Commit,
            ]
        );
    }

    #[test]
    fn test_clear() {
        let recorder = RecordingMixer::new();
        let mut engine = recorder.clone();
        engine.commit();
        recorder.clear();
        assert!(recorder.calls().is_empty());
        assert_eq!(recorder.commits(), 0);
    }
}
