//! Route selection against the mixer engine.

use crate::device::{AudioDevices, InputSource};
use crate::event::{emit, EventCallback, HalEvent};
use crate::route::{
    route_fingerprint, InputSourceId, MixerEngine, OutputDeviceId, RouteTable,
};

/// What the router looks at when choosing a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RouteInputs {
    pub output_devices: AudioDevices,
    pub input_source: InputSource,
    pub input_device: AudioDevices,
}

/// Owns the mixer engine and remembers the last applied route.
pub(crate) struct Router {
    table: RouteTable,
    mixer: Option<Box<dyn MixerEngine>>,
    current_route_id: u32,
}

impl Router {
    pub fn new(table: RouteTable, mixer: Option<Box<dyn MixerEngine>>) -> Self {
        Self {
            table,
            mixer,
            current_route_id: 0,
        }
    }

    pub fn current_route_id(&self) -> u32 {
        self.current_route_id
    }

    /// Brings the mixer in line with `inputs`.
    ///
    /// Returns `true` if the mixer was reprogrammed. Nothing is touched when
    /// the fingerprint matches the current route or no engine is present.
    pub fn select(&mut self, inputs: RouteInputs, events: Option<&EventCallback>) -> bool {
        let device = OutputDeviceId::from_devices(inputs.output_devices);
        let source = InputSourceId::from_source(inputs.input_source);

        let Some(mixer) = self.mixer.as_mut() else {
            tracing::warn!("mixer engine not initialized, route unchanged");
            return false;
        };

        let route_id = route_fingerprint(source, device);
        if route_id == self.current_route_id {
            tracing::trace!(route_id, "route unchanged");
            return false;
        }

        let selection = self.table.resolve(source, device, inputs.input_device);

        mixer.reset();
        if let Some(path) = selection.output_path {
            mixer.apply_path(path);
        }
        if let Some(path) = selection.input_path {
            mixer.apply_path(path);
        }
        mixer.commit();

        self.current_route_id = route_id;
        tracing::debug!(
            route_id,
            ?source,
            ?device,
            output_path = selection.output_path,
            input_path = selection.input_path,
            "route applied"
        );
        emit(
            events,
            HalEvent::RouteApplied {
                route_id,
                output_path: selection.output_path,
                input_path: selection.input_path,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{MixerCall, RecordingMixer};

    fn router() -> (Router, RecordingMixer) {
        let recorder = RecordingMixer::new();
        let router = Router::new(RouteTable::standard(), Some(Box::new(recorder.clone())));
        (router, recorder)
    }

    fn inputs(output_devices: AudioDevices, input_source: InputSource) -> RouteInputs {
        RouteInputs {
            output_devices,
            input_source,
            input_device: AudioDevices::NONE,
        }
    }

    #[test]
    fn test_speaker_playback() {
        let (mut router, recorder) = router();
        assert!(router.select(inputs(AudioDevices::OUT_SPEAKER, InputSource::Default), None));
        assert_eq!(
            recorder.calls(),
            vec![
                MixerCall::Reset,
                MixerCall::ApplyPath("media-speaker".to_string()),
                MixerCall::Commit,
            ]
        );
        assert_eq!(
            router.current_route_id(),
            route_fingerprint(InputSourceId::None, OutputDeviceId::Speaker)
        );
    }

    #[test]
    fn test_idempotent() {
        let (mut router, recorder) = router();
        let speaker = inputs(AudioDevices::OUT_SPEAKER, InputSource::Mic);
        assert!(router.select(speaker, None));
        recorder.clear();
        assert!(!router.select(speaker, None));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn test_unsupported_combination_applies_nothing() {
        let (mut router, recorder) = router();
        let combo = inputs(
            AudioDevices::OUT_SPEAKER | AudioDevices::OUT_BLUETOOTH_SCO,
            InputSource::Default,
        );
        router.select(combo, None);
        assert!(recorder.applied_paths().is_empty());
        assert_eq!(
            router.current_route_id(),
            route_fingerprint(InputSourceId::None, OutputDeviceId::None)
        );
    }

    #[test]
    fn test_voice_recognition_on_speaker() {
        let (mut router, recorder) = router();
        router.select(
            inputs(AudioDevices::OUT_SPEAKER, InputSource::VoiceRecognition),
            None,
        );
        assert_eq!(
            recorder.applied_paths(),
            vec!["voice-rec-speaker".to_string(), "voice-rec-main-mic".to_string()]
        );
    }

    #[test]
    fn test_missing_mixer_leaves_route_id() {
        let mut router = Router::new(RouteTable::standard(), None);
        assert!(!router.select(inputs(AudioDevices::OUT_SPEAKER, InputSource::Mic), None));
        assert_eq!(router.current_route_id(), 0);
    }

    #[test]
    fn test_route_event() {
        use std::sync::Arc;
        use parking_lot::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback = crate::event_callback(move |event| {
            if let HalEvent::RouteApplied { output_path, .. } = event {
                seen_clone.lock().push(output_path);
            }
        });

        let (mut router, _recorder) = router();
        router.select(
            inputs(AudioDevices::OUT_WIRED_HEADSET, InputSource::Default),
            Some(&callback),
        );
        assert_eq!(*seen.lock(), vec![Some("media-headphones")]);
    }
}
