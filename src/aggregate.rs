//! Shared device state.
//!
//! Everything routing depends on lives in [`DeviceState`] behind one mutex,
//! the device lock. Lock order across the crate is:
//!
//! 1. device lock
//! 2. input stream (pre-lock, then stream lock)
//! 3. output stream lock
//!
//! The flags the data path and relay threads poll are mirrored in atomics.
//! They are only written while the device lock is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::bridge::{BridgeContext, ScoBridge, SharedTransform};
use crate::config::{HalConfig, PcmConfig};
use crate::device::{AudioDevices, InputSource};
use crate::event::{emit, EventCallback, HalEvent};
use crate::patch::PatchRegistry;
use crate::pcm::PcmBackend;
use crate::route::{RouteInputs, Router};

/// State guarded by the device lock.
pub(crate) struct DeviceState {
    pub active_output_devices: AudioDevices,
    /// Stored without the input marker bit.
    pub active_input_device: AudioDevices,
    pub active_input_source: InputSource,
    pub hands_free_enabled: bool,
    pub output_streaming: bool,
    pub voice_volume: f32,
    pub master_volume: f32,
    pub primary_output_open: bool,
    pub hfp_config: PcmConfig,
    pub router: Router,
    pub bridge: ScoBridge,
    pub patches: PatchRegistry,
}

impl DeviceState {
    fn route_inputs(&self) -> RouteInputs {
        RouteInputs {
            output_devices: self.active_output_devices,
            input_source: self.active_input_source,
            input_device: self.active_input_device,
        }
    }
}

/// Device-wide context shared by the control surface and every endpoint.
pub(crate) struct DeviceAggregate {
    state: Mutex<DeviceState>,
    hands_free: AtomicBool,
    mic_muted: Arc<AtomicBool>,
    master_muted: AtomicBool,
    backend: Arc<dyn PcmBackend>,
    config: HalConfig,
    transform: Option<SharedTransform>,
    events: Option<EventCallback>,
}

impl DeviceAggregate {
    pub fn new(
        config: HalConfig,
        backend: Arc<dyn PcmBackend>,
        router: Router,
        transform: Option<SharedTransform>,
        events: Option<EventCallback>,
    ) -> Self {
        let state = DeviceState {
            active_output_devices: AudioDevices::NONE,
            active_input_device: AudioDevices::NONE,
            active_input_source: InputSource::Default,
            hands_free_enabled: false,
            output_streaming: false,
            voice_volume: 1.0,
            master_volume: 1.0,
            primary_output_open: false,
            hfp_config: config.hfp_pcm_config,
            router,
            bridge: ScoBridge::new(),
            patches: PatchRegistry::default(),
        };
        Self {
            state: Mutex::new(state),
            hands_free: AtomicBool::new(false),
            mic_muted: Arc::new(AtomicBool::new(false)),
            master_muted: AtomicBool::new(false),
            backend,
            config,
            transform,
            events,
        }
    }

    /// Acquires the device lock.
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock()
    }

    pub fn backend(&self) -> &dyn PcmBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn emit(&self, event: HalEvent) {
        emit(self.events.as_ref(), event);
    }

    pub fn hands_free_enabled(&self) -> bool {
        self.hands_free.load(Ordering::Acquire)
    }

    pub fn mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::Acquire)
    }

    pub fn master_muted(&self) -> bool {
        self.master_muted.load(Ordering::Acquire)
    }

    /// Re-evaluates the route for the current state. Needs the device lock.
    pub fn select_devices(&self, state: &mut DeviceState) -> bool {
        let inputs = state.route_inputs();
        state.router.select(inputs, self.events.as_ref())
    }

    pub fn set_hands_free(&self, state: &mut DeviceState, enabled: bool) {
        state.hands_free_enabled = enabled;
        self.hands_free.store(enabled, Ordering::Release);
    }

    pub fn set_mic_muted(&self, _state: &mut DeviceState, muted: bool) {
        self.mic_muted.store(muted, Ordering::Release);
    }

    pub fn set_master_muted(&self, _state: &mut DeviceState, muted: bool) {
        self.master_muted.store(muted, Ordering::Release);
    }

    /// Starts the hands-free bridge unless it is already running.
    pub fn start_bridge(&self, state: &mut DeviceState) {
        let context = BridgeContext {
            backend: Arc::clone(&self.backend),
            voice: self.config.voice_pcm,
            sco: self.config.sco_pcm,
            config: state.hfp_config,
            mic_muted: Arc::clone(&self.mic_muted),
            transform: self.transform.clone(),
            events: self.events.clone(),
            realtime: self.config.realtime_relays,
        };
        if state.bridge.start(context) {
            self.emit(HalEvent::BridgeStarted);
        }
    }

    /// Stops the hands-free bridge and waits for both relays to exit.
    pub fn stop_bridge(&self, state: &mut DeviceState) {
        if state.bridge.stop() {
            self.emit(HalEvent::BridgeStopped);
        }
    }
}
