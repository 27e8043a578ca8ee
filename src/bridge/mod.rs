//! Bluetooth hands-free bridge.
//!
//! While hands-free is enabled, two relay threads shuttle audio between the
//! voice PCM and the SCO PCM, one period at a time:
//!
//! ```text
//!  uplink   (bt_voice_thread):  voice capture ──► [transform] ──► SCO playback
//!  downlink (bt_sco_thread):    SCO capture   ──► [transform] ──► voice playback
//! ```
//!
//! Each relay opens and closes its own two handles. Stopping the bridge sets a
//! cancel flag, halts every handle the relays registered so blocked transfers
//! return, then joins uplink and downlink in that order.

mod relay;
mod transform;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::PcmConfig;
use crate::event::{emit, EventCallback, HalEvent};
use crate::pcm::{PcmAddress, PcmBackend, PcmInterrupt};

pub use transform::{shared_transform, FrameTransform, Passthrough, SharedTransform};

/// Direction of a relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayLeg {
    /// Voice capture to SCO playback.
    Uplink,
    /// SCO capture to voice playback.
    Downlink,
}

impl RelayLeg {
    fn thread_name(self) -> &'static str {
        match self {
            Self::Uplink => "bt_voice_thread",
            Self::Downlink => "bt_sco_thread",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Uplink => 0,
            Self::Downlink => 1,
        }
    }
}

impl fmt::Display for RelayLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uplink => write!(f, "uplink"),
            Self::Downlink => write!(f, "downlink"),
        }
    }
}

/// Lifecycle of one relay leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegStatus {
    /// Never started.
    #[default]
    Idle,
    /// Relaying periods.
    Running,
    /// Couldn't open its devices and exited.
    Aborted,
    /// Exited after the bridge was stopped.
    Finished,
}

impl LegStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Aborted,
            3 => Self::Finished,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Aborted => 2,
            Self::Finished => 3,
        }
    }
}

/// Counters for one relay leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegStats {
    /// Current lifecycle state.
    pub status: LegStatus,
    /// Periods relayed end to end.
    pub periods: u64,
    /// Transfers that failed with anything but a halted device.
    pub errors: u64,
}

/// Snapshot of the bridge, from the running session or the last one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Relay threads are alive.
    pub running: bool,
    /// Voice → SCO leg.
    pub uplink: LegStats,
    /// SCO → voice leg.
    pub downlink: LegStats,
}

/// What the relays need from the device.
#[derive(Clone)]
pub(crate) struct BridgeContext {
    pub backend: Arc<dyn PcmBackend>,
    pub voice: PcmAddress,
    pub sco: PcmAddress,
    pub config: PcmConfig,
    pub mic_muted: Arc<AtomicBool>,
    pub transform: Option<SharedTransform>,
    pub events: Option<EventCallback>,
    pub realtime: bool,
}

#[derive(Default)]
struct LegCounters {
    status: AtomicU8,
    periods: AtomicU64,
    errors: AtomicU64,
}

impl LegCounters {
    fn snapshot(&self) -> LegStats {
        LegStats {
            status: LegStatus::from_u8(self.status.load(Ordering::SeqCst)),
            periods: self.periods.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the controller and both relays.
pub(crate) struct BridgeShared {
    cancel: AtomicBool,
    interrupters: Mutex<Vec<Arc<dyn PcmInterrupt>>>,
    legs: [LegCounters; 2],
}

impl BridgeShared {
    fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            interrupters: Mutex::new(Vec::new()),
            legs: [LegCounters::default(), LegCounters::default()],
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Records a handle the controller must halt on stop. A handle registered
    /// after cancellation is halted right away.
    fn register(&self, interrupter: Arc<dyn PcmInterrupt>) {
        let mut interrupters = self.interrupters.lock();
        if self.is_cancelled() {
            interrupter.interrupt();
        }
        interrupters.push(interrupter);
    }

    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        for interrupter in self.interrupters.lock().iter() {
            interrupter.interrupt();
        }
    }

    fn leg(&self, leg: RelayLeg) -> &LegCounters {
        &self.legs[leg.slot()]
    }

    fn set_status(&self, leg: RelayLeg, status: LegStatus) {
        self.leg(leg).status.store(status.as_u8(), Ordering::SeqCst);
    }

    fn stats(&self, running: bool) -> BridgeStats {
        BridgeStats {
            running,
            uplink: self.leg(RelayLeg::Uplink).snapshot(),
            downlink: self.leg(RelayLeg::Downlink).snapshot(),
        }
    }
}

struct BridgeSession {
    shared: Arc<BridgeShared>,
    uplink: Option<JoinHandle<()>>,
    downlink: Option<JoinHandle<()>>,
    transform: Option<SharedTransform>,
}

/// Start/stop controller for the relay pair.
///
/// Lives in the device state, so start and stop are serialised by the device
/// lock.
pub(crate) struct ScoBridge {
    session: Option<BridgeSession>,
    last: Option<Arc<BridgeShared>>,
}

impl ScoBridge {
    pub fn new() -> Self {
        Self {
            session: None,
            last: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Spawns both relays. Returns `false` if they were already running.
    pub fn start(&mut self, context: BridgeContext) -> bool {
        if self.session.is_some() {
            tracing::debug!("hands-free bridge already running");
            return false;
        }

        let shared = Arc::new(BridgeShared::new());
        let transform = context.transform.clone();
        let uplink = Self::spawn_leg(RelayLeg::Uplink, &context, &shared);
        let downlink = Self::spawn_leg(RelayLeg::Downlink, &context, &shared);

        tracing::info!(
            voice = %context.voice,
            sco = %context.sco,
            rate = context.config.rate,
            "hands-free bridge started"
        );
        self.session = Some(BridgeSession {
            shared,
            uplink,
            downlink,
            transform,
        });
        true
    }

    fn spawn_leg(
        leg: RelayLeg,
        context: &BridgeContext,
        shared: &Arc<BridgeShared>,
    ) -> Option<JoinHandle<()>> {
        match relay::spawn(leg, context.clone(), Arc::clone(shared)) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(%leg, error = %e, "failed to spawn relay thread");
                shared.set_status(leg, LegStatus::Aborted);
                emit(
                    context.events.as_ref(),
                    HalEvent::RelayAborted {
                        leg,
                        error: e.to_string(),
                    },
                );
                None
            }
        }
    }

    /// Cancels and joins both relays. Returns `false` if nothing was running.
    pub fn stop(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };

        session.shared.cancel();
        for handle in [session.uplink.take(), session.downlink.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                tracing::error!("relay thread panicked");
            }
        }
        if let Some(transform) = &session.transform {
            transform.lock().release();
        }

        let stats = session.shared.stats(false);
        tracing::info!(
            uplink_periods = stats.uplink.periods,
            downlink_periods = stats.downlink.periods,
            "hands-free bridge stopped"
        );
        self.last = Some(session.shared);
        true
    }

    pub fn stats(&self) -> BridgeStats {
        match (&self.session, &self.last) {
            (Some(session), _) => session.shared.stats(true),
            (None, Some(last)) => last.stats(false),
            (None, None) => BridgeStats::default(),
        }
    }
}

impl Drop for ScoBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{bytes_to_samples, samples_to_bytes};
    use crate::pcm::{MockPcmBackend, Pcm, PcmBackend, PcmDirection, PcmMode};
    use crate::PcmError;
    use std::time::{Duration, Instant};

    const VOICE: PcmAddress = PcmAddress::new(0, 2);
    const SCO: PcmAddress = PcmAddress::new(1, 0);

    fn context(backend: &MockPcmBackend) -> BridgeContext {
        BridgeContext {
            backend: Arc::new(backend.clone()),
            voice: VOICE,
            sco: SCO,
            config: PcmConfig::bt_sco(),
            mic_muted: Arc::new(AtomicBool::new(false)),
            transform: None,
            events: None,
            realtime: false,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_leg_display() {
        assert_eq!(RelayLeg::Uplink.to_string(), "uplink");
        assert_eq!(RelayLeg::Downlink.to_string(), "downlink");
    }

    #[test]
    fn test_leg_status_roundtrip() {
        for status in [
            LegStatus::Idle,
            LegStatus::Running,
            LegStatus::Aborted,
            LegStatus::Finished,
        ] {
            assert_eq!(LegStatus::from_u8(status.as_u8()), status);
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let backend = MockPcmBackend::new();
        let mut bridge = ScoBridge::new();
        assert!(bridge.start(context(&backend)));
        assert!(!bridge.start(context(&backend)));
        assert!(wait_for(|| backend.live_handles() == 4));
        assert!(bridge.stop());
        assert!(!bridge.stop());
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.opened_count(), 4);
    }

    #[test]
    fn test_stop_reports_finished_legs() {
        let backend = MockPcmBackend::new();
        let mut bridge = ScoBridge::new();
        bridge.start(context(&backend));
        assert!(wait_for(|| bridge.stats().uplink.periods > 0));
        bridge.stop();

        let stats = bridge.stats();
        assert!(!stats.running);
        assert_eq!(stats.uplink.status, LegStatus::Finished);
        assert_eq!(stats.downlink.status, LegStatus::Finished);
    }

    #[test]
    fn test_downlink_relays_sco_capture() {
        let backend = MockPcmBackend::new();
        let mut samples = vec![0u8; 256];
        samples_to_bytes(&[1000i16; 128], &mut samples);
        backend.feed_capture(SCO, &samples);

        let mut bridge = ScoBridge::new();
        bridge.start(context(&backend));
        assert!(wait_for(|| backend.write_count(VOICE) > 0));
        bridge.stop();

        let played = backend.played(VOICE);
        let mut first = vec![0i16; 128];
        bytes_to_samples(&played[..256], &mut first);
        assert!(first.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_register_after_cancel_interrupts() {
        let backend = MockPcmBackend::new();
        let mut pcm: Box<dyn Pcm> = backend
            .open(VOICE, PcmDirection::Capture, PcmMode::Blocking, &PcmConfig::bt_sco())
            .unwrap();
        let shared = BridgeShared::new();
        shared.cancel();
        shared.register(pcm.interrupter());
        let mut buf = [0u8; 2];
        assert_eq!(pcm.read(&mut buf), Err(PcmError::BadState));
    }

    #[test]
    fn test_one_sided_open_failure() {
        let backend = MockPcmBackend::new();
        backend.fail_open(SCO, PcmDirection::Capture);

        let mut bridge = ScoBridge::new();
        bridge.start(context(&backend));
        assert!(wait_for(|| bridge.stats().downlink.status == LegStatus::Aborted));
        assert!(wait_for(|| bridge.stats().uplink.periods > 0));
        bridge.stop();

        // The downlink's voice playback handle was released on abort
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(backend.write_count(VOICE), 0);
    }
}
