//! Mock PCM backend for testing without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::config::PcmConfig;
use crate::format::buffer_duration;
use crate::pcm::{
    MmapPosition, Pcm, PcmAddress, PcmBackend, PcmDirection, PcmInterrupt, PcmMode, PcmTimestamp,
};
use crate::PcmError;

/// Capture bytes that can be queued per address.
const FEED_CAPACITY: usize = 1 << 20;

type LineKey = (PcmAddress, PcmDirection);

#[derive(Default)]
struct Faults {
    open: HashSet<LineKey>,
    prepare: HashSet<LineKey>,
    io: HashMap<LineKey, usize>,
    underruns: HashSet<PcmAddress>,
}

/// Per-address state shared by every handle opened on it.
struct Line {
    feed: Mutex<HeapRb<u8>>,
    played: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl Line {
    fn new() -> Self {
        Self {
            feed: Mutex::new(HeapRb::new(FEED_CAPACITY)),
            played: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
}

struct Shared {
    epoch: Instant,
    opened: AtomicUsize,
    live: AtomicUsize,
    faults: Mutex<Faults>,
    lines: Mutex<HashMap<PcmAddress, Arc<Line>>>,
}

impl Shared {
    fn line(&self, address: PcmAddress) -> Arc<Line> {
        self.lines
            .lock()
            .entry(address)
            .or_insert_with(|| Arc::new(Line::new()))
            .clone()
    }

    fn take_underrun(&self, address: PcmAddress) -> bool {
        self.faults.lock().underruns.remove(&address)
    }

    fn take_io_fault(&self, key: LineKey) -> bool {
        let mut faults = self.faults.lock();
        match faults.io.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// A PCM backend that paces transfers in real time without touching hardware.
///
/// Capture handles return bytes queued with [`feed_capture`] (silence once the
/// queue runs dry); playback handles record what they are given. Every
/// transfer blocks for the duration of its buffer, so relay loops run at
/// their real rate. Faults can be injected per address and direction, and
/// handle counters show whether everything opened was closed again.
///
/// Playback handles honour the configured thresholds: the device counts as
/// running once `start_threshold` frames are queued, and an injected
/// [`underrun`] fails the next write with [`PcmError::Xrun`] unless
/// `stop_threshold` is `u32::MAX`. Like a kernel driver the handle recovers
/// on its own after reporting the xrun.
///
/// Clones share state: keep one as a recorder and hand another to the HAL.
///
/// # Example
///
/// ```
/// use audio_hal::{
///     MockPcmBackend, Pcm, PcmAddress, PcmBackend, PcmConfig, PcmDirection, PcmMode,
/// };
///
/// let backend = MockPcmBackend::new();
/// let address = PcmAddress::new(0, 2);
/// backend.feed_capture(address, &[1, 0, 2, 0]);
///
/// let mut pcm = backend
///     .open(address, PcmDirection::Capture, PcmMode::Blocking, &PcmConfig::bt_sco())
///     .unwrap();
/// let mut buf = [0u8; 4];
/// pcm.read(&mut buf).unwrap();
/// assert_eq!(buf, [1, 0, 2, 0]);
///
/// drop(pcm);
/// assert_eq!(backend.live_handles(), 0);
/// ```
///
/// [`feed_capture`]: MockPcmBackend::feed_capture
/// [`underrun`]: MockPcmBackend::underrun
#[derive(Clone)]
pub struct MockPcmBackend {
    shared: Arc<Shared>,
}

impl Default for MockPcmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPcmBackend {
    /// Creates a backend with no faults and empty capture queues.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                epoch: Instant::now(),
                opened: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                faults: Mutex::new(Faults::default()),
                lines: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Makes every open of `address` in `direction` fail with [`PcmError::Busy`].
    pub fn fail_open(&self, address: PcmAddress, direction: PcmDirection) {
        self.shared.faults.lock().open.insert((address, direction));
    }

    /// Makes every prepare of `address` in `direction` fail.
    pub fn fail_prepare(&self, address: PcmAddress, direction: PcmDirection) {
        self.shared.faults.lock().prepare.insert((address, direction));
    }

    /// Makes the next `count` transfers on `address` in `direction` fail.
    pub fn fail_io(&self, address: PcmAddress, direction: PcmDirection, count: usize) {
        *self
            .shared
            .faults
            .lock()
            .io
            .entry((address, direction))
            .or_insert(0) += count;
    }

    /// Drains the playback buffer on `address` before the next write.
    pub fn underrun(&self, address: PcmAddress) {
        self.shared.faults.lock().underruns.insert(address);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        *self.shared.faults.lock() = Faults::default();
    }

    /// Queues bytes for capture handles on `address`. Returns how many fit.
    pub fn feed_capture(&self, address: PcmAddress, bytes: &[u8]) -> usize {
        self.shared.line(address).feed.lock().push_slice(bytes)
    }

    /// Everything written to playback handles on `address`.
    #[must_use]
    pub fn played(&self, address: PcmAddress) -> Vec<u8> {
        self.shared.line(address).played.lock().clone()
    }

    /// Successful playback writes on `address`.
    #[must_use]
    pub fn write_count(&self, address: PcmAddress) -> usize {
        self.shared.line(address).writes.load(Ordering::SeqCst)
    }

    /// Successful capture reads on `address`.
    #[must_use]
    pub fn read_count(&self, address: PcmAddress) -> usize {
        self.shared.line(address).reads.load(Ordering::SeqCst)
    }

    /// Handles opened since creation.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Handles currently open.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

impl PcmBackend for MockPcmBackend {
    fn open(
        &self,
        address: PcmAddress,
        direction: PcmDirection,
        mode: PcmMode,
        config: &PcmConfig,
    ) -> Result<Box<dyn Pcm>, PcmError> {
        if self.shared.faults.lock().open.contains(&(address, direction)) {
            return Err(PcmError::Busy);
        }

        let mapped = match mode {
            PcmMode::Mmap => vec![0u8; config.buffer_frames() as usize * config.frame_size()],
            PcmMode::Blocking => Vec::new(),
        };

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(%address, ?direction, ?mode, "mock pcm opened");

        Ok(Box::new(MockPcm {
            address,
            direction,
            mode,
            config: *config,
            line: self.shared.line(address),
            shared: Arc::clone(&self.shared),
            control: Arc::new(Control::default()),
            mapped,
            started_at: None,
            queued: 0,
            running: false,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Default)]
struct Control {
    halted: Mutex<bool>,
    wake: Condvar,
}

impl Control {
    fn halt(&self) {
        *self.halted.lock() = true;
        self.wake.notify_all();
    }

    fn resume(&self) {
        *self.halted.lock() = false;
    }

    /// Sleeps for `duration` unless halted first.
    fn pace(&self, duration: Duration) -> Result<(), PcmError> {
        let deadline = Instant::now() + duration;
        let mut halted = self.halted.lock();
        while !*halted {
            if self.wake.wait_until(&mut halted, deadline).timed_out() {
                break;
            }
        }
        if *halted {
            Err(PcmError::BadState)
        } else {
            Ok(())
        }
    }
}

impl PcmInterrupt for Control {
    fn interrupt(&self) {
        self.halt();
    }
}

struct MockPcm {
    address: PcmAddress,
    direction: PcmDirection,
    mode: PcmMode,
    config: PcmConfig,
    line: Arc<Line>,
    shared: Arc<Shared>,
    control: Arc<Control>,
    mapped: Vec<u8>,
    started_at: Option<Instant>,
    /// Playback frames queued since the last prepare.
    queued: u32,
    running: bool,
}

impl MockPcm {
    fn transfer_time(&self, bytes: usize) -> Duration {
        buffer_duration(bytes, self.config.frame_size(), self.config.rate)
    }

    fn check_io(&self) -> Result<(), PcmError> {
        if self.shared.take_io_fault((self.address, self.direction)) {
            return Err(PcmError::io("injected fault"));
        }
        Ok(())
    }

    fn check_underrun(&mut self) -> Result<(), PcmError> {
        if !self.shared.take_underrun(self.address) {
            return Ok(());
        }
        if self.config.stop_threshold == u32::MAX {
            tracing::trace!(address = %self.address, "underrun ignored, device keeps running");
            return Ok(());
        }
        self.queued = 0;
        self.running = false;
        Err(PcmError::Xrun)
    }

    fn queue(&mut self, frames: u32) {
        self.queued = self.queued.saturating_add(frames);
        if self.queued >= self.config.start_threshold.max(1) {
            self.running = true;
        }
    }
}

impl Pcm for MockPcm {
    fn address(&self) -> PcmAddress {
        self.address
    }

    fn direction(&self) -> PcmDirection {
        self.direction
    }

    fn config(&self) -> &PcmConfig {
        &self.config
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        if self
            .shared
            .faults
            .lock()
            .prepare
            .contains(&(self.address, self.direction))
        {
            return Err(PcmError::io("prepare failed"));
        }
        self.control.resume();
        self.queued = 0;
        self.running = false;
        Ok(())
    }

    fn start(&mut self) -> Result<(), PcmError> {
        self.started_at = Some(Instant::now());
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PcmError> {
        self.started_at = None;
        self.running = false;
        self.control.halt();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), PcmError> {
        if self.direction != PcmDirection::Capture {
            return Err(PcmError::Unsupported);
        }
        self.check_io()?;
        self.control.pace(self.transfer_time(buf.len()))?;

        let filled = self.line.feed.lock().pop_slice(buf);
        buf[filled..].fill(0);
        self.line.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), PcmError> {
        if self.direction != PcmDirection::Playback {
            return Err(PcmError::Unsupported);
        }
        self.check_io()?;
        self.check_underrun()?;
        self.control.pace(self.transfer_time(buf.len()))?;

        self.queue((buf.len() / self.config.frame_size().max(1)) as u32);
        self.line.played.lock().extend_from_slice(buf);
        self.line.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn htimestamp(&self) -> Result<PcmTimestamp, PcmError> {
        let avail = match self.direction {
            // Once running, playback drains instantly and the whole buffer is free.
            PcmDirection::Playback if self.running => self.config.buffer_frames(),
            PcmDirection::Playback => self.config.buffer_frames().saturating_sub(self.queued),
            PcmDirection::Capture => {
                let queued = self.line.feed.lock().occupied_len() / self.config.frame_size().max(1);
                (queued as u32).min(self.config.buffer_frames())
            }
        };
        Ok(PcmTimestamp {
            avail,
            time: self.shared.epoch.elapsed(),
        })
    }

    fn mmap_begin(&mut self) -> Result<&mut [u8], PcmError> {
        match self.mode {
            PcmMode::Mmap => Ok(&mut self.mapped),
            PcmMode::Blocking => Err(PcmError::Unsupported),
        }
    }

    fn mmap_commit(&mut self, frames: u32) -> Result<(), PcmError> {
        match self.mode {
            PcmMode::Mmap if frames <= self.config.buffer_frames() => Ok(()),
            PcmMode::Mmap => Err(PcmError::io("commit beyond mapped buffer")),
            PcmMode::Blocking => Err(PcmError::Unsupported),
        }
    }

    fn mmap_position(&self) -> Result<MmapPosition, PcmError> {
        if self.mode != PcmMode::Mmap {
            return Err(PcmError::Unsupported);
        }
        let position_frames = self.started_at.map_or(0, |started| {
            (started.elapsed().as_micros() * u128::from(self.config.rate) / 1_000_000) as i64
        });
        Ok(MmapPosition {
            position_frames,
            time_nanos: self.shared.epoch.elapsed().as_nanos() as i64,
        })
    }

    fn interrupter(&self) -> Arc<dyn PcmInterrupt> {
        self.control.clone()
    }
}

impl Drop for MockPcm {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(address = %self.address, direction = ?self.direction, "mock pcm closed");
    }
}
