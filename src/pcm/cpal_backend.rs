//! Blocking PCM handles over CPAL streams.
//!
//! CPAL is callback driven; the HAL wants blocking transfers. Each handle owns
//! an SPSC ring between the CPAL callback and the caller. The CPAL stream lives
//! on a small owner thread, because `cpal::Stream` is not `Send` on every
//! platform; dropping the handle tells that thread to drop the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig as CpalStreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::PcmConfig;
use crate::format::{bytes_to_samples, samples_to_bytes, AudioFormat};
use crate::pcm::{
    Pcm, PcmAddress, PcmBackend, PcmDirection, PcmInterrupt, PcmMode, PcmTimestamp,
};
use crate::PcmError;

/// Ring capacity in hardware buffers.
const RING_BUFFERS: usize = 4;

/// PCM backend that maps card indices onto CPAL devices of the default host.
///
/// `card` selects the n-th device of the requested direction (falling back to
/// the host default); `device` is ignored. Only blocking 16-bit mode is
/// supported.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Creates the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn find_device(address: PcmAddress, direction: PcmDirection) -> Result<Device, PcmError> {
        let host = cpal::default_host();
        let devices = match direction {
            PcmDirection::Playback => host.output_devices(),
            PcmDirection::Capture => host.input_devices(),
        }
        .map_err(|e| PcmError::Backend(e.to_string()))?;

        if let Some(device) = devices.into_iter().nth(address.card as usize) {
            return Ok(device);
        }

        match direction {
            PcmDirection::Playback => host.default_output_device(),
            PcmDirection::Capture => host.default_input_device(),
        }
        .ok_or(PcmError::NotFound)
    }
}

impl PcmBackend for CpalBackend {
    fn open(
        &self,
        address: PcmAddress,
        direction: PcmDirection,
        mode: PcmMode,
        config: &PcmConfig,
    ) -> Result<Box<dyn Pcm>, PcmError> {
        if mode != PcmMode::Blocking || config.format != AudioFormat::Pcm16Bit {
            return Err(PcmError::Unsupported);
        }

        let capacity =
            config.buffer_frames() as usize * config.channels as usize * RING_BUFFERS;
        let (producer, consumer) = HeapRb::<i16>::new(capacity.max(1)).split();
        let cpal_config = CpalStreamConfig {
            channels: config.channels as u16,
            sample_rate: cpal::SampleRate(config.rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PcmError>>();
        let (close_tx, close_rx) = mpsc::channel::<()>();

        let (ring, callback_end) = match direction {
            PcmDirection::Playback => (Ring::Playback(producer), CallbackEnd::Playback(consumer)),
            PcmDirection::Capture => (Ring::Capture(consumer), CallbackEnd::Capture(producer)),
        };

        let owner = std::thread::Builder::new()
            .name(format!("pcm-{}-{}", address.card, address.device))
            .spawn(move || {
                let stream = match Self::find_device(address, direction)
                    .and_then(|device| build_stream(&device, &cpal_config, callback_end))
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PcmError::Backend(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Blocks until the handle is dropped.
                let _ = close_rx.recv();
                drop(stream);
            })
            .map_err(|e| PcmError::Backend(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| PcmError::Backend("pcm owner thread exited".to_string()))??;

        tracing::debug!(%address, ?direction, rate = config.rate, "cpal pcm opened");

        Ok(Box::new(CpalPcm {
            address,
            direction,
            config: *config,
            ring,
            control: Arc::new(CpalControl::default()),
            epoch: Instant::now(),
            scratch: Vec::new(),
            close_tx: Some(close_tx),
            owner: Some(owner),
        }))
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}

enum Ring {
    Playback(HeapProd<i16>),
    Capture(HeapCons<i16>),
}

enum CallbackEnd {
    Playback(HeapCons<i16>),
    Capture(HeapProd<i16>),
}

fn build_stream(
    device: &Device,
    config: &CpalStreamConfig,
    end: CallbackEnd,
) -> Result<Stream, PcmError> {
    let on_error = |err| tracing::error!("Audio stream error: {}", err);
    let stream = match end {
        CallbackEnd::Playback(mut consumer) => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let filled = consumer.pop_slice(data);
                data[filled..].fill(0);
            },
            on_error,
            None,
        ),
        CallbackEnd::Capture(mut producer) => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Non-blocking push - drops samples if the reader fell behind
                let _ = producer.push_slice(data);
            },
            on_error,
            None,
        ),
    };
    stream.map_err(|e| PcmError::Backend(e.to_string()))
}

#[derive(Default)]
struct CpalControl {
    halted: AtomicBool,
}

impl PcmInterrupt for CpalControl {
    fn interrupt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

struct CpalPcm {
    address: PcmAddress,
    direction: PcmDirection,
    config: PcmConfig,
    ring: Ring,
    control: Arc<CpalControl>,
    epoch: Instant,
    scratch: Vec<i16>,
    close_tx: Option<mpsc::Sender<()>>,
    owner: Option<JoinHandle<()>>,
}

impl CpalPcm {
    /// Poll interval while waiting on the ring: a quarter period.
    fn poll_interval(&self) -> Duration {
        let micros = u64::from(self.config.period_size) * 250_000 / u64::from(self.config.rate.max(1));
        Duration::from_micros(micros.max(100))
    }

    fn check_halted(&self) -> Result<(), PcmError> {
        if self.control.halted.load(Ordering::SeqCst) {
            Err(PcmError::BadState)
        } else {
            Ok(())
        }
    }
}

impl Pcm for CpalPcm {
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
        self.control.halted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> Result<(), PcmError> {
        self.check_halted()
    }

    fn stop(&mut self) -> Result<(), PcmError> {
        self.control.halted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), PcmError> {
        let interval = self.poll_interval();
        let Ring::Capture(consumer) = &mut self.ring else {
            return Err(PcmError::Unsupported);
        };

        self.scratch.resize(buf.len() / 2, 0);
        let mut filled = 0;
        while filled < self.scratch.len() {
            if self.control.halted.load(Ordering::SeqCst) {
                return Err(PcmError::BadState);
            }
            filled += consumer.pop_slice(&mut self.scratch[filled..]);
            if filled < self.scratch.len() {
                std::thread::sleep(interval);
            }
        }
        samples_to_bytes(&self.scratch, buf);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), PcmError> {
        let interval = self.poll_interval();
        let Ring::Playback(producer) = &mut self.ring else {
            return Err(PcmError::Unsupported);
        };

        self.scratch.resize(buf.len() / 2, 0);
        bytes_to_samples(buf, &mut self.scratch);
        let mut pushed = 0;
        while pushed < self.scratch.len() {
            if self.control.halted.load(Ordering::SeqCst) {
                return Err(PcmError::BadState);
            }
            pushed += producer.push_slice(&self.scratch[pushed..]);
            if pushed < self.scratch.len() {
                std::thread::sleep(interval);
            }
        }
        Ok(())
    }

    fn htimestamp(&self) -> Result<PcmTimestamp, PcmError> {
        let channels = self.config.channels.max(1) as usize;
        let avail = match &self.ring {
            Ring::Playback(producer) => producer.vacant_len() / channels,
            Ring::Capture(consumer) => consumer.occupied_len() / channels,
        };
        Ok(PcmTimestamp {
            avail: (avail as u32).min(self.config.buffer_frames()),
            time: self.epoch.elapsed(),
        })
    }

    fn interrupter(&self) -> Arc<dyn PcmInterrupt> {
        self.control.clone()
    }
}

impl Drop for CpalPcm {
    fn drop(&mut self) {
        self.control.halted.store(true, Ordering::SeqCst);
        // Dropping the sender wakes the owner thread, which drops the stream.
        self.close_tx.take();
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
        tracing::debug!(address = %self.address, direction = ?self.direction, "cpal pcm closed");
    }
}
