//! Builder pattern for `AudioHw`.

use std::sync::Arc;

use crate::aggregate::DeviceAggregate;
use crate::bridge::{shared_transform, FrameTransform, SharedTransform};
use crate::pcm::PcmBackend;
use crate::route::{MixerEngine, RouteTable, Router};
use crate::{event_callback, AudioHw, EventCallback, HalConfig, HalError, HalEvent};

/// Builder for configuring and opening an [`AudioHw`].
///
/// Use [`AudioHw::builder()`] to create a new builder.
///
/// # Example
///
/// ```
/// use audio_hal::{AudioHw, HalConfig, MockPcmBackend, Passthrough, RecordingMixer};
///
/// let mixer = RecordingMixer::new();
/// let hw = AudioHw::builder()
///     .with_config(HalConfig::default().with_realtime_relays(false))
///     .backend(MockPcmBackend::new())
///     .mixer(mixer.clone())
///     .transform(Passthrough)
///     .on_event(|e| tracing::debug!(?e, "hal event"))
///     .open()
///     .unwrap();
///
/// hw.set_parameters("hfp_enable=true").unwrap();
/// assert!(hw.bridge_running());
/// ```
#[must_use]
pub struct AudioHwBuilder {
    config: HalConfig,
    backend: Option<Arc<dyn PcmBackend>>,
    mixer: Option<Box<dyn MixerEngine>>,
    route_table: RouteTable,
    transform: Option<SharedTransform>,
    event_callback: Option<EventCallback>,
}

impl Default for AudioHwBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHwBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: HalConfig::default(),
            backend: None,
            mixer: None,
            route_table: RouteTable::standard(),
            transform: None,
            event_callback: None,
        }
    }

    /// Set custom device configuration.
    pub fn with_config(mut self, config: HalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the PCM backend.
    ///
    /// Default: `CpalBackend` with the `cpal` feature, otherwise none and
    /// [`open()`](Self::open) fails.
    pub fn backend<B: PcmBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set the mixer engine routing decisions are applied to.
    ///
    /// Without one, route changes are logged and skipped.
    pub fn mixer<M: MixerEngine + 'static>(mut self, mixer: M) -> Self {
        self.mixer = Some(Box::new(mixer));
        self
    }

    /// Replace the route table.
    ///
    /// Default: [`RouteTable::standard()`]
    pub fn route_table(mut self, table: RouteTable) -> Self {
        self.route_table = table;
        self
    }

    /// Set the transform both bridge legs run each period through.
    pub fn transform<T: FrameTransform + 'static>(mut self, transform: T) -> Self {
        self.transform = Some(shared_transform(transform));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include route changes, absorbed stream errors and relay aborts.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(HalEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    fn resolve_backend(backend: Option<Arc<dyn PcmBackend>>) -> Result<Arc<dyn PcmBackend>, HalError> {
        if let Some(backend) = backend {
            return Ok(backend);
        }
        #[cfg(feature = "cpal")]
        {
            Ok(Arc::new(crate::pcm::CpalBackend::new()))
        }
        #[cfg(not(feature = "cpal"))]
        {
            Err(HalError::NoBackend)
        }
    }

    /// Open the device.
    ///
    /// No PCM is touched until a stream is activated or hands-free enabled.
    ///
    /// # Errors
    ///
    /// [`HalError::NoBackend`] if no backend was set and none is compiled in.
    pub fn open(self) -> Result<AudioHw, HalError> {
        let backend = Self::resolve_backend(self.backend)?;
        if self.mixer.is_none() {
            tracing::warn!("no mixer engine configured, routing disabled");
        }

        tracing::info!(
            backend = backend.name(),
            sound_card = self.config.sound_card,
            voice = %self.config.voice_pcm,
            sco = %self.config.sco_pcm,
            "audio device opened"
        );

        let router = Router::new(self.route_table, self.mixer);
        let dev = DeviceAggregate::new(
            self.config,
            backend,
            router,
            self.transform,
            self.event_callback,
        );
        Ok(AudioHw::new(Arc::new(dev)))
    }
}
