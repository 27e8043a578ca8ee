//! Runtime events for monitoring HAL health.
//!
//! Events are non-fatal notifications. The HAL keeps running after any of
//! them; they exist for logging and metrics, not error handling.
//!
//! Callbacks run synchronously on the thread that raised the event, sometimes
//! while the device lock is held. They must not call back into
//! [`AudioHw`](crate::AudioHw) or block.

use std::sync::Arc;

use crate::bridge::RelayLeg;
use crate::stream::Direction;

/// Runtime events emitted by the HAL.
///
/// # Example
///
/// ```
/// use audio_hal::HalEvent;
///
/// fn handle_event(event: HalEvent) {
///     match event {
///         HalEvent::RouteApplied { route_id, output_path, input_path } => {
///             eprintln!("route {route_id:#x}: {output_path:?} / {input_path:?}");
///         }
///         HalEvent::StreamStartFailed { direction, error } => {
///             eprintln!("{direction:?} stream failed to start: {error}");
///         }
///         HalEvent::StreamError { direction, error } => {
///             eprintln!("{direction:?} stream forced to standby: {error}");
///         }
///         HalEvent::BridgeStarted => eprintln!("hands-free bridge started"),
///         HalEvent::BridgeStopped => eprintln!("hands-free bridge stopped"),
///         HalEvent::RelayAborted { leg, error } => {
///             eprintln!("{leg} relay aborted: {error}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum HalEvent {
    /// The mixer was reprogrammed for a new source/device combination.
    RouteApplied {
        /// Fingerprint of the applied route.
        route_id: u32,
        /// Output path applied, if any.
        output_path: Option<&'static str>,
        /// Input path applied, if any.
        input_path: Option<&'static str>,
    },

    /// A data-path call could not activate its endpoint.
    ///
    /// The endpoint stays in standby and the call still reported success;
    /// the next call retries.
    StreamStartFailed {
        /// Which endpoint kind failed.
        direction: Direction,
        /// Description of the failure.
        error: String,
    },

    /// A transfer failed on an active endpoint, which was put into standby.
    StreamError {
        /// Which endpoint kind failed.
        direction: Direction,
        /// Description of the failure.
        error: String,
    },

    /// The hands-free bridge spawned its relay threads.
    BridgeStarted,

    /// The hands-free bridge joined its relay threads.
    BridgeStopped,

    /// One relay leg couldn't open its devices and exited.
    ///
    /// The other leg keeps running, so the call is half-duplex until the
    /// bridge is restarted.
    RelayAborted {
        /// The leg that aborted.
        leg: RelayLeg,
        /// Description of the failure.
        error: String,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`AudioHwBuilder::on_event()`].
///
/// [`AudioHwBuilder::on_event()`]: crate::AudioHwBuilder::on_event
pub type EventCallback = Arc<dyn Fn(HalEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use audio_hal::{event_callback, HalEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(HalEvent::BridgeStarted);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(HalEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Sends an event to the callback if one is configured.
pub(crate) fn emit(callback: Option<&EventCallback>, event: HalEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_hal_event_debug() {
        let event = HalEvent::RouteApplied {
            route_id: 0x104,
            output_path: Some("media-speaker"),
            input_path: None,
        };
        let debug = format!("{event:?}");
        assert!(debug.contains("RouteApplied"));
        assert!(debug.contains("media-speaker"));
    }

    #[test]
    fn test_hal_event_clone() {
        let event = HalEvent::RelayAborted {
            leg: RelayLeg::Uplink,
            error: "busy".to_string(),
        };
        if let HalEvent::RelayAborted { leg, error } = event.clone() {
            assert_eq!(leg, RelayLeg::Uplink);
            assert_eq!(error, "busy");
        } else {
            panic!("Expected RelayAborted variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        emit(Some(&callback), HalEvent::BridgeStopped);
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_emit_without_callback() {
        emit(None, HalEvent::BridgeStarted);
    }
}
