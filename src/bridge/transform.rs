//! Per-frame transform applied by the relay loops.

use std::sync::Arc;

use parking_lot::Mutex;

/// Fixed-size frame processor sitting between the voice and SCO paths.
///
/// Typically an echo canceller: the downlink leg feeds it far-end audio and
/// the uplink leg near-end audio. Both legs share one instance behind a
/// mutex, so implementations need not be reentrant. `input` and `output`
/// always have the same length: one hands-free period of mono samples.
pub trait FrameTransform: Send {
    /// Processes one period travelling from the voice path to SCO.
    fn process_uplink(&mut self, input: &[i16], output: &mut [i16]);

    /// Processes one period travelling from SCO to the voice path.
    fn process_downlink(&mut self, input: &[i16], output: &mut [i16]);

    /// Frees working memory. Called once the bridge has joined both relays.
    fn release(&mut self) {}
}

/// Transform shared by both relay legs.
pub type SharedTransform = Arc<Mutex<Box<dyn FrameTransform>>>;

/// Wraps a transform for use by the bridge.
pub fn shared_transform<T>(transform: T) -> SharedTransform
where
    T: FrameTransform + 'static,
{
    Arc::new(Mutex::new(Box::new(transform)))
}

/// Copies frames through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FrameTransform for Passthrough {
    fn process_uplink(&mut self, input: &[i16], output: &mut [i16]) {
        output.copy_from_slice(input);
    }

    fn process_downlink(&mut self, input: &[i16], output: &mut [i16]) {
        output.copy_from_slice(input);
    }
}
