//! Relay loop run by each bridge thread.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{BridgeContext, BridgeShared, LegStatus, RelayLeg};
use crate::event::{emit, HalEvent};
use crate::format::{bytes_to_samples, samples_to_bytes, silence};
use crate::pcm::{Pcm, PcmAddress, PcmDirection, PcmMode};
use crate::{HalError, PcmError};

pub(super) fn spawn(
    leg: RelayLeg,
    context: BridgeContext,
    shared: Arc<BridgeShared>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(leg.thread_name().to_string())
        .spawn(move || run(leg, &context, &shared))
}

/// (capture side, playback side) of a leg.
fn endpoints(leg: RelayLeg, context: &BridgeContext) -> (PcmAddress, PcmAddress) {
    match leg {
        RelayLeg::Uplink => (context.voice, context.sco),
        RelayLeg::Downlink => (context.sco, context.voice),
    }
}

fn run(leg: RelayLeg, context: &BridgeContext, shared: &BridgeShared) {
    if context.realtime {
        elevate_priority(leg);
    }

    let (mut source, mut sink) = match open_leg(leg, context, shared) {
        Ok(pcms) => pcms,
        Err(e) => {
            tracing::error!(%leg, error = %e, "relay failed to open devices");
            shared.set_status(leg, LegStatus::Aborted);
            emit(
                context.events.as_ref(),
                HalEvent::RelayAborted {
                    leg,
                    error: e.to_string(),
                },
            );
            return;
        }
    };

    shared.set_status(leg, LegStatus::Running);
    tracing::debug!(%leg, "relay running");

    let period_bytes = context.config.period_bytes();
    let mut buffer = vec![0u8; period_bytes];
    let mut samples_in = vec![0i16; period_bytes / 2];
    let mut samples_out = vec![0i16; period_bytes / 2];
    let counters = shared.leg(leg);

    while !shared.is_cancelled() {
        if let Err(e) = source.read(&mut buffer) {
            log_transfer_error(leg, "read", &e, shared);
            continue;
        }

        if leg == RelayLeg::Uplink && context.mic_muted.load(Ordering::Acquire) {
            silence(&mut buffer);
        }

        if let Some(transform) = &context.transform {
            bytes_to_samples(&buffer, &mut samples_in);
            {
                let mut transform = transform.lock();
                match leg {
                    RelayLeg::Uplink => transform.process_uplink(&samples_in, &mut samples_out),
                    RelayLeg::Downlink => {
                        transform.process_downlink(&samples_in, &mut samples_out);
                    }
                }
            }
            samples_to_bytes(&samples_out, &mut buffer);
        }

        if let Err(e) = sink.write(&buffer) {
            log_transfer_error(leg, "write", &e, shared);
            continue;
        }
        counters.periods.fetch_add(1, Ordering::Relaxed);
    }

    // Playback side was opened first; close it last.
    drop(source);
    drop(sink);
    shared.set_status(leg, LegStatus::Finished);
    tracing::debug!(%leg, "relay exited");
}

/// Opens the playback side, then the capture side.
fn open_leg(
    leg: RelayLeg,
    context: &BridgeContext,
    shared: &BridgeShared,
) -> Result<(Box<dyn Pcm>, Box<dyn Pcm>), HalError> {
    let (capture, playback) = endpoints(leg, context);
    let sink = open_prepared(context, playback, PcmDirection::Playback, shared)?;
    let source = open_prepared(context, capture, PcmDirection::Capture, shared)?;
    Ok((source, sink))
}

fn open_prepared(
    context: &BridgeContext,
    address: PcmAddress,
    direction: PcmDirection,
    shared: &BridgeShared,
) -> Result<Box<dyn Pcm>, HalError> {
    let mut pcm = context
        .backend
        .open(address, direction, PcmMode::Blocking, &context.config)
        .map_err(|e| HalError::device_unavailable(address, e))?;
    pcm.prepare()
        .map_err(|e| HalError::device_unavailable(address, e))?;
    shared.register(pcm.interrupter());
    Ok(pcm)
}

fn log_transfer_error(leg: RelayLeg, op: &'static str, error: &PcmError, shared: &BridgeShared) {
    // A halted device is how stop() unblocks the loop.
    if error.is_bad_state() {
        return;
    }
    shared.leg(leg).errors.fetch_add(1, Ordering::Relaxed);
    tracing::error!(%leg, op, %error, "relay transfer failed");
}

#[cfg(target_os = "linux")]
fn elevate_priority(leg: RelayLeg) {
    use thread_priority::{
        set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
        ThreadPriority, ThreadSchedulePolicy,
    };

    let policy = ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo);
    if let Err(e) = set_thread_priority_and_policy(thread_native_id(), ThreadPriority::Max, policy)
    {
        tracing::debug!(%leg, error = ?e, "real-time scheduling unavailable, trying max priority");
        if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
            tracing::debug!(%leg, error = ?e, "could not raise relay priority");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn elevate_priority(leg: RelayLeg) {
    use thread_priority::ThreadPriority;

    if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
        tracing::debug!(%leg, error = ?e, "could not raise relay priority");
    }
}
