//! Device routing.
//!
//! This module decides which mixer paths are active:
//! - [`RouteTable`]: static `[source][device]` table of path names
//! - [`MixerEngine`]: the seam to whatever programs the codec
//! - The router: maps the aggregate's devices/source to a table entry and
//!   reprograms the mixer only when the route fingerprint changes

mod mixer;
mod router;
mod table;

pub use mixer::{MixerCall, MixerEngine, RecordingMixer};
pub(crate) use router::{RouteInputs, Router};
pub use table::{
    route_fingerprint, InputSourceId, OutputDeviceId, RouteConfig, RouteSelection, RouteTable,
};
