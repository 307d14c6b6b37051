//! Sample-accurate streaming playback and capture on top of a realtime
//! audio host.
//!
//! A [`playback::PlaybackStream`] reads a sample file into an audio block
//! callback; a [`capture::CaptureStream`] writes an audio block callback out
//! to a sample file. Both share the same shape: a small state machine
//! driven by textual messages, a background worker thread that owns the
//! open file handle and does the blocking I/O, and a lock-free-on-the-fast-
//! path ring buffer connecting the two. Time is tracked as exact frame
//! counts ([`ftc::FrameTimeCode`]) measured from a named, shared origin
//! ([`anchor::TimeAnchor`]) rather than as floating-point seconds, so loop
//! and start/stop boundaries never drift.
//!
//! Everything these streams need from their environment — the clock, file
//! access, outlet emission, error logging — comes in through one
//! constructor argument, [`host::HostApi`]. A host binding crate implements
//! that trait once and is otherwise untouched by anything in here.

pub mod anchor;
pub mod capture;
pub mod codec;
pub mod config;
pub mod cycles;
pub mod error;
pub mod fifo;
pub mod ftc;
pub mod host;
pub mod message;
pub mod pcm;
pub mod playback;
pub mod time;

pub use anchor::{AnchorTable, TimeAnchor, ANCHOR_TABLE};
pub use capture::{CaptureOutlets, CaptureSnapshot, CaptureState, CaptureStream};
pub use codec::{Registry, SoundfileCodec, SoundfileDescriptor};
pub use config::Config;
pub use error::{Result, SoundfileError};
pub use ftc::FrameTimeCode;
pub use host::{DirectoryHost, HostApi, OutletId};
pub use playback::{PlaybackOutlets, PlaybackSnapshot, PlaybackState, PlaybackStream};

use std::sync::Arc;

/// The services every playback and capture object needs at construction,
/// built once per host process and then shared by `Arc`: a type registry
/// with the built-in codecs installed, plus access to the process-wide
/// anchor table new anchors bind into.
pub struct Environment {
    registry: Arc<Registry>,
}

impl Environment {
    /// Builds the default environment: a [`Registry`] with the built-in WAV
    /// codec registered (and therefore selected as the default codec for
    /// capture when no type is named).
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
        }
    }

    /// The shared codec registry. Clone the `Arc` into each
    /// [`PlaybackStream::new`] / [`CaptureStream::new`] call.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Binds (or rebinds) `name` in the process-wide anchor table. Shorthand
    /// for [`ANCHOR_TABLE`]`.create(name)`, kept here so a host binding has
    /// one place to look for "what does setup touch".
    pub fn create_anchor(&self, name: impl Into<String>) -> Arc<TimeAnchor> {
        ANCHOR_TABLE.create(name)
    }

    /// Looks up a previously bound anchor by name.
    pub fn lookup_anchor(&self, name: &str) -> Option<Arc<TimeAnchor>> {
        ANCHOR_TABLE.lookup(name)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_registers_wav_as_default_codec() {
        let env = Environment::new();
        let registry = env.registry();
        assert_eq!(registry.default_codec().unwrap().name(), "WAV");
    }

    #[test]
    fn environment_anchor_helpers_round_trip_through_the_shared_table() {
        let env = Environment::new();
        let created = env.create_anchor("lib-rs-smoke-anchor");
        let looked_up = env.lookup_anchor("lib-rs-smoke-anchor").unwrap();
        assert!(Arc::ptr_eq(&created, &looked_up));
    }
}
