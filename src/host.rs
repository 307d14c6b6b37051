//! The host collaborator contract: a small explicit capability set passed at
//! construction, rather than wiring stream objects directly to raw function
//! pointers. Playback and capture streams hold an `Arc<dyn HostApi>` and
//! never reach past it into real host services; the host binding crate
//! implements `HostApi` once.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::time::LogicalInstant;

/// Identifies one of a stream's outlets, so a single `HostApi` impl can route
/// `emit_*` calls for several stream objects without per-object trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutletId(pub u32);

/// The capability set a realtime host must provide.
///
/// Every method is safe to call from the realtime thread unless documented
/// otherwise; `open_by_path` is only ever called from the background worker.
pub trait HostApi: Send + Sync {
    /// The host's current logical-time instant.
    fn logical_time_now(&self) -> LogicalInstant;

    /// Frames elapsed between `since` and now, as the host's DSP clock sees
    /// it.
    fn logical_time_since_frames(&self, since: LogicalInstant) -> f64;

    /// Queue `cb` to run on the host's deferred (post-block) callback
    /// mechanism, so outlet emission from the worker thread is marshaled
    /// back onto the thread the host expects to emit from.
    fn schedule_deferred(&self, cb: Box<dyn FnOnce() + Send>);

    /// Open a file by name via the host's search path. Only called from the
    /// background worker thread, never from the realtime thread.
    fn open_by_path(&self, name: &str) -> io::Result<File>;

    /// Create (or truncate) a file by name for capture. Only called from the
    /// background worker thread.
    fn create_by_path(&self, name: &str) -> io::Result<File>;

    /// Resolve a name to a full path without opening it (used to report
    /// which file an error refers to before the open is attempted).
    fn resolve_path(&self, name: &str) -> Option<std::path::PathBuf>;

    fn emit_list(&self, outlet: OutletId, values: &[f32]);
    fn emit_float(&self, outlet: OutletId, value: f32);
    fn emit_bang(&self, outlet: OutletId);
    fn log_error(&self, message: &str);

    /// Requests that the host rebuild its signal graph, e.g. because a
    /// [`crate::anchor::TimeAnchor`] referenced by the graph was destroyed.
    fn request_graph_rebuild(&self) {}
}

/// A `HostApi` usable only from tests and demos: resolves paths against a
/// fixed search root on the real filesystem, scoped to one directory.
pub struct DirectoryHost {
    root: std::path::PathBuf,
}

impl DirectoryHost {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> std::path::PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

impl HostApi for DirectoryHost {
    fn logical_time_now(&self) -> LogicalInstant {
        LogicalInstant::EPOCH
    }

    fn logical_time_since_frames(&self, _since: LogicalInstant) -> f64 {
        0.0
    }

    fn schedule_deferred(&self, cb: Box<dyn FnOnce() + Send>) {
        cb();
    }

    fn open_by_path(&self, name: &str) -> io::Result<File> {
        File::open(self.resolve(name))
    }

    fn create_by_path(&self, name: &str) -> io::Result<File> {
        File::create(self.resolve(name))
    }

    fn resolve_path(&self, name: &str) -> Option<std::path::PathBuf> {
        Some(self.resolve(name))
    }

    fn emit_list(&self, _outlet: OutletId, _values: &[f32]) {}
    fn emit_float(&self, _outlet: OutletId, _value: f32) {}
    fn emit_bang(&self, _outlet: OutletId) {}

    fn log_error(&self, message: &str) {
        log::error!("{message}");
    }
}
