//! TimeAnchor: a named, process-wide shared time origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

use crate::host::HostApi;
use crate::time::{ceil_clamped_nonneg, LogicalInstant};

/// A named origin instant that multiple streams agree to call T=0.
///
/// Start time is lazily latched: a fresh anchor reports frame 0 as of
/// whichever call first asks for elapsed time, not as of `create()` — this
/// lets downstream objects begin counting from the moment they are actually
/// used.
pub struct TimeAnchor {
    name: String,
    start_time: Mutex<Option<LogicalInstant>>,
    used_in_signal_graph: AtomicBool,
}

impl TimeAnchor {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Mutex::new(None),
            used_in_signal_graph: AtomicBool::new(false),
        }
    }

    /// Builds a "self" anchor for one stream's private use: never bound into
    /// [`ANCHOR_TABLE`], so nothing else can look it up or race its reset.
    pub fn local() -> Self {
        Self::new("self")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark `used_in_signal_graph`; destruction will then request a graph
    /// rebuild.
    pub fn set_used_in_signal_graph(&self, used: bool) {
        self.used_in_signal_graph.store(used, Ordering::Relaxed);
    }

    /// Sets `startTime` to the host's current logical time.
    pub fn mark(&self, host: &dyn HostApi) {
        *self.start_time.lock() = Some(host.logical_time_now());
    }

    /// `elapsedFrames()`: latches `startTime` to now on first call, then
    /// returns `ceil(logicalTimeSince(startTime))` clamped to `≥ 0`.
    pub fn elapsed_frames(&self, host: &dyn HostApi) -> u64 {
        let mut guard = self.start_time.lock();
        let start = *guard.get_or_insert_with(|| host.logical_time_now());
        drop(guard);
        ceil_clamped_nonneg(host.logical_time_since_frames(start))
    }

    /// `bang`: emits `elapsedFrames()` as an FTC list on `outlet`.
    pub fn bang(&self, host: &dyn HostApi, outlet: crate::host::OutletId) {
        let frames = self.elapsed_frames(host) as i64;
        host.emit_list(outlet, &crate::ftc::FrameTimeCode::from_frames(frames).emit());
    }
}

/// Process-wide name → anchor registry, binding `name → anchor` in the
/// host symbol table. Every reference through this table is a lookup-by-name
/// plus a soft `Arc` back-reference, never ownership — the anchor's lifetime
/// is governed by whoever last holds its name bound: while any stream holds
/// a reference, the anchor must remain resolvable by its name.
pub struct AnchorTable {
    anchors: RwLock<HashMap<String, Arc<TimeAnchor>>>,
}

impl AnchorTable {
    fn new() -> Self {
        Self {
            anchors: RwLock::new(HashMap::new()),
        }
    }

    /// `create(name)`: binds (or rebinds, if already present) `name` to a
    /// fresh anchor with `startTime` unset.
    pub fn create(&self, name: impl Into<String>) -> Arc<TimeAnchor> {
        let name = name.into();
        let anchor = Arc::new(TimeAnchor::new(name.clone()));
        self.anchors.write().insert(name, anchor.clone());
        anchor
    }

    /// Look up a previously-created anchor by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<TimeAnchor>> {
        self.anchors.read().get(name).cloned()
    }

    /// `destroy`: unbinds `name`, and if the anchor's "used in signal graph"
    /// flag is set, requests the host rebuild its graph.
    pub fn destroy(&self, name: &str, host: &dyn HostApi) {
        let removed = self.anchors.write().remove(name);
        if let Some(anchor) = removed {
            if anchor.used_in_signal_graph.load(Ordering::Relaxed) {
                host.request_graph_rebuild();
            }
        }
    }
}

lazy_static! {
    /// The process-wide anchor table: a name-keyed registry of anchors,
    /// mirroring the `RwLock<HashMap<..>>` lazy_static pattern used
    /// elsewhere in this crate for process-wide shared state.
    pub static ref ANCHOR_TABLE: AnchorTable = AnchorTable::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DirectoryHost;

    struct CountingHost {
        inner: DirectoryHost,
        rebuild_requests: std::sync::atomic::AtomicUsize,
    }

    impl CountingHost {
        fn new() -> Self {
            Self {
                inner: DirectoryHost::new("."),
                rebuild_requests: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl HostApi for CountingHost {
        fn logical_time_now(&self) -> LogicalInstant {
            self.inner.logical_time_now()
        }
        fn logical_time_since_frames(&self, since: LogicalInstant) -> f64 {
            self.inner.logical_time_since_frames(since)
        }
        fn schedule_deferred(&self, cb: Box<dyn FnOnce() + Send>) {
            self.inner.schedule_deferred(cb)
        }
        fn open_by_path(&self, name: &str) -> std::io::Result<std::fs::File> {
            self.inner.open_by_path(name)
        }
        fn create_by_path(&self, name: &str) -> std::io::Result<std::fs::File> {
            self.inner.create_by_path(name)
        }
        fn resolve_path(&self, name: &str) -> Option<std::path::PathBuf> {
            self.inner.resolve_path(name)
        }
        fn emit_list(&self, outlet: crate::host::OutletId, values: &[f32]) {
            self.inner.emit_list(outlet, values)
        }
        fn emit_float(&self, outlet: crate::host::OutletId, value: f32) {
            self.inner.emit_float(outlet, value)
        }
        fn emit_bang(&self, outlet: crate::host::OutletId) {
            self.inner.emit_bang(outlet)
        }
        fn log_error(&self, message: &str) {
            self.inner.log_error(message)
        }
        fn request_graph_rebuild(&self) {
            self.rebuild_requests
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn lazy_start_latches_on_first_access() {
        let host = CountingHost::new();
        let table = AnchorTable::new();
        let anchor = table.create("test-anchor-lazy");
        let first = anchor.elapsed_frames(&host);
        let second = anchor.elapsed_frames(&host);
        assert_eq!(first, 0);
        assert_eq!(second, 0);
    }

    #[test]
    fn destroy_requests_rebuild_only_when_used_in_graph() {
        let host = CountingHost::new();
        let table = AnchorTable::new();
        let a = table.create("graph-anchor");
        a.set_used_in_signal_graph(true);
        table.destroy("graph-anchor", &host);
        assert_eq!(host.rebuild_requests.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(table.lookup("graph-anchor").is_none());

        let b = table.create("plain-anchor");
        let _ = b;
        table.destroy("plain-anchor", &host);
        assert_eq!(host.rebuild_requests.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn anchor_remains_resolvable_while_referenced() {
        let table = AnchorTable::new();
        let created = table.create("shared");
        let looked_up = table.lookup("shared").unwrap();
        assert!(Arc::ptr_eq(&created, &looked_up));
    }
}
