//! LoopCycles: quantized loop-boundary calculator.

use crate::anchor::TimeAnchor;
use crate::ftc::FrameTimeCode;
use crate::host::HostApi;
use crate::time::euclidean_rem;

/// Computes the start frame of the `k`-th next loop boundary from "now",
/// given a shared anchor, loop length `L`, offset `O`, and a safety offset
/// `s` in frames.
///
/// Returns `None` when the loop length is negative. A zero-length loop
/// degenerates to `clk + s` with no periodicity.
pub fn get_start(
    anchor: &TimeAnchor,
    host: &dyn HostApi,
    loop_length: FrameTimeCode,
    offset: FrameTimeCode,
    k: i64,
    safety: i64,
) -> Option<i64> {
    let clk = anchor.elapsed_frames(host) as i64 - offset.to_frames();
    let l = loop_length.to_frames();

    if l < 0 {
        return None;
    }
    if l == 0 {
        return Some(clk + safety);
    }

    let r = euclidean_rem(clk, l);
    if r == 0 {
        Some(clk + k * l + safety)
    } else {
        Some(clk + l + offset.to_frames() - r + k * l + safety)
    }
}

/// `loopsContainingDuration(d, L) = d / ℓ`. Invalid (`None`) if `ℓ ≤ 0` or
/// `d < 0`.
pub fn loops_containing_duration(d: i64, loop_length: FrameTimeCode) -> Option<f64> {
    let l = loop_length.to_frames();
    if l <= 0 || d < 0 {
        return None;
    }
    Some(d as f64 / l as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorTable;
    use crate::host::DirectoryHost;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A host whose logical clock is a settable frame counter, so cycle math
    /// can be tested deterministically without real elapsed wall time.
    struct FakeClockHost {
        inner: DirectoryHost,
        frames_elapsed: AtomicU64,
    }

    impl FakeClockHost {
        fn new(frames_elapsed: u64) -> Self {
            Self {
                inner: DirectoryHost::new("."),
                frames_elapsed: AtomicU64::new(frames_elapsed),
            }
        }
    }

    impl HostApi for FakeClockHost {
        fn logical_time_now(&self) -> crate::time::LogicalInstant {
            self.inner.logical_time_now()
        }
        fn logical_time_since_frames(&self, _since: crate::time::LogicalInstant) -> f64 {
            self.frames_elapsed.load(Ordering::SeqCst) as f64
        }
        fn schedule_deferred(&self, cb: Box<dyn FnOnce() + Send>) {
            self.inner.schedule_deferred(cb)
        }
        fn open_by_path(&self, name: &str) -> std::io::Result<std::fs::File> {
            self.inner.open_by_path(name)
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
    }

    #[test]
    fn idempotent_at_exact_boundary() {
        let table = AnchorTable::new();
        let anchor = table.create("cycle-anchor");
        let host = FakeClockHost::new(12000);
        let l = FrameTimeCode::from_frames(12000);
        let o = FrameTimeCode::ZERO;

        let clk0 = get_start(&anchor, &host, l, o, 0, 0).unwrap();
        let clk1 = get_start(&anchor, &host, l, o, 1, 0).unwrap();
        assert_eq!(clk0, 12000);
        assert_eq!(clk1, 24000);
    }

    #[test]
    fn scenario_6_loopcycles_quantization() {
        // Anchor at 1 0 23000 ≡ 23000 frames; loop_length 1 0 12000.
        let table = AnchorTable::new();
        let anchor = table.create("scenario6");
        let host = FakeClockHost::new(23000);
        let l = FrameTimeCode::from_frames(12000);
        let o = FrameTimeCode::ZERO;

        let bang = get_start(&anchor, &host, l, o, 0, 0).unwrap();
        assert_eq!(bang, 24000);

        let minus_one = get_start(&anchor, &host, l, o, -1, 0).unwrap();
        assert_eq!(minus_one, 12000);
    }

    #[test]
    fn scenario_6_loops_containing_duration() {
        let l = FrameTimeCode::from_frames(48000);
        let count = loops_containing_duration(96000, l).unwrap();
        assert_eq!(count, 2.0);
    }

    #[test]
    fn negative_loop_length_is_invalid() {
        let table = AnchorTable::new();
        let anchor = table.create("invalid-anchor");
        let host = FakeClockHost::new(1000);
        let l = FrameTimeCode::from_frames(-1);
        assert!(get_start(&anchor, &host, l, FrameTimeCode::ZERO, 0, 0).is_none());
        assert!(loops_containing_duration(100, l).is_none());
    }

    #[test]
    fn zero_loop_length_has_no_periodicity() {
        let table = AnchorTable::new();
        let anchor = table.create("zero-len-anchor");
        let host = FakeClockHost::new(555);
        let l = FrameTimeCode::ZERO;
        let start = get_start(&anchor, &host, l, FrameTimeCode::ZERO, 7, 3).unwrap();
        assert_eq!(start, 555 + 3);
    }
}
