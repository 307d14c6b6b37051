//! Tunables for FIFO sizing, block size, and worker chunking.

/// Shared configuration for a playback or capture stream.
///
/// The FIFO is rounded down to a multiple of `block_frames * bytes_per_frame`,
/// and the worker is woken roughly 16 times per full FIFO traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Requested FIFO byte capacity, before rounding to a frame/block boundary.
    pub fifo_capacity: usize,
    /// Realtime block size in frames.
    pub block_frames: usize,
    /// Maximum bytes the worker reads or writes per I/O call.
    pub read_chunk_bytes: usize,
    /// Number of worker refills per full FIFO traversal.
    pub refills_per_traversal: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fifo_capacity: 1 << 20, // 1 MiB
            block_frames: 512,
            read_chunk_bytes: 1 << 16, // 64 KiB
            refills_per_traversal: 16,
        }
    }
}

impl Config {
    /// Round `fifo_capacity` down to a multiple of `bytes_per_frame *
    /// block_frames`, flooring at one unit so the FIFO is never sized to
    /// zero. `PlaybackStream::new`/`CaptureStream::new` call this to size
    /// their ring buffers.
    pub fn rounded_fifo_capacity(&self, bytes_per_frame: usize) -> usize {
        let unit = bytes_per_frame.max(1) * self.block_frames.max(1);
        crate::fifo::round_down_to_unit(self.fifo_capacity, unit).max(unit)
    }
}
