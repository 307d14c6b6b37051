//! Streaming capture: the record-side mirror of [`crate::playback`]. The
//! realtime thread encodes incoming audio into the FIFO's head region; the
//! background worker drains `[tail, head)` to disk.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::anchor::TimeAnchor;
use crate::codec::{ExtensionSet, Registry};
use crate::config::Config;
use crate::error::{Result, SoundfileError};
use crate::fifo::{self, Lookback, WorkerRequest};
use crate::ftc::FrameTimeCode;
use crate::host::{HostApi, OutletId};
use crate::message::{CaptureMessage, CaptureStart, CaptureStop, OpenCapture};
use crate::pcm::{self, Endianness};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Idle2,
    Startup,
    StreamJustStarting,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartSpec {
    Now,
    Threshold(f32),
    At(i64),
}

struct Shared {
    state: CaptureState,
    request: WorkerRequest,

    filename: Option<String>,
    typename: Option<String>,
    bytes_per_sample: u8,
    endianness: Endianness,
    sample_rate: u32,
    extensions: ExtensionSet,

    channels: u16,
    bytes_per_frame: usize,

    fifo: Lookback,
    head: usize,
    tail: usize,
    performed_fifo_bytes: u64,
    tail_push: bool,

    start_time: StartSpec,
    end_time: Option<i64>,
    reported_start: Option<i64>,
    start_reported: bool,

    frames_written: u64,
    frames_reported: bool,

    error: Option<SoundfileError>,

    refill_countdown: u32,
    refill_period: u32,
}

pub struct CaptureOutlets {
    pub channel_count: usize,
    pub start_time: OutletId,
    pub frames: OutletId,
}

#[derive(Debug, Clone)]
pub struct CaptureSnapshot {
    pub state: CaptureState,
    pub filename: Option<String>,
    pub head: usize,
    pub tail: usize,
    pub frames_written: u64,
}

pub struct CaptureStream {
    shared: Arc<Mutex<Shared>>,
    request_cond: Arc<Condvar>,
    answer_cond: Arc<Condvar>,
    host: Arc<dyn HostApi>,
    registry: Arc<Registry>,
    anchor: RwLock<Arc<TimeAnchor>>,
    local_anchor: AtomicBool,
    outlets: CaptureOutlets,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream {
    pub fn new(
        host: Arc<dyn HostApi>,
        registry: Arc<Registry>,
        anchor: Arc<TimeAnchor>,
        outlets: CaptureOutlets,
        config: Config,
    ) -> Self {
        let bpf_guess = outlets.channel_count.max(1) * 2;
        let fifo_capacity = config.rounded_fifo_capacity(bpf_guess);
        let fifo = Lookback::new(fifo_capacity);
        let refill_unit = (config.refills_per_traversal.max(1) as usize * bpf_guess.max(1) * config.block_frames.max(1)).max(1);
        let refill_period = (fifo_capacity / refill_unit).max(1) as u32;

        let shared = Arc::new(Mutex::new(Shared {
            state: CaptureState::Idle,
            request: WorkerRequest::None,
            filename: None,
            typename: None,
            bytes_per_sample: 2,
            endianness: Endianness::Little,
            sample_rate: 48_000,
            extensions: ExtensionSet::default(),
            channels: outlets.channel_count as u16,
            bytes_per_frame: bpf_guess,
            fifo,
            head: 0,
            tail: 0,
            performed_fifo_bytes: 0,
            tail_push: false,
            start_time: StartSpec::Now,
            end_time: None,
            reported_start: None,
            start_reported: false,
            frames_written: 0,
            frames_reported: false,
            error: None,
            refill_countdown: refill_period,
            refill_period,
        }));

        let request_cond = Arc::new(Condvar::new());
        let answer_cond = Arc::new(Condvar::new());

        let worker_handle = {
            let shared = shared.clone();
            let request_cond = request_cond.clone();
            let answer_cond = answer_cond.clone();
            let host = host.clone();
            let read_chunk_bytes = config.read_chunk_bytes;
            let registry = registry.clone();
            std::thread::Builder::new()
                .name("soundfile-capture-worker".into())
                .spawn(move || {
                    worker::run(shared, request_cond, answer_cond, host, registry, read_chunk_bytes);
                })
                .expect("failed to spawn capture worker thread")
        };

        Self {
            shared,
            request_cond,
            answer_cond,
            host,
            registry,
            anchor: RwLock::new(anchor),
            local_anchor: AtomicBool::new(false),
            outlets,
            worker: Some(worker_handle),
        }
    }

    /// Stages an extension chunk (e.g. WAV `bext`/`smpl`) to be written into
    /// the header of the next file this stream opens. Looked up against
    /// `typename` if one has already been set via [`Self::handle_message`]
    /// with [`crate::message::CaptureMessage::Open`], otherwise against the
    /// registry's default codec.
    pub fn add_extension(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let mut shared = self.shared.lock();
        let codec = match shared.typename.as_deref() {
            Some(typename) => self
                .registry
                .by_name(typename)
                .ok_or_else(|| SoundfileError::InvalidArgument(format!("unknown codec {typename:?}")))?,
            None => self
                .registry
                .default_codec()
                .ok_or_else(|| SoundfileError::InvalidArgument("no codec registered".into()))?,
        };
        let mut spec = crate::codec::WriteHeaderSpec {
            channels: shared.channels,
            bytes_per_sample: shared.bytes_per_sample,
            sample_rate: shared.sample_rate,
            endianness: shared.endianness,
            extensions: std::mem::take(&mut shared.extensions),
        };
        codec.add_extension(&mut spec, name, data)?;
        shared.extensions = spec.extensions;
        Ok(())
    }

    pub fn handle_message(&self, msg: CaptureMessage) -> Result<()> {
        match msg {
            CaptureMessage::Open(open) => self.open(open),
            CaptureMessage::Start(target) => {
                self.start(target);
                Ok(())
            }
            CaptureMessage::Stop(target) => {
                self.stop(target);
                Ok(())
            }
            CaptureMessage::Time(name) => {
                self.set_anchor_by_name(&name);
                Ok(())
            }
            CaptureMessage::Print => {
                self.print();
                Ok(())
            }
        }
    }

    fn open(&self, req: OpenCapture) -> Result<()> {
        if req.filename.trim().is_empty() {
            return Err(SoundfileError::InvalidArgument("open needs a filename".into()));
        }
        let mut shared = self.shared.lock();
        shared.filename = Some(req.filename);
        shared.typename = req.typename;
        shared.bytes_per_sample = req.bytes_per_sample.unwrap_or(2);
        shared.endianness = req.endianness.unwrap_or(Endianness::Little);
        shared.sample_rate = req.sample_rate.unwrap_or(48_000);
        shared.channels = self.outlets.channel_count as u16;
        shared.bytes_per_frame = shared.channels as usize * shared.bytes_per_sample as usize;
        shared.head = 0;
        shared.tail = 0;
        shared.performed_fifo_bytes = 0;
        shared.tail_push = false;
        shared.start_time = StartSpec::Now;
        shared.end_time = None;
        shared.reported_start = None;
        shared.start_reported = false;
        shared.frames_written = 0;
        shared.frames_reported = false;
        shared.error = None;
        shared.state = CaptureState::Startup;
        shared.request = WorkerRequest::Open;
        drop(shared);
        self.request_cond.notify_all();
        Ok(())
    }

    fn start(&self, target: CaptureStart) {
        let mut shared = self.shared.lock();
        if shared.state != CaptureState::Startup {
            log::warn!("start: capture is not armed (no file opened yet)");
            self.host.log_error("start: capture is not armed (no file opened yet)");
            return;
        }
        if self.local_anchor.load(Ordering::Relaxed) {
            self.anchor.read().mark(self.host.as_ref());
        }
        shared.start_time = match target {
            CaptureStart::Now => StartSpec::Now,
            CaptureStart::Threshold(t) => StartSpec::Threshold(t),
            CaptureStart::At(ftc) => StartSpec::At(ftc.to_frames()),
        };
        shared.state = CaptureState::StreamJustStarting;
    }

    fn stop(&self, target: CaptureStop) {
        let mut shared = self.shared.lock();
        if !matches!(shared.state, CaptureState::StreamJustStarting | CaptureState::Stream) {
            return;
        }
        shared.end_time = Some(match target {
            CaptureStop::Now => self.anchor.read().elapsed_frames(self.host.as_ref()) as i64,
            CaptureStop::At(ftc) => ftc.to_frames(),
        });
    }

    fn set_anchor_by_name(&self, name: &str) {
        if name == "self" {
            *self.anchor.write() = Arc::new(TimeAnchor::local());
            self.local_anchor.store(true, Ordering::Relaxed);
        } else if let Some(anchor) = crate::anchor::ANCHOR_TABLE.lookup(name) {
            *self.anchor.write() = anchor;
            self.local_anchor.store(false, Ordering::Relaxed);
        } else {
            log::warn!("no such anchor: {name}");
            self.host.log_error(&format!("no such anchor: {name}"));
        }
    }

    pub fn print(&self) -> CaptureSnapshot {
        let shared = self.shared.lock();
        CaptureSnapshot {
            state: shared.state,
            filename: shared.filename.clone(),
            head: shared.head,
            tail: shared.tail,
            frames_written: shared.frames_written,
        }
    }

    fn scan_threshold(input: &[f32], host_channels: usize, block_frames: usize, threshold: f32) -> Option<usize> {
        for frame in 0..block_frames {
            let base = frame * host_channels;
            if input[base..base + host_channels].iter().any(|s| s.abs() >= threshold) {
                return Some(frame);
            }
        }
        None
    }

    /// Consumes one realtime block of interleaved host-channel input,
    /// encoding it into the FIFO per the capture scheduling rules.
    pub fn process_block(&self, input: &[f32], block_frames: usize) {
        let mut shared = self.shared.lock();

        if shared.frames_reported {
            shared.frames_reported = false;
            let value = FrameTimeCode::from_frames(shared.frames_written as i64).emit();
            self.host.emit_list(self.outlets.frames, &value);
        }

        if let Some(err) = shared.error.take() {
            shared.state = CaptureState::Idle;
            drop(shared);
            log::error!("{err}");
            self.host.log_error(&err.to_string());
            return;
        }

        if !matches!(shared.state, CaptureState::StreamJustStarting | CaptureState::Stream) {
            return;
        }

        let host_channels = self.outlets.channel_count;
        let block_start = self.anchor.read().elapsed_frames(self.host.as_ref()) as i64;

        let start_time = match shared.start_time {
            StartSpec::Now => {
                shared.start_time = StartSpec::At(block_start);
                block_start
            }
            StartSpec::At(t) => t,
            StartSpec::Threshold(threshold) => {
                match Self::scan_threshold(input, host_channels, block_frames, threshold) {
                    Some(offset) => {
                        let resolved = block_start + offset as i64;
                        shared.start_time = StartSpec::At(resolved);
                        resolved
                    }
                    None => i64::MAX,
                }
            }
        };

        let mut vecsize = block_frames as i64;
        let mut vecstart = 0i64;
        let mut finished = false;
        let mut newly_resolved_start: Option<i64> = None;

        if let Some(end) = shared.end_time {
            if block_start + vecsize > end {
                vecsize = (end - block_start).max(0);
                finished = true;
            }
        }

        let bpf = shared.bytes_per_frame.max(1);
        let capacity = shared.fifo.capacity();

        if !finished {
            if block_start <= start_time {
                if block_start + vecsize > start_time {
                    vecstart = start_time - block_start;
                    shared.tail = shared.head;
                    vecsize -= vecstart;
                    shared.tail_push = false;
                    newly_resolved_start = Some(start_time);
                    shared.state = CaptureState::Stream;
                } else {
                    shared.tail_push = true;
                }
            } else if shared.state == CaptureState::StreamJustStarting {
                let fifo_size = capacity as i64;
                let overdue_bytes = ((block_start - start_time) * bpf as i64)
                    .min(fifo_size - bpf as i64)
                    .min(shared.performed_fifo_bytes as i64)
                    .max(0) as usize;
                let rewind = overdue_bytes % capacity.max(1);
                shared.tail = fifo::advance(shared.head, capacity.max(1) - rewind, capacity);
                let recovered_frames = overdue_bytes as i64 / bpf as i64;
                newly_resolved_start = Some(block_start - recovered_frames);
                shared.tail_push = false;
                shared.state = CaptureState::Stream;
            }
        }

        let vecsize = vecsize.max(0) as usize;
        let vecstart = vecstart.max(0) as usize;

        if vecsize > 0 {
            let mut raw = vec![0u8; bpf];
            for frame_idx in 0..vecsize {
                let src = &input[(vecstart + frame_idx) * host_channels..(vecstart + frame_idx + 1) * host_channels];
                pcm::encode_frame(src, shared.channels as usize, shared.bytes_per_sample, shared.endianness, &mut raw);
                let dst_offset = fifo::advance(shared.head, frame_idx * bpf, capacity);
                shared.fifo.write_at(dst_offset, &raw);
            }
            shared.head = fifo::advance(shared.head, vecsize * bpf, capacity);
            shared.performed_fifo_bytes = (shared.performed_fifo_bytes + (vecsize * bpf) as u64).min(capacity as u64);
        }

        if shared.tail_push {
            shared.tail = shared.head;
        }

        if let Some(start) = newly_resolved_start {
            shared.reported_start = Some(start);
            let value = FrameTimeCode::from_frames(start).emit();
            self.host.emit_list(self.outlets.start_time, &value);
        }

        shared.refill_countdown = shared.refill_countdown.saturating_sub(1);
        if shared.refill_countdown == 0 {
            shared.refill_countdown = shared.refill_period;
            self.request_cond.notify_all();
        }

        if finished {
            shared.state = CaptureState::Idle2;
            shared.request = WorkerRequest::Close;
            drop(shared);
            self.request_cond.notify_all();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        {
            let mut shared = self.shared.lock();
            shared.request = WorkerRequest::Quit;
        }
        self.request_cond.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        let _ = &self.answer_cond;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::ANCHOR_TABLE;
    use crate::host::DirectoryHost;
    use std::sync::atomic::AtomicI64;
    use tempfile::TempDir;

    struct ScriptedHost {
        inner: DirectoryHost,
        now: AtomicI64,
    }

    impl ScriptedHost {
        fn new(dir: &std::path::Path) -> Self {
            Self {
                inner: DirectoryHost::new(dir.to_path_buf()),
                now: AtomicI64::new(0),
            }
        }
        fn set_now(&self, frames: i64) {
            self.now.store(frames, Ordering::SeqCst);
        }
    }

    impl HostApi for ScriptedHost {
        fn logical_time_now(&self) -> crate::time::LogicalInstant {
            self.inner.logical_time_now()
        }
        fn logical_time_since_frames(&self, _since: crate::time::LogicalInstant) -> f64 {
            self.now.load(Ordering::SeqCst) as f64
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
        fn emit_list(&self, outlet: OutletId, values: &[f32]) {
            self.inner.emit_list(outlet, values)
        }
        fn emit_float(&self, outlet: OutletId, value: f32) {
            self.inner.emit_float(outlet, value)
        }
        fn emit_bang(&self, outlet: OutletId) {
            self.inner.emit_bang(outlet)
        }
        fn log_error(&self, message: &str) {
            self.inner.log_error(message)
        }
    }

    #[test]
    fn threshold_start_skips_quiet_pre_roll_samples() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(ScriptedHost::new(dir.path()));
        let registry = Arc::new(Registry::default());
        let anchor = ANCHOR_TABLE.create("test-threshold-capture");
        let outlets = CaptureOutlets {
            channel_count: 1,
            start_time: OutletId(0),
            frames: OutletId(1),
        };
        let stream = CaptureStream::new(host.clone(), registry, anchor, outlets, Config::default());

        stream.handle_message(CaptureMessage::parse("open out.wav").unwrap()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        stream.handle_message(CaptureMessage::parse("start 0.1").unwrap()).unwrap();

        host.set_now(0);
        let quiet = vec![0.01f32; 64];
        stream.process_block(&quiet, 64);
        {
            let shared = stream.shared.lock();
            assert!(shared.reported_start.is_none());
            assert!(shared.tail_push);
        }

        host.set_now(64);
        let mut loud = vec![0.01f32; 64];
        loud[10] = 0.5;
        stream.process_block(&loud, 64);
        {
            let shared = stream.shared.lock();
            assert_eq!(shared.reported_start, Some(64 + 10));
        }
    }
}
