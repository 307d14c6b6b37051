//! Streaming playback: foreground realtime consumer plus background worker,
//! coordinated through a ring FIFO via a mutex and a pair of condvars for
//! bidirectional request/acknowledge signaling.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::HeapRb;

use crate::anchor::TimeAnchor;
use crate::codec::{Registry, SoundfileDescriptor};
use crate::config::Config;
use crate::error::{Result, SoundfileError};
use crate::fifo::WorkerRequest;
use crate::ftc::FrameTimeCode;
use crate::host::{HostApi, OutletId};
use crate::message::{LoopLengthTarget, OpenPlayback, PlaybackMessage, StopTarget, TimeTarget};
use crate::pcm::{self, Endianness};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Startup,
    Startup2,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartTimeSpec {
    Now,
    At(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndTimeSpec {
    AtLoop,
    Never,
    At(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLengthSpec {
    SelfLength,
    Explicit(FrameTimeCode),
}

#[derive(Debug, Clone, Default)]
struct OpenHints {
    header_size: Option<u64>,
    channels: Option<u16>,
    bytes_per_sample: Option<u8>,
    endianness: Option<Endianness>,
}

struct Shared {
    state: PlaybackState,
    request: WorkerRequest,

    filename: Option<String>,
    typename: Option<String>,
    onset_frames: u64,
    hints: OpenHints,

    descriptor: Option<SoundfileDescriptor>,
    total_frames: Option<u64>,
    total_frames_reported: bool,
    error: Option<SoundfileError>,

    producer: ringbuf::HeapProd<u8>,
    consumer: ringbuf::HeapCons<u8>,
    fifo_capacity: usize,
    /// Bumped every time the realtime side resets or reseeks the FIFO
    /// (open, a loop-parameter change, a time jump); lets the worker
    /// detect it raced a reset while it was blocked on I/O without the
    /// lock held. See `fifo::Snapshot`.
    reset_epoch: u64,
    /// Set whenever a reset means the worker must recompute its seek
    /// target from `head_time_request`/`loop_start` rather than
    /// continuing from wherever it last left off.
    seek_pending: bool,
    tail_time: i64,
    head_time_request: i64,
    eof: bool,

    start_time: StartTimeSpec,
    end_time: EndTimeSpec,
    loop_length: LoopLengthSpec,
    loop_start: FrameTimeCode,
    loop_params_changed: bool,

    refill_countdown: u32,
    refill_period: u32,
    bytes_per_frame: usize,
}

impl Shared {
    fn start_time_frames(&self) -> Option<i64> {
        match self.start_time {
            StartTimeSpec::At(t) => Some(t),
            StartTimeSpec::Now => None,
        }
    }
}

/// The channel count the host expects on its audio vectors, plus the
/// outlets a playback object reports through: a bang on done, and a list
/// outlet emitting the total usable frame count.
pub struct PlaybackOutlets {
    pub channel_count: usize,
    pub done: OutletId,
    pub total_frames: OutletId,
}

/// A snapshot of internal state for the `print` message.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub filename: Option<String>,
    pub fifo_occupied: usize,
    pub fifo_capacity: usize,
    pub eof: bool,
}

pub struct PlaybackStream {
    shared: Arc<Mutex<Shared>>,
    request_cond: Arc<Condvar>,
    answer_cond: Arc<Condvar>,
    host: Arc<dyn HostApi>,
    anchor: RwLock<Arc<TimeAnchor>>,
    local_anchor: AtomicBool,
    outlets: PlaybackOutlets,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackStream {
    pub fn new(
        host: Arc<dyn HostApi>,
        registry: Arc<Registry>,
        anchor: Arc<TimeAnchor>,
        outlets: PlaybackOutlets,
        config: Config,
    ) -> Self {
        let bpf_guess = outlets.channel_count.max(1) * 2;
        let fifo_capacity = config.rounded_fifo_capacity(bpf_guess);
        let (producer, consumer) = HeapRb::<u8>::new(fifo_capacity).split();
        let refill_unit = (config.refills_per_traversal.max(1) as usize * bpf_guess.max(1) * config.block_frames.max(1)).max(1);
        let refill_period = (fifo_capacity / refill_unit).max(1) as u32;

        let shared = Arc::new(Mutex::new(Shared {
            state: PlaybackState::Idle,
            request: WorkerRequest::None,
            filename: None,
            typename: None,
            onset_frames: 0,
            hints: OpenHints::default(),
            descriptor: None,
            total_frames: None,
            total_frames_reported: false,
            error: None,
            producer,
            consumer,
            fifo_capacity,
            reset_epoch: 0,
            seek_pending: true,
            tail_time: 0,
            head_time_request: 0,
            eof: false,
            start_time: StartTimeSpec::Now,
            end_time: EndTimeSpec::Never,
            loop_length: LoopLengthSpec::SelfLength,
            loop_start: FrameTimeCode::ZERO,
            loop_params_changed: false,
            refill_countdown: refill_period,
            refill_period,
            bytes_per_frame: bpf_guess,
        }));

        let request_cond = Arc::new(Condvar::new());
        let answer_cond = Arc::new(Condvar::new());

        let worker_handle = {
            let shared = shared.clone();
            let request_cond = request_cond.clone();
            let answer_cond = answer_cond.clone();
            let host = host.clone();
            let read_chunk_bytes = config.read_chunk_bytes;
            std::thread::Builder::new()
                .name("soundfile-playback-worker".into())
                .spawn(move || {
                    worker::run(shared, request_cond, answer_cond, host, registry, read_chunk_bytes);
                })
                .expect("failed to spawn playback worker thread")
        };

        Self {
            shared,
            request_cond,
            answer_cond,
            host,
            anchor: RwLock::new(anchor),
            local_anchor: AtomicBool::new(false),
            outlets,
            worker: Some(worker_handle),
        }
    }

    pub fn handle_message(&self, msg: PlaybackMessage) -> Result<()> {
        match msg {
            PlaybackMessage::Open(open) => self.open(open),
            PlaybackMessage::Start(target) => {
                self.start(target);
                Ok(())
            }
            PlaybackMessage::Stop(target) => {
                self.stop(target);
                Ok(())
            }
            PlaybackMessage::LoopLength(target) => {
                self.set_loop_length(target);
                Ok(())
            }
            PlaybackMessage::LoopStart(ftc) => {
                self.set_loop_start(ftc);
                Ok(())
            }
            PlaybackMessage::Time(name) => {
                self.set_anchor_by_name(&name);
                Ok(())
            }
            PlaybackMessage::Print => {
                self.print();
                Ok(())
            }
        }
    }

    fn open(&self, req: OpenPlayback) -> Result<()> {
        if req.filename.trim().is_empty() {
            return Err(SoundfileError::InvalidArgument("open needs a filename".into()));
        }
        let mut shared = self.shared.lock();
        shared.filename = Some(req.filename);
        shared.typename = req.typename;
        shared.onset_frames = req.onset_frames;
        shared.hints = OpenHints {
            header_size: req.header_size,
            channels: req.channels,
            bytes_per_sample: req.bytes_per_sample,
            endianness: req.endianness,
        };
        shared.descriptor = None;
        shared.total_frames = None;
        shared.total_frames_reported = false;
        shared.error = None;
        Self::drain_fifo(&mut shared, usize::MAX);
        shared.reset_epoch = shared.reset_epoch.wrapping_add(1);
        shared.seek_pending = true;
        shared.tail_time = 0;
        shared.head_time_request = 0;
        shared.eof = false;
        shared.start_time = StartTimeSpec::Now;
        shared.end_time = EndTimeSpec::Never;
        shared.loop_length = LoopLengthSpec::SelfLength;
        shared.loop_start = FrameTimeCode::ZERO;
        shared.loop_params_changed = true;
        shared.state = PlaybackState::Startup;
        shared.request = WorkerRequest::Open;
        drop(shared);
        self.request_cond.notify_all();
        Ok(())
    }

    fn start(&self, target: TimeTarget) {
        let mut shared = self.shared.lock();
        if !matches!(shared.state, PlaybackState::Startup2 | PlaybackState::Stream) {
            log::warn!("start: stream is not ready (no file opened yet)");
            self.host.log_error("start: stream is not ready (no file opened yet)");
            return;
        }
        if self.local_anchor.load(Ordering::Relaxed) {
            self.anchor.read().mark(self.host.as_ref());
        }
        shared.start_time = match target {
            TimeTarget::Now => StartTimeSpec::Now,
            TimeTarget::At(ftc) => StartTimeSpec::At(ftc.to_frames()),
        };
        shared.state = PlaybackState::Stream;
    }

    fn stop(&self, target: StopTarget) {
        let mut shared = self.shared.lock();
        match target {
            StopTarget::Immediate | StopTarget::Now => {
                if shared.state == PlaybackState::Startup2 {
                    shared.state = PlaybackState::Idle;
                    shared.request = WorkerRequest::Close;
                    drop(shared);
                    self.request_cond.notify_all();
                    return;
                }
                let now = self.anchor.read().elapsed_frames(self.host.as_ref()) as i64;
                shared.end_time = EndTimeSpec::At(now);
            }
            StopTarget::End => shared.end_time = EndTimeSpec::AtLoop,
            StopTarget::Never => shared.end_time = EndTimeSpec::Never,
            StopTarget::At(ftc) => shared.end_time = EndTimeSpec::At(ftc.to_frames()),
        }
    }

    fn set_loop_length(&self, target: LoopLengthTarget) {
        let mut shared = self.shared.lock();
        shared.loop_length = match target {
            LoopLengthTarget::SelfLength => LoopLengthSpec::SelfLength,
            LoopLengthTarget::At(ftc) => LoopLengthSpec::Explicit(ftc),
        };
        shared.loop_params_changed = true;
    }

    fn set_loop_start(&self, ftc: FrameTimeCode) {
        let mut shared = self.shared.lock();
        shared.loop_start = ftc;
        shared.loop_params_changed = true;
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

    pub fn print(&self) -> PlaybackSnapshot {
        let shared = self.shared.lock();
        PlaybackSnapshot {
            state: shared.state,
            filename: shared.filename.clone(),
            fifo_occupied: shared.consumer.occupied_len(),
            fifo_capacity: shared.fifo_capacity,
            eof: shared.eof,
        }
    }

    fn drain_fifo(shared: &mut Shared, bytes: usize) {
        crate::fifo::drain_consumer(&mut shared.consumer, bytes);
    }

    fn effective_loop_frames(&self, shared: &Shared) -> i64 {
        match shared.loop_length {
            LoopLengthSpec::Explicit(ftc) => ftc.to_frames(),
            LoopLengthSpec::SelfLength => shared.total_frames.map(|t| t as i64).unwrap_or(0),
        }
    }

    /// Produces one realtime block of interleaved host-channel audio into
    /// `out` (length `block_frames * outlets.channel_count`), decoding from
    /// the FIFO, applying start/stop/loop scheduling, and waking the worker
    /// as needed.
    pub fn process_block(&self, out: &mut [f32], block_frames: usize) {
        out.fill(0.0);
        let mut shared = self.shared.lock();

        if let Some(total) = shared.total_frames {
            if !shared.total_frames_reported {
                shared.total_frames_reported = true;
                let value = FrameTimeCode::from_frames(total as i64).emit();
                self.host.emit_list(self.outlets.total_frames, &value);
            }
        }

        if let Some(err) = shared.error.take() {
            shared.state = PlaybackState::Idle;
            drop(shared);
            log::error!("{err}");
            self.host.log_error(&err.to_string());
            self.host.emit_bang(self.outlets.done);
            return;
        }

        if shared.state != PlaybackState::Stream {
            return;
        }

        let block_start = self.anchor.read().elapsed_frames(self.host.as_ref()) as i64;

        if shared.start_time == StartTimeSpec::Now {
            shared.start_time = StartTimeSpec::At(block_start);
        }
        let start_time = shared.start_time_frames().unwrap();

        if shared.loop_params_changed {
            Self::drain_fifo(&mut shared, usize::MAX);
            shared.reset_epoch = shared.reset_epoch.wrapping_add(1);
            shared.seek_pending = true;
            shared.eof = false;
            shared.loop_params_changed = false;
        }

        let bpf = shared.bytes_per_frame.max(1);

        if shared.tail_time != block_start {
            let delta_frames = block_start - shared.tail_time;
            let occupied = shared.consumer.occupied_len() as i64;
            let delta_bytes = delta_frames.saturating_mul(bpf as i64);
            if delta_frames < 0 || delta_bytes > occupied {
                Self::drain_fifo(&mut shared, usize::MAX);
                shared.reset_epoch = shared.reset_epoch.wrapping_add(1);
                shared.seek_pending = true;
                shared.eof = false;
            } else {
                Self::drain_fifo(&mut shared, delta_bytes as usize);
            }
            shared.tail_time = block_start;
        }

        if shared.consumer.occupied_len() == 0 {
            shared.head_time_request = block_start;
            shared.tail_time = block_start;
        }

        let occupied = shared.consumer.occupied_len();
        let want_bytes = block_frames * bpf;
        if occupied < want_bytes && !shared.eof {
            self.request_cond.notify_all();
            return;
        }

        if let EndTimeSpec::AtLoop = shared.end_time {
            let loop_frames = self.effective_loop_frames(&shared);
            if loop_frames > 0 {
                let k = (((block_start - start_time) as f64 / loop_frames as f64).floor() as i64 + 1).max(1);
                shared.end_time = EndTimeSpec::At(start_time + k * loop_frames);
            }
        }

        let end_time = match shared.end_time {
            EndTimeSpec::At(t) => Some(t),
            _ => None,
        };

        let host_channels = self.outlets.channel_count;
        let (file_channels, sample_bytes, endianness) = match &shared.descriptor {
            Some(d) => (d.channels as usize, d.bytes_per_sample, d.endianness),
            None => (host_channels, 2, Endianness::Little),
        };

        let mut decode_until = block_frames;
        let mut finished = false;
        if let Some(end) = end_time {
            if block_start + block_frames as i64 > end {
                decode_until = (end - block_start).max(0) as usize;
                finished = true;
            }
        }
        let mut decode_from = 0usize;
        if block_start < start_time {
            decode_from = ((start_time - block_start) as usize).min(block_frames).min(decode_until);
        }

        let mut raw_block = vec![0u8; block_frames * bpf];
        shared.consumer.pop_slice(&mut raw_block);
        for frame_idx in decode_from..decode_until {
            let raw = &raw_block[frame_idx * bpf..(frame_idx + 1) * bpf];
            let out_slice = &mut out[frame_idx * host_channels..(frame_idx + 1) * host_channels];
            pcm::decode_frame(raw, file_channels, host_channels, sample_bytes, endianness, out_slice);
        }

        shared.tail_time += block_frames as i64;

        shared.refill_countdown = shared.refill_countdown.saturating_sub(1);
        if shared.refill_countdown == 0 {
            shared.refill_countdown = shared.refill_period;
            self.request_cond.notify_all();
        }

        if finished {
            shared.state = PlaybackState::Idle;
            shared.request = WorkerRequest::Close;
            drop(shared);
            self.request_cond.notify_all();
            self.host.emit_bang(self.outlets.done);
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        {
            let mut shared = self.shared.lock();
            shared.request = WorkerRequest::Quit;
        }
        self.request_cond.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::ANCHOR_TABLE;
    use crate::host::DirectoryHost;
    use std::io::Write as _;
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

    fn write_wav(path: &std::path::Path, channels: u16, frames: &[i16]) {
        use byteorder::{LittleEndian, WriteBytesExt};
        let mut buf = Vec::new();
        let bytes_per_sample = 2u16;
        let data_bytes = frames.len() * bytes_per_sample as usize;
        buf.extend_from_slice(b"RIFF");
        buf.write_u32::<LittleEndian>((36 + data_bytes) as u32).unwrap();
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.write_u32::<LittleEndian>(16).unwrap();
        buf.write_u16::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(channels).unwrap();
        buf.write_u32::<LittleEndian>(48000).unwrap();
        buf.write_u32::<LittleEndian>(48000 * channels as u32 * 2).unwrap();
        buf.write_u16::<LittleEndian>(channels * 2).unwrap();
        buf.write_u16::<LittleEndian>(16).unwrap();
        buf.extend_from_slice(b"data");
        buf.write_u32::<LittleEndian>(data_bytes as u32).unwrap();
        for s in frames {
            buf.write_i16::<LittleEndian>(*s).unwrap();
        }
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&buf).unwrap();
    }

    #[test]
    fn exact_stop_boundary_emits_silence_after_stop() {
        let dir = TempDir::new().unwrap();
        let frames: Vec<i16> = (0..1000).map(|i| (i % 100) as i16 * 100).collect();
        write_wav(&dir.path().join("t.wav"), 1, &frames);

        let host = Arc::new(ScriptedHost::new(dir.path()));
        let registry = Arc::new(Registry::default());
        let anchor = ANCHOR_TABLE.create("test-stop-boundary-playback");
        let outlets = PlaybackOutlets {
            channel_count: 1,
            done: OutletId(0),
            total_frames: OutletId(1),
        };
        let stream = PlaybackStream::new(host.clone(), registry, anchor, outlets, Config::default());

        stream.handle_message(PlaybackMessage::parse("open t.wav").unwrap()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        host.set_now(0);
        stream.handle_message(PlaybackMessage::parse("looplength self").unwrap()).unwrap();
        stream.handle_message(PlaybackMessage::parse("start 1 0 0").unwrap()).unwrap();
        stream.handle_message(PlaybackMessage::parse("stop 1 0 500").unwrap()).unwrap();

        let block_frames = 500;
        let mut out = vec![0.0f32; block_frames];
        std::thread::sleep(std::time::Duration::from_millis(50));
        stream.process_block(&mut out, block_frames);
        assert!(out.iter().any(|&s| s != 0.0), "expected audio in first 500 frames");

        let mut out2 = vec![0.0f32; block_frames];
        stream.process_block(&mut out2, block_frames);
        assert!(out2.iter().all(|&s| s == 0.0), "expected silence after the stop boundary");
    }
}
