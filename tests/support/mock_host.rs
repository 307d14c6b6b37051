//! A deterministic host double shared by the scenario tests: file access is
//! scoped to a temp directory, and the logical clock is a settable frame
//! counter instead of real elapsed time.

use std::io::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};

use soundfile_stream::host::{DirectoryHost, HostApi, OutletId};
use soundfile_stream::time::LogicalInstant;

pub struct ScriptedHost {
    inner: DirectoryHost,
    now: AtomicI64,
}

impl ScriptedHost {
    pub fn new(dir: &std::path::Path) -> Self {
        Self {
            inner: DirectoryHost::new(dir.to_path_buf()),
            now: AtomicI64::new(0),
        }
    }

    pub fn set_now(&self, frames: i64) {
        self.now.store(frames, Ordering::SeqCst);
    }
}

impl HostApi for ScriptedHost {
    fn logical_time_now(&self) -> LogicalInstant {
        self.inner.logical_time_now()
    }
    fn logical_time_since_frames(&self, _since: LogicalInstant) -> f64 {
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

/// Writes a minimal mono/stereo 16-bit PCM WAV file for a fixture.
pub fn write_wav(path: &std::path::Path, channels: u16, frames: &[i16]) {
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
