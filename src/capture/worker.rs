//! Background worker for capture: drains `[tail, head)` to disk in bounded
//! chunks, then finalizes the header once the realtime side has closed the
//! stream and every buffered byte has been written.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::codec::{Registry, WriteHeaderSpec};
use crate::error::SoundfileError;
use crate::fifo::{self, WorkerRequest};
use crate::host::HostApi;
use crate::pcm::Endianness;

use super::{CaptureState, Shared};

struct OpenFile {
    file: File,
    codec_name: &'static str,
}

#[allow(clippy::too_many_arguments)]
fn do_open(
    host: &Arc<dyn HostApi>,
    registry: &Registry,
    filename: &str,
    typename: Option<&str>,
    channels: u16,
    bytes_per_sample: u8,
    sample_rate: u32,
    endianness: Endianness,
    extensions: crate::codec::ExtensionSet,
) -> Result<OpenFile, SoundfileError> {
    let mut file = host
        .create_by_path(filename)
        .map_err(|e| SoundfileError::os(filename, e))?;

    let codec = match typename {
        Some(name) => registry
            .by_name(name)
            .ok_or_else(|| SoundfileError::UnknownHeader { filename: filename.to_string() })?,
        None => registry
            .default_codec()
            .ok_or_else(|| SoundfileError::UnknownHeader { filename: filename.to_string() })?,
    };

    let spec = WriteHeaderSpec {
        channels,
        bytes_per_sample,
        sample_rate,
        endianness,
        extensions,
    };
    codec.write_header(&mut file, filename, &spec)?;

    Ok(OpenFile { file, codec_name: codec.name() })
}

pub(super) fn run(
    shared: Arc<Mutex<Shared>>,
    request_cond: Arc<Condvar>,
    answer_cond: Arc<Condvar>,
    host: Arc<dyn HostApi>,
    registry: Arc<Registry>,
    read_chunk_bytes: usize,
) {
    let mut open_file: Option<OpenFile> = None;
    let mut finishing = false;

    let mut guard = shared.lock();
    loop {
        match guard.request {
            WorkerRequest::Quit => {
                if let Some(mut of) = open_file.take() {
                    finalize(&mut of, &mut guard, &registry);
                }
                answer_cond.notify_all();
                return;
            }
            WorkerRequest::Open => {
                guard.request = WorkerRequest::None;
                let filename = guard.filename.clone();
                let typename = guard.typename.clone();
                let channels = guard.channels;
                let bytes_per_sample = guard.bytes_per_sample;
                let sample_rate = guard.sample_rate;
                let endianness = guard.endianness;
                let extensions = guard.extensions.clone();
                open_file = None;
                finishing = false;

                let opened = match &filename {
                    Some(name) => do_open(&host, &registry, name, typename.as_deref(), channels, bytes_per_sample, sample_rate, endianness, extensions),
                    None => Err(SoundfileError::InvalidArgument("no filename".into())),
                };
                match opened {
                    Ok(of) => {
                        log::debug!("capture: opened {filename:?} for writing");
                        open_file = Some(of);
                    }
                    Err(e) => {
                        log::warn!("capture: open {filename:?} failed: {e}");
                        guard.error = Some(e);
                    }
                }
                continue;
            }
            WorkerRequest::Close => {
                log::debug!("capture: closing");
                guard.request = WorkerRequest::None;
                finishing = true;
                continue;
            }
            WorkerRequest::None => {}
        }

        let Some(_) = open_file.as_ref() else {
            request_cond.wait(&mut guard);
            continue;
        };

        let capacity = guard.fifo.capacity();
        let available = fifo::occupied(guard.head, guard.tail, capacity);

        if available == 0 {
            if finishing {
                let mut of = open_file.take().unwrap();
                finalize(&mut of, &mut guard, &registry);
                guard.state = CaptureState::Idle;
                finishing = false;
                answer_cond.notify_all();
                continue;
            }
            request_cond.wait(&mut guard);
            continue;
        }

        let bpf = guard.bytes_per_frame.max(1);
        let want_bytes = fifo::round_down_to_unit(available.min(read_chunk_bytes), bpf);
        if want_bytes == 0 {
            request_cond.wait(&mut guard);
            continue;
        }
        let tail_at_start = guard.tail;
        let mut buf = vec![0u8; want_bytes];
        guard.fifo.read_at(tail_at_start, &mut buf);

        let of = open_file.as_mut().unwrap();
        let write_result = parking_lot::MutexGuard::unlocked(&mut guard, || of.file.write_all(&buf));

        match write_result {
            Ok(()) => {
                if guard.tail == tail_at_start {
                    guard.tail = fifo::advance(tail_at_start, want_bytes, capacity);
                    guard.frames_written += want_bytes as u64 / bpf as u64;
                    answer_cond.notify_all();
                }
            }
            Err(e) => {
                guard.error = Some(SoundfileError::os(guard.filename.clone().unwrap_or_default(), e));
            }
        }
    }
}

fn finalize(of: &mut OpenFile, guard: &mut parking_lot::MutexGuard<Shared>, registry: &Registry) {
    let filename = guard.filename.clone().unwrap_or_default();
    if let Some(codec) = registry.by_name(of.codec_name) {
        if let Err(e) = codec.update_header(&mut of.file, &filename, guard.frames_written) {
            guard.error = Some(e);
        }
    }
    guard.frames_reported = true;
}
