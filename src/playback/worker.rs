//! Background worker: owns the open `File`, performs the blocking seeks and
//! reads, and refills the FIFO's head region while the realtime thread only
//! ever touches the tail region. A loop parked on a condvar between bursts
//! of work, driven by a request/acknowledge handshake rather than a simple
//! running flag.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Observer, Producer};

use crate::codec::Registry;
use crate::error::SoundfileError;
use crate::fifo::{self, Snapshot, WorkerRequest};
use crate::host::HostApi;

use super::{LoopLengthSpec, OpenHints, PlaybackState, Shared};

struct OpenFile {
    file: File,
    initial_offset: u64,
    byte_limit: u64,
}

#[allow(clippy::too_many_arguments)]
fn do_open(
    host: &Arc<dyn HostApi>,
    registry: &Registry,
    filename: &str,
    typename: Option<&str>,
    onset_frames: u64,
    hints: &OpenHints,
) -> Result<(OpenFile, usize, u64, crate::codec::SoundfileDescriptor), SoundfileError> {
    let mut file = host
        .open_by_path(filename)
        .map_err(|e| SoundfileError::os(filename, e))?;

    let codec = if let Some(name) = typename {
        registry
            .by_name(name)
            .ok_or_else(|| SoundfileError::UnknownHeader { filename: filename.to_string() })?
    } else {
        let mut probe = vec![0u8; registry.max_probe_len().max(12)];
        let read = file.read(&mut probe).map_err(|e| SoundfileError::os(filename, e))?;
        probe.truncate(read);
        file.seek(SeekFrom::Start(0)).map_err(|e| SoundfileError::os(filename, e))?;
        registry
            .detect(&probe)
            .ok_or_else(|| SoundfileError::UnknownHeader { filename: filename.to_string() })?
    };

    let mut descriptor = codec.read_header(&mut file, filename, onset_frames)?;
    if let Some(ch) = hints.channels {
        descriptor.channels = ch;
    }
    if let Some(bps) = hints.bytes_per_sample {
        descriptor.bytes_per_sample = bps;
    }
    if let Some(endian) = hints.endianness {
        descriptor.endianness = endian;
    }
    if let Some(hs) = hints.header_size {
        descriptor.header_size = hs;
    }

    let bpf = descriptor.bytes_per_frame().max(1) as usize;
    let total_frames = descriptor.byte_limit / bpf as u64;
    let initial_offset = descriptor.header_size + onset_frames * bpf as u64;
    let byte_limit = descriptor.byte_limit;

    Ok((
        OpenFile { file, initial_offset, byte_limit },
        bpf,
        total_frames,
        descriptor,
    ))
}

/// The worker's main loop, run on its own thread for the life of the stream.
pub(super) fn run(
    shared: Arc<Mutex<Shared>>,
    request_cond: Arc<Condvar>,
    answer_cond: Arc<Condvar>,
    host: Arc<dyn HostApi>,
    registry: Arc<Registry>,
    read_chunk_bytes: usize,
) {
    let mut open_file: Option<OpenFile> = None;
    let mut next_seek: u64 = 0;

    let mut guard = shared.lock();
    loop {
        match guard.request {
            WorkerRequest::Quit => return,
            WorkerRequest::Open => {
                guard.request = WorkerRequest::None;
                let filename = guard.filename.clone();
                let typename = guard.typename.clone();
                let onset_frames = guard.onset_frames;
                let hints = guard.hints.clone();
                open_file = None;

                let opened = match &filename {
                    Some(name) => do_open(&host, &registry, name, typename.as_deref(), onset_frames, &hints),
                    None => Err(SoundfileError::InvalidArgument("no filename".into())),
                };

                match opened {
                    Ok((of, bpf, total_frames, descriptor)) => {
                        log::debug!("playback: opened {filename:?} ({total_frames} frames)");
                        next_seek = of.initial_offset;
                        open_file = Some(of);
                        guard.bytes_per_frame = bpf;
                        guard.total_frames = Some(total_frames);
                        guard.descriptor = Some(descriptor);
                        guard.state = PlaybackState::Startup2;
                        fifo::drain_consumer(&mut guard.consumer, usize::MAX);
                        guard.reset_epoch = guard.reset_epoch.wrapping_add(1);
                        guard.seek_pending = true;
                        guard.tail_time = 0;
                        guard.head_time_request = 0;
                        guard.eof = false;
                    }
                    Err(err) => {
                        log::warn!("playback: open {filename:?} failed: {err}");
                        guard.error = Some(err);
                        guard.eof = true;
                    }
                }
                continue;
            }
            WorkerRequest::Close => {
                log::debug!("playback: closing");
                guard.request = WorkerRequest::None;
                open_file = None;
                guard.eof = true;
                answer_cond.notify_all();
                continue;
            }
            WorkerRequest::None => {}
        }

        let Some(of) = open_file.as_mut() else {
            request_cond.wait(&mut guard);
            continue;
        };
        if guard.eof {
            request_cond.wait(&mut guard);
            continue;
        }

        let bpf = guard.bytes_per_frame.max(1);

        let loop_bytes = match guard.loop_length {
            LoopLengthSpec::SelfLength => of.byte_limit,
            LoopLengthSpec::Explicit(ftc) => (ftc.to_frames().max(0) as u64) * bpf as u64,
        };
        if loop_bytes == 0 {
            guard.error = Some(SoundfileError::Empty {
                filename: guard.filename.clone().unwrap_or_default(),
            });
            guard.eof = true;
            continue;
        }

        let loop_start_bytes = (guard.loop_start.to_frames().max(0) as u64) * bpf as u64;
        let loop_begin = of.initial_offset + loop_start_bytes;
        let loop_end = loop_begin + loop_bytes;

        if guard.seek_pending {
            let head_time_request = guard.head_time_request;
            let start_time = guard.start_time_frames().unwrap_or(0);
            let byte_time = (head_time_request - start_time) * bpf as i64;
            let within_loop = if byte_time >= 0 {
                byte_time as u64 % loop_bytes
            } else {
                let neg = (-byte_time) as u64;
                (loop_bytes - (neg % loop_bytes)) % loop_bytes
            };
            next_seek = loop_begin + within_loop;
            guard.seek_pending = false;
        }

        let loop_remaining = loop_end.saturating_sub(next_seek) as usize;
        let want_bytes = fifo::round_down_to_unit(guard.producer.vacant_len().min(read_chunk_bytes).min(loop_remaining), bpf);

        if want_bytes < bpf {
            request_cond.wait(&mut guard);
            continue;
        }

        let snapshot = Snapshot {
            epoch: guard.reset_epoch,
            head_time_request: guard.head_time_request,
        };
        let seek_target = next_seek;

        let mut buf = vec![0u8; want_bytes];
        let read_result = parking_lot::MutexGuard::unlocked(&mut guard, || {
            of.file
                .seek(SeekFrom::Start(seek_target))
                .and_then(|_| read_fully(&mut of.file, &mut buf))
                .map(|n| (n, buf))
        });

        match read_result {
            Ok((bytes_read, mut data)) => {
                if bytes_read < data.len() {
                    data[bytes_read..].fill(0);
                }
                if guard.reset_epoch == snapshot.epoch && guard.head_time_request == snapshot.head_time_request {
                    guard.producer.push_slice(&data);
                    next_seek = seek_target + data.len() as u64;
                    if next_seek >= loop_end {
                        next_seek = loop_begin;
                    }
                    answer_cond.notify_all();
                }
            }
            Err(e) => {
                guard.error = Some(SoundfileError::os(guard.filename.clone().unwrap_or_default(), e));
                guard.eof = true;
            }
        }
    }
}

fn read_fully(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
