//! Plays a WAV file to stdout as raw little-endian f32 samples, blocking on
//! a fixed-size timer instead of a real audio callback. Run with:
//!
//!     cargo run --example playback_demo -- track.wav > out.raw
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use soundfile_stream::host::{DirectoryHost, OutletId};
use soundfile_stream::message::PlaybackMessage;
use soundfile_stream::{Config, Environment, PlaybackOutlets, PlaybackStream};

const BLOCK_FRAMES: usize = 512;
const CHANNELS: usize = 2;

fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: playback_demo <file.wav>");
        std::process::exit(1);
    });
    let dir = std::path::Path::new(&path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let filename = std::path::Path::new(&path)
        .file_name()
        .expect("filename")
        .to_string_lossy()
        .into_owned();

    let env = Environment::new();
    let host = Arc::new(DirectoryHost::new(dir));
    let anchor = env.create_anchor("playback-demo");

    let stream = PlaybackStream::new(
        host,
        env.registry(),
        anchor,
        PlaybackOutlets {
            channel_count: CHANNELS,
            done: OutletId(0),
            total_frames: OutletId(1),
        },
        Config::default(),
    );

    stream
        .handle_message(PlaybackMessage::parse(&format!("open {filename}")).unwrap())
        .expect("open");
    // Open hands off to the background worker, which opens the file and
    // primes the FIFO on its own thread; give it a beat before starting.
    thread::sleep(Duration::from_millis(100));
    stream
        .handle_message(PlaybackMessage::parse("start").unwrap())
        .expect("start");

    let mut out = vec![0f32; BLOCK_FRAMES * CHANNELS];
    loop {
        stream.process_block(&mut out, BLOCK_FRAMES);
        let snapshot = stream.print();
        if snapshot.eof {
            break;
        }
        for sample in &out {
            print!("{sample} ");
        }
        println!();
    }
}
