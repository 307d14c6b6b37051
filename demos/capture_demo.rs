//! Generates a few seconds of a sine tone and records it to a WAV file
//! through the capture engine, in lieu of a real audio input callback. Run
//! with:
//!
//!     cargo run --example capture_demo -- out.wav
use std::env;
use std::f32::consts::TAU;
use std::sync::Arc;

use soundfile_stream::host::{DirectoryHost, OutletId};
use soundfile_stream::message::CaptureMessage;
use soundfile_stream::{CaptureOutlets, CaptureStream, Config, Environment};

const BLOCK_FRAMES: usize = 512;
const CHANNELS: usize = 1;
const SAMPLE_RATE: f32 = 48_000.0;
const TONE_HZ: f32 = 440.0;
const SECONDS: usize = 2;

fn main() {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| "capture_demo_out.wav".to_string());
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
    let anchor = env.create_anchor("capture-demo");

    let stream = CaptureStream::new(
        host,
        env.registry(),
        anchor,
        CaptureOutlets {
            channel_count: CHANNELS,
            start_time: OutletId(0),
            frames: OutletId(1),
        },
        Config::default(),
    );

    stream
        .handle_message(CaptureMessage::parse(&format!("open -rate 48000 {filename}")).unwrap())
        .expect("open");
    stream
        .handle_message(CaptureMessage::parse("start").unwrap())
        .expect("start");

    let total_frames = SAMPLE_RATE as usize * SECONDS;
    let mut phase = 0f32;
    let step = TAU * TONE_HZ / SAMPLE_RATE;
    let mut produced = 0;

    while produced < total_frames {
        let this_block = BLOCK_FRAMES.min(total_frames - produced);
        let mut input = vec![0f32; this_block * CHANNELS];
        for frame in input.chunks_mut(CHANNELS) {
            let sample = phase.sin() * 0.5;
            phase = (phase + step) % TAU;
            frame.fill(sample);
        }
        stream.process_block(&input, this_block);
        produced += this_block;
    }

    stream
        .handle_message(CaptureMessage::parse("stop").unwrap())
        .expect("stop");
}
