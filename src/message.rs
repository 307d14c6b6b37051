//! Typed message parsing for the playback and capture objects.
//!
//! Turns the textual messages a host dispatches (`open`, `start`, `stop`,
//! `looplength`, ...) into typed enums once, at the call site boundary,
//! instead of re-tokenizing ad hoc in every handler.

use crate::error::{Result, SoundfileError};
use crate::ftc::FrameTimeCode;
use crate::pcm::Endianness;

fn invalid(msg: impl Into<String>) -> SoundfileError {
    SoundfileError::InvalidArgument(msg.into())
}

fn parse_ftc(tokens: &[&str]) -> Result<FrameTimeCode> {
    if tokens.len() != 3 {
        return Err(invalid("expected 3 tokens for a frame time code (sign epoch frames)"));
    }
    let mut triple = [0f32; 3];
    for (slot, token) in triple.iter_mut().zip(tokens) {
        *slot = token
            .parse::<f32>()
            .map_err(|_| invalid(format!("not a number: {token}")))?;
    }
    FrameTimeCode::parse(triple).ok_or_else(|| invalid("not a legal frame time code"))
}

/// Where a `start`/`stop` message targets, before being resolved to an
/// absolute frame by the stream (resolution needs the current anchor time,
/// which the parser doesn't have).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeTarget {
    Now,
    At(FrameTimeCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    Immediate,
    Now,
    End,
    Never,
    At(FrameTimeCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLengthTarget {
    SelfLength,
    At(FrameTimeCode),
}

/// `open [-<typename>] filename [onsetFrames [headerSize [channels [bytesPerSample [endianness]]]]]`
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPlayback {
    pub typename: Option<String>,
    pub filename: String,
    pub onset_frames: u64,
    pub header_size: Option<u64>,
    pub channels: Option<u16>,
    pub bytes_per_sample: Option<u8>,
    pub endianness: Option<Endianness>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackMessage {
    Open(OpenPlayback),
    Start(TimeTarget),
    Stop(StopTarget),
    LoopLength(LoopLengthTarget),
    LoopStart(FrameTimeCode),
    Time(String),
    Print,
}

impl PlaybackMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (head, rest) = tokens.split_first().ok_or_else(|| invalid("empty message"))?;

        match *head {
            "open" => Ok(PlaybackMessage::Open(parse_open_playback(rest)?)),
            "start" => Ok(PlaybackMessage::Start(parse_time_target(rest)?)),
            "stop" => Ok(PlaybackMessage::Stop(parse_stop_target(rest)?)),
            "looplength" => Ok(PlaybackMessage::LoopLength(parse_loop_length(rest)?)),
            "loopstart" => Ok(PlaybackMessage::LoopStart(parse_ftc(rest)?)),
            "time" => {
                let name = rest.first().ok_or_else(|| invalid("time needs an anchor name"))?;
                Ok(PlaybackMessage::Time(name.to_string()))
            }
            "print" => Ok(PlaybackMessage::Print),
            "1" if rest.is_empty() => Ok(PlaybackMessage::Start(TimeTarget::Now)),
            "0" if rest.is_empty() => Ok(PlaybackMessage::Stop(StopTarget::Immediate)),
            other => Err(invalid(format!("unrecognized playback message: {other}"))),
        }
    }
}

fn parse_time_target(rest: &[&str]) -> Result<TimeTarget> {
    if rest.is_empty() {
        return Ok(TimeTarget::Now);
    }
    Ok(TimeTarget::At(parse_ftc(rest)?))
}

fn parse_stop_target(rest: &[&str]) -> Result<StopTarget> {
    match rest {
        [] => Ok(StopTarget::Immediate),
        ["now"] => Ok(StopTarget::Now),
        ["end"] => Ok(StopTarget::End),
        ["never"] => Ok(StopTarget::Never),
        other => Ok(StopTarget::At(parse_ftc(other)?)),
    }
}

fn parse_loop_length(rest: &[&str]) -> Result<LoopLengthTarget> {
    match rest {
        ["self"] => Ok(LoopLengthTarget::SelfLength),
        other => Ok(LoopLengthTarget::At(parse_ftc(other)?)),
    }
}

fn parse_open_playback(rest: &[&str]) -> Result<OpenPlayback> {
    let mut tokens = rest.iter().peekable();
    let typename = match tokens.peek() {
        Some(t) if t.starts_with('-') => {
            let t = tokens.next().unwrap();
            Some(t.trim_start_matches('-').to_string())
        }
        _ => None,
    };
    let filename = tokens
        .next()
        .ok_or_else(|| invalid("open needs a filename"))?
        .to_string();
    let rest: Vec<&str> = tokens.copied().collect();
    let onset_frames = rest.first().map(|s| parse_u64(s)).transpose()?.unwrap_or(0);
    let header_size = rest.get(1).map(|s| parse_u64(s)).transpose()?;
    let channels = rest.get(2).map(|s| parse_u16(s)).transpose()?;
    let bytes_per_sample = rest.get(3).map(|s| parse_u8(s)).transpose()?;
    let endianness = rest
        .get(4)
        .map(|s| parse_endianness(s))
        .transpose()?;

    Ok(OpenPlayback {
        typename,
        filename,
        onset_frames,
        header_size,
        channels,
        bytes_per_sample,
        endianness,
    })
}

/// `open [flags] filename` where flags ⊆ {`-bytes N`, `-big`, `-little`,
/// `-rate N`, `-<typename>`}.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenCapture {
    pub typename: Option<String>,
    pub bytes_per_sample: Option<u8>,
    pub endianness: Option<Endianness>,
    pub sample_rate: Option<u32>,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureStart {
    Now,
    Threshold(f32),
    At(FrameTimeCode),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureStop {
    Now,
    At(FrameTimeCode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureMessage {
    Open(OpenCapture),
    Start(CaptureStart),
    Stop(CaptureStop),
    Time(String),
    Print,
}

impl CaptureMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (head, rest) = tokens.split_first().ok_or_else(|| invalid("empty message"))?;

        match *head {
            "open" => Ok(CaptureMessage::Open(parse_open_capture(rest)?)),
            "start" => Ok(CaptureMessage::Start(parse_capture_start(rest)?)),
            "stop" => Ok(CaptureMessage::Stop(parse_capture_stop(rest)?)),
            "time" => {
                let name = rest.first().ok_or_else(|| invalid("time needs an anchor name"))?;
                Ok(CaptureMessage::Time(name.to_string()))
            }
            "print" => Ok(CaptureMessage::Print),
            other => Err(invalid(format!("unrecognized capture message: {other}"))),
        }
    }
}

fn parse_capture_start(rest: &[&str]) -> Result<CaptureStart> {
    match rest {
        [] => Ok(CaptureStart::Now),
        [single] => {
            if let Ok(threshold) = single.parse::<f32>() {
                if single.contains('.') {
                    return Ok(CaptureStart::Threshold(threshold));
                }
            }
            Ok(CaptureStart::At(parse_ftc(rest)?))
        }
        other => Ok(CaptureStart::At(parse_ftc(other)?)),
    }
}

fn parse_capture_stop(rest: &[&str]) -> Result<CaptureStop> {
    match rest {
        [] => Ok(CaptureStop::Now),
        other => Ok(CaptureStop::At(parse_ftc(other)?)),
    }
}

fn parse_open_capture(rest: &[&str]) -> Result<OpenCapture> {
    let mut typename = None;
    let mut bytes_per_sample = None;
    let mut endianness = None;
    let mut sample_rate = None;
    let mut iter = rest.iter().peekable();
    let mut filename = None;

    while let Some(token) = iter.next() {
        match *token {
            "-bytes" => {
                let n = iter.next().ok_or_else(|| invalid("-bytes needs a value"))?;
                bytes_per_sample = Some(parse_u8(n)?);
            }
            "-big" => endianness = Some(Endianness::Big),
            "-little" => endianness = Some(Endianness::Little),
            "-rate" => {
                let n = iter.next().ok_or_else(|| invalid("-rate needs a value"))?;
                sample_rate = Some(parse_u32(n)?);
            }
            flag if flag.starts_with('-') => {
                typename = Some(flag.trim_start_matches('-').to_string());
            }
            name => filename = Some(name.to_string()),
        }
    }

    Ok(OpenCapture {
        typename,
        bytes_per_sample,
        endianness,
        sample_rate,
        filename: filename.ok_or_else(|| invalid("open needs a filename"))?,
    })
}

fn parse_u64(s: &str) -> Result<u64> {
    s.parse().map_err(|_| invalid(format!("not an integer: {s}")))
}
fn parse_u32(s: &str) -> Result<u32> {
    s.parse().map_err(|_| invalid(format!("not an integer: {s}")))
}
fn parse_u16(s: &str) -> Result<u16> {
    s.parse().map_err(|_| invalid(format!("not an integer: {s}")))
}
fn parse_u8(s: &str) -> Result<u8> {
    s.parse().map_err(|_| invalid(format!("not an integer: {s}")))
}
fn parse_endianness(s: &str) -> Result<Endianness> {
    match s {
        "big" => Ok(Endianness::Big),
        "little" => Ok(Endianness::Little),
        other => Err(invalid(format!("unknown endianness: {other}"))),
    }
}
