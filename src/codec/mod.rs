//! Type provider interface for sample file formats.
//!
//! An ordered, first-match registry of codecs, populated once at startup
//! and then only ever read from.

pub mod wav;

use std::collections::HashMap;
use std::fs::File;

use crate::error::{Result, SoundfileError};
use crate::pcm::Endianness;

/// Per-open-file metadata filled in by [`SoundfileCodec::read_header`].
#[derive(Debug, Clone)]
pub struct SoundfileDescriptor {
    pub channels: u16,
    pub bytes_per_sample: u8,
    pub sample_rate: u32,
    pub endianness: Endianness,
    pub header_size: u64,
    /// Usable byte limit: file size minus header minus skipped onset frames.
    pub byte_limit: u64,
    pub extensions: ExtensionSet,
}

impl SoundfileDescriptor {
    pub fn bytes_per_frame(&self) -> u64 {
        self.channels as u64 * self.bytes_per_sample as u64
    }
}

/// Opaque extension chunks carried alongside the core header — e.g. WAV
/// `bext`/`smpl`. Validated only by chunk id and declared size; payload is
/// otherwise opaque to the engine.
#[derive(Debug, Clone, Default)]
pub struct ExtensionSet {
    chunks: HashMap<String, Vec<u8>>,
}

impl ExtensionSet {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.chunks.get(name).map(Vec::as_slice)
    }

    pub fn set(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.chunks.insert(name.into(), data);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.chunks.contains_key(name)
    }
}

/// Arguments to [`SoundfileCodec::write_header`].
pub struct WriteHeaderSpec {
    pub channels: u16,
    pub bytes_per_sample: u8,
    pub sample_rate: u32,
    pub endianness: Endianness,
    pub extensions: ExtensionSet,
}

/// The contract every sample-file format must expose.
pub trait SoundfileCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Does this codec recognize `buf` as its header? `buf` holds at least
    /// [`Self::min_probe_len`] bytes when available (fewer only at true EOF).
    fn is_header(&self, buf: &[u8]) -> bool;

    /// Bytes of header this codec needs to make an `is_header` decision.
    fn min_probe_len(&self) -> usize;

    /// Minimum header size this codec can ever produce — used by the
    /// registry to compute the global minimum probe length.
    fn min_header_size(&self) -> u64;

    /// Reads and validates the header, filling a [`SoundfileDescriptor`].
    /// `onset_frames` is skipped past the header before `byte_limit` is
    /// computed.
    fn read_header(
        &self,
        file: &mut File,
        filename: &str,
        onset_frames: u64,
    ) -> Result<SoundfileDescriptor>;

    /// Writes a fresh header for a file about to be recorded into.
    /// `nframes` is a placeholder frame count (0 for a stream of unknown
    /// final length); returns the header size in bytes.
    fn write_header(&self, file: &mut File, filename: &str, spec: &WriteHeaderSpec) -> Result<u64>;

    /// Patches the header once the true frame count is known, at close.
    fn update_header(&self, file: &mut File, filename: &str, frames_written: u64) -> Result<()>;

    /// Does this codec understand an extension chunk by this name?
    fn has_extension(&self, name: &str) -> bool;

    /// Stages an extension chunk for the next [`Self::write_header`] call,
    /// rejecting chunk ids this codec doesn't understand so a typo'd or
    /// foreign-codec chunk name fails at the call site instead of silently
    /// vanishing from the written header.
    fn add_extension(&self, spec: &mut WriteHeaderSpec, name: &str, data: Vec<u8>) -> Result<()> {
        if !self.has_extension(name) {
            return Err(SoundfileError::InvalidArgument(format!(
                "{} does not support an extension chunk named {name:?}",
                self.name()
            )));
        }
        spec.extensions.set(name, data);
        Ok(())
    }

    /// Chooses the endianness actually used, given what the caller
    /// requested (`None` = "no preference") and the sample width.
    fn endianness_policy(&self, requested: Option<Endianness>, bytes_per_sample: u8) -> Endianness;
}

/// An ordered, first-match type registry.
pub struct Registry {
    codecs: Vec<Box<dyn SoundfileCodec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Registers a codec. The first one registered is the default.
    pub fn register(&mut self, codec: Box<dyn SoundfileCodec>) -> &mut Self {
        self.codecs.push(codec);
        self
    }

    /// The first registered codec whose `is_header` matches `buf`.
    pub fn detect(&self, buf: &[u8]) -> Option<&dyn SoundfileCodec> {
        self.codecs
            .iter()
            .find(|codec| buf.len() >= codec.min_probe_len().min(buf.len()) && codec.is_header(buf))
            .map(|boxed| boxed.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn SoundfileCodec> {
        self.codecs
            .iter()
            .find(|codec| codec.name() == name)
            .map(|boxed| boxed.as_ref())
    }

    /// Default (index 0) codec, if any are registered.
    pub fn default_codec(&self) -> Option<&dyn SoundfileCodec> {
        self.codecs.first().map(|boxed| boxed.as_ref())
    }

    /// Largest `min_header_size` across registered providers.
    pub fn min_header_size(&self) -> u64 {
        self.codecs.iter().map(|c| c.min_header_size()).max().unwrap_or(0)
    }

    pub fn max_probe_len(&self) -> usize {
        self.codecs.iter().map(|c| c.min_probe_len()).max().unwrap_or(0)
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(wav::WavCodec::new()));
        registry
    }
}

pub(crate) fn os_err(filename: &str, err: std::io::Error) -> SoundfileError {
    SoundfileError::os(filename, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysCodec(&'static str);
    impl SoundfileCodec for AlwaysCodec {
        fn name(&self) -> &'static str {
            self.0
        }
        fn is_header(&self, _buf: &[u8]) -> bool {
            true
        }
        fn min_probe_len(&self) -> usize {
            4
        }
        fn min_header_size(&self) -> u64 {
            44
        }
        fn read_header(&self, _f: &mut File, _n: &str, _o: u64) -> Result<SoundfileDescriptor> {
            unimplemented!()
        }
        fn write_header(&self, _f: &mut File, _n: &str, _s: &WriteHeaderSpec) -> Result<u64> {
            unimplemented!()
        }
        fn update_header(&self, _f: &mut File, _n: &str, _fr: u64) -> Result<()> {
            unimplemented!()
        }
        fn has_extension(&self, _name: &str) -> bool {
            false
        }
        fn endianness_policy(&self, _r: Option<Endianness>, _b: u8) -> Endianness {
            Endianness::Little
        }
    }

    #[test]
    fn first_registered_wins_on_tie() {
        let mut registry = Registry::new();
        registry.register(Box::new(AlwaysCodec("first")));
        registry.register(Box::new(AlwaysCodec("second")));
        let detected = registry.detect(b"RIFF").unwrap();
        assert_eq!(detected.name(), "first");
        assert_eq!(registry.default_codec().unwrap().name(), "first");
    }

    #[test]
    fn default_registry_has_wav_first() {
        let registry = Registry::default();
        assert_eq!(registry.default_codec().unwrap().name(), "WAV");
    }
}
