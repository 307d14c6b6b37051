//! Canonical RIFF/WAVE codec: the default, first-registered type provider.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, SoundfileError};
use crate::pcm::Endianness;

use super::{os_err, ExtensionSet, SoundfileCodec, SoundfileDescriptor, WriteHeaderSpec};

const RIFF_TAG: &[u8; 4] = b"RIFF";
const WAVE_TAG: &[u8; 4] = b"WAVE";
const FMT_TAG: &[u8; 4] = b"fmt ";
const DATA_TAG: &[u8; 4] = b"data";
const BEXT_TAG: &[u8; 4] = b"bext";
const SMPL_TAG: &[u8; 4] = b"smpl";

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// A plain `fmt `/`data` RIFF/WAVE reader-writer with `bext`/`smpl` passthrough.
pub struct WavCodec;

impl WavCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WavCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundfileCodec for WavCodec {
    fn name(&self) -> &'static str {
        "WAV"
    }

    fn is_header(&self, buf: &[u8]) -> bool {
        buf.len() >= 12 && &buf[0..4] == RIFF_TAG && &buf[8..12] == WAVE_TAG
    }

    fn min_probe_len(&self) -> usize {
        12
    }

    fn min_header_size(&self) -> u64 {
        44
    }

    fn read_header(
        &self,
        file: &mut File,
        filename: &str,
        onset_frames: u64,
    ) -> Result<SoundfileDescriptor> {
        let file_len = file.metadata().map_err(|e| os_err(filename, e))?.len();

        let mut riff = [0u8; 12];
        read_exact(file, filename, &mut riff)?;
        if &riff[0..4] != RIFF_TAG {
            return Err(SoundfileError::UnknownHeader { filename: filename.to_string() });
        }
        if &riff[8..12] != WAVE_TAG {
            return Err(SoundfileError::MalformedHeader {
                filename: filename.to_string(),
                codec: self.name(),
            });
        }

        let mut channels = None;
        let mut sample_rate = None;
        let mut bytes_per_sample = None;
        let mut format_tag = None;
        let mut data_size: Option<u64> = None;
        let mut extensions = ExtensionSet::default();

        loop {
            let mut chunk_header = [0u8; 8];
            match file.read_exact(&mut chunk_header) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(os_err(filename, e)),
            }
            let id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
            let size = u32::from_le_bytes([
                chunk_header[4],
                chunk_header[5],
                chunk_header[6],
                chunk_header[7],
            ]) as u64;

            match &id {
                FMT_TAG => {
                    let mut body = vec![0u8; size as usize];
                    read_exact(file, filename, &mut body)?;
                    if body.len() < 16 {
                        return Err(SoundfileError::MalformedHeader {
                            filename: filename.to_string(),
                            codec: self.name(),
                        });
                    }
                    let mut cursor = &body[..];
                    let tag = cursor.read_u16::<LittleEndian>().unwrap();
                    let ch = cursor.read_u16::<LittleEndian>().unwrap();
                    let rate = cursor.read_u32::<LittleEndian>().unwrap();
                    let _byte_rate = cursor.read_u32::<LittleEndian>().unwrap();
                    let _block_align = cursor.read_u16::<LittleEndian>().unwrap();
                    let bits = cursor.read_u16::<LittleEndian>().unwrap();

                    let resolved_tag = if tag == FORMAT_EXTENSIBLE {
                        if body.len() < 40 {
                            return Err(SoundfileError::MalformedHeader {
                                filename: filename.to_string(),
                                codec: self.name(),
                            });
                        }
                        // sub-format GUID starts 10 bytes into the extension;
                        // its first two bytes carry the real format tag.
                        u16::from_le_bytes([body[24 + 10], body[24 + 10 + 1]])
                    } else {
                        tag
                    };

                    if resolved_tag != FORMAT_PCM && resolved_tag != FORMAT_IEEE_FLOAT {
                        return Err(SoundfileError::UnsupportedSampleFormat {
                            filename: filename.to_string(),
                            codec: self.name(),
                            bytes_per_sample: (bits / 8) as u8,
                        });
                    }

                    channels = Some(ch);
                    sample_rate = Some(rate);
                    bytes_per_sample = Some((bits / 8) as u8);
                    format_tag = Some(resolved_tag);
                }
                DATA_TAG => {
                    data_size = Some(size);
                    // Defer consuming the data chunk: record where it starts
                    // and seek past it so trailing chunks (e.g. a `bext`
                    // written after `data`) are still found.
                    let data_start = file.stream_position().map_err(|e| os_err(filename, e))?;
                    file.seek(SeekFrom::Current(pad16(size) as i64))
                        .map_err(|e| os_err(filename, e))?;
                    extensions.set("__data_start", data_start.to_le_bytes().to_vec());
                    continue;
                }
                BEXT_TAG => {
                    let mut body = vec![0u8; size as usize];
                    read_exact(file, filename, &mut body)?;
                    extensions.set("bext", body);
                    skip_pad(file, filename, size)?;
                    continue;
                }
                SMPL_TAG => {
                    let mut body = vec![0u8; size as usize];
                    read_exact(file, filename, &mut body)?;
                    extensions.set("smpl", body);
                    skip_pad(file, filename, size)?;
                    continue;
                }
                _ => {
                    file.seek(SeekFrom::Current(pad16(size) as i64))
                        .map_err(|e| os_err(filename, e))?;
                    continue;
                }
            }
            skip_pad_already_consumed(size);
        }

        let channels = channels.ok_or_else(|| SoundfileError::MalformedHeader {
            filename: filename.to_string(),
            codec: self.name(),
        })?;
        let sample_rate = sample_rate.ok_or_else(|| SoundfileError::MalformedHeader {
            filename: filename.to_string(),
            codec: self.name(),
        })?;
        let bytes_per_sample = bytes_per_sample.ok_or_else(|| SoundfileError::MalformedHeader {
            filename: filename.to_string(),
            codec: self.name(),
        })?;
        if !matches!(bytes_per_sample, 2 | 3 | 4 | 8) {
            return Err(SoundfileError::UnsupportedSampleFormat {
                filename: filename.to_string(),
                codec: self.name(),
                bytes_per_sample,
            });
        }
        let _ = format_tag;

        let data_start = extensions
            .get("__data_start")
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
            .ok_or_else(|| SoundfileError::MalformedHeader {
                filename: filename.to_string(),
                codec: self.name(),
            })?;
        let declared_data_size = data_size.unwrap_or(0);
        let actual_data_size = declared_data_size.min(file_len.saturating_sub(data_start));

        let bytes_per_frame = channels as u64 * bytes_per_sample as u64;
        let onset_bytes = onset_frames.saturating_mul(bytes_per_frame);
        if onset_bytes > actual_data_size {
            return Err(SoundfileError::Empty { filename: filename.to_string() });
        }
        let byte_limit = actual_data_size - onset_bytes;
        if byte_limit == 0 {
            return Err(SoundfileError::Empty { filename: filename.to_string() });
        }

        file.seek(SeekFrom::Start(data_start + onset_bytes))
            .map_err(|e| os_err(filename, e))?;

        Ok(SoundfileDescriptor {
            channels,
            bytes_per_sample,
            sample_rate,
            endianness: Endianness::Little,
            header_size: data_start,
            byte_limit,
            extensions,
        })
    }

    fn write_header(&self, file: &mut File, filename: &str, spec: &WriteHeaderSpec) -> Result<u64> {
        let bits_per_sample = spec.bytes_per_sample as u16 * 8;
        let block_align = spec.channels * spec.bytes_per_sample as u16;
        let byte_rate = spec.sample_rate * block_align as u32;
        let format_tag = if spec.bytes_per_sample == 4 || spec.bytes_per_sample == 8 {
            FORMAT_IEEE_FLOAT
        } else {
            FORMAT_PCM
        };

        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(RIFF_TAG);
        header.write_u32::<LittleEndian>(0).unwrap(); // patched by update_header
        header.extend_from_slice(WAVE_TAG);

        header.extend_from_slice(FMT_TAG);
        header.write_u32::<LittleEndian>(16).unwrap();
        header.write_u16::<LittleEndian>(format_tag).unwrap();
        header.write_u16::<LittleEndian>(spec.channels).unwrap();
        header.write_u32::<LittleEndian>(spec.sample_rate).unwrap();
        header.write_u32::<LittleEndian>(byte_rate).unwrap();
        header.write_u16::<LittleEndian>(block_align).unwrap();
        header.write_u16::<LittleEndian>(bits_per_sample).unwrap();

        if let Some(bext) = spec.extensions.get("bext") {
            header.extend_from_slice(BEXT_TAG);
            header.write_u32::<LittleEndian>(bext.len() as u32).unwrap();
            header.extend_from_slice(bext);
            if bext.len() % 2 == 1 {
                header.push(0);
            }
        }
        if let Some(smpl) = spec.extensions.get("smpl") {
            header.extend_from_slice(SMPL_TAG);
            header.write_u32::<LittleEndian>(smpl.len() as u32).unwrap();
            header.extend_from_slice(smpl);
            if smpl.len() % 2 == 1 {
                header.push(0);
            }
        }

        header.extend_from_slice(DATA_TAG);
        header.write_u32::<LittleEndian>(0).unwrap(); // patched by update_header

        file.write_all(&header).map_err(|e| os_err(filename, e))?;
        Ok(header.len() as u64)
    }

    fn update_header(&self, file: &mut File, filename: &str, frames_written: u64) -> Result<()> {
        let bytes_per_frame = file_block_align(file, filename)?;
        let data_bytes = frames_written * bytes_per_frame as u64;
        let data_chunk_offset = find_data_chunk_offset(file, filename)?;
        let riff_size = (file.metadata().map_err(|e| os_err(filename, e))?.len()).saturating_sub(8);

        file.seek(SeekFrom::Start(4)).map_err(|e| os_err(filename, e))?;
        file.write_u32::<LittleEndian>(riff_size as u32)
            .map_err(|e| os_err(filename, e))?;

        file.seek(SeekFrom::Start(data_chunk_offset))
            .map_err(|e| os_err(filename, e))?;
        file.write_u32::<LittleEndian>(data_bytes as u32)
            .map_err(|e| os_err(filename, e))?;
        Ok(())
    }

    fn has_extension(&self, name: &str) -> bool {
        name == "bext" || name == "smpl"
    }

    fn endianness_policy(&self, _requested: Option<Endianness>, _bytes_per_sample: u8) -> Endianness {
        Endianness::Little
    }
}

fn read_exact(file: &mut File, filename: &str, buf: &mut [u8]) -> Result<()> {
    file.read_exact(buf).map_err(|e| os_err(filename, e))
}

fn pad16(size: u64) -> u64 {
    if size % 2 == 1 {
        size + 1
    } else {
        size
    }
}

fn skip_pad(file: &mut File, filename: &str, size: u64) -> Result<()> {
    if size % 2 == 1 {
        file.seek(SeekFrom::Current(1)).map_err(|e| os_err(filename, e))?;
    }
    Ok(())
}

fn skip_pad_already_consumed(_size: u64) {}

/// Re-reads the `fmt ` chunk to recover `channels * bytes_per_sample`,
/// used by [`WavCodec::update_header`] which only has a `&mut File`.
fn file_block_align(file: &mut File, filename: &str) -> Result<u16> {
    let saved = file.stream_position().map_err(|e| os_err(filename, e))?;
    file.seek(SeekFrom::Start(12)).map_err(|e| os_err(filename, e))?;
    let result = loop {
        let mut chunk_header = [0u8; 8];
        file.read_exact(&mut chunk_header).map_err(|e| os_err(filename, e))?;
        let id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
        let size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as u64;
        if &id == FMT_TAG {
            let mut body = vec![0u8; size as usize];
            file.read_exact(&mut body).map_err(|e| os_err(filename, e))?;
            let block_align = u16::from_le_bytes([body[12], body[13]]);
            break block_align;
        } else {
            file.seek(SeekFrom::Current(pad16(size) as i64))
                .map_err(|e| os_err(filename, e))?;
        }
    };
    file.seek(SeekFrom::Start(saved)).map_err(|e| os_err(filename, e))?;
    Ok(result)
}

fn find_data_chunk_offset(file: &mut File, filename: &str) -> Result<u64> {
    let saved = file.stream_position().map_err(|e| os_err(filename, e))?;
    file.seek(SeekFrom::Start(12)).map_err(|e| os_err(filename, e))?;
    let result = loop {
        let offset = file.stream_position().map_err(|e| os_err(filename, e))?;
        let mut chunk_header = [0u8; 8];
        file.read_exact(&mut chunk_header).map_err(|e| os_err(filename, e))?;
        let id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
        let size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as u64;
        if &id == DATA_TAG {
            break offset + 4;
        } else {
            file.seek(SeekFrom::Current(pad16(size) as i64))
                .map_err(|e| os_err(filename, e))?;
        }
    };
    file.seek(SeekFrom::Start(saved)).map_err(|e| os_err(filename, e))?;
    Ok(result)
}
