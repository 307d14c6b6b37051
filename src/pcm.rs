//! PCM transfer: byte↔sample conversion for 16/24/32/64-bit, big/little
//! endian, interleaved frames.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order for on-disk samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// 16-bit saturation limit: `±(2^15 − 1)`, never the negative extremum —
/// keeps the representable range symmetric.
const I16_LIMIT: f32 = 32767.0;
/// 24-bit saturation limit: `±(2^23 − 1)`.
const I24_LIMIT: f32 = 8_388_607.0;

const I16_SCALE: f32 = 32768.0; // 2^15
const I24_SCALE: f32 = 8_388_608.0; // 2^23

/// Decode one sample from `bytes_per_sample` bytes to a float in roughly
/// `[-1.0, 1.0]` (full-scale float passes through unclamped).
pub fn decode_sample(src: &[u8], bytes_per_sample: u8, endianness: Endianness) -> f32 {
    match bytes_per_sample {
        2 => {
            let v = read_i16(src, endianness);
            v as f32 / I16_SCALE
        }
        3 => {
            let v = read_i24(src, endianness);
            v as f32 / I24_SCALE
        }
        4 => {
            let bits = read_u32(src, endianness);
            f32::from_bits(bits)
        }
        8 => {
            let bits = read_u64(src, endianness);
            f64::from_bits(bits) as f32
        }
        other => panic!("unsupported bytes_per_sample: {other}"),
    }
}

/// Encode one float sample into `bytes_per_sample` bytes, saturating integer
/// formats to `±(2^(8b−1) − 1)`.
pub fn encode_sample(value: f32, dst: &mut [u8], bytes_per_sample: u8, endianness: Endianness) {
    match bytes_per_sample {
        2 => {
            let scaled = (value * I16_SCALE).round().clamp(-I16_LIMIT, I16_LIMIT);
            write_i16(dst, scaled as i16, endianness);
        }
        3 => {
            let scaled = (value * I24_SCALE).round().clamp(-I24_LIMIT, I24_LIMIT);
            write_i24(dst, scaled as i32, endianness);
        }
        4 => write_u32(dst, value.to_bits(), endianness),
        8 => write_u64(dst, (value as f64).to_bits(), endianness),
        other => panic!("unsupported bytes_per_sample: {other}"),
    }
}

/// Decode one interleaved frame of `file_channels` samples from `src`,
/// writing into `out[..host_channels]`. Channels in excess of the file's
/// channel count are zero-filled on output; channels beyond `host_channels`
/// in the file are ignored.
pub fn decode_frame(
    src: &[u8],
    file_channels: usize,
    host_channels: usize,
    bytes_per_sample: u8,
    endianness: Endianness,
    out: &mut [f32],
) {
    debug_assert!(out.len() >= host_channels);
    let bps = bytes_per_sample as usize;
    for ch in 0..host_channels {
        out[ch] = if ch < file_channels {
            decode_sample(&src[ch * bps..ch * bps + bps], bytes_per_sample, endianness)
        } else {
            0.0
        };
    }
}

/// Encode one interleaved frame of `host_channels` input samples into
/// `dst[..file_channels * bytes_per_sample]`. Input channels beyond
/// `file_channels` are dropped.
pub fn encode_frame(
    input: &[f32],
    file_channels: usize,
    bytes_per_sample: u8,
    endianness: Endianness,
    dst: &mut [u8],
) {
    let bps = bytes_per_sample as usize;
    for ch in 0..file_channels {
        let value = input.get(ch).copied().unwrap_or(0.0);
        encode_sample(value, &mut dst[ch * bps..ch * bps + bps], bytes_per_sample, endianness);
    }
}

fn read_i16(src: &[u8], endianness: Endianness) -> i16 {
    match endianness {
        Endianness::Little => LittleEndian::read_i16(src),
        Endianness::Big => BigEndian::read_i16(src),
    }
}

fn write_i16(dst: &mut [u8], value: i16, endianness: Endianness) {
    match endianness {
        Endianness::Little => LittleEndian::write_i16(dst, value),
        Endianness::Big => BigEndian::write_i16(dst, value),
    }
}

fn read_i24(src: &[u8], endianness: Endianness) -> i32 {
    match endianness {
        Endianness::Little => LittleEndian::read_i24(src),
        Endianness::Big => BigEndian::read_i24(src),
    }
}

fn write_i24(dst: &mut [u8], value: i32, endianness: Endianness) {
    match endianness {
        Endianness::Little => LittleEndian::write_i24(dst, value),
        Endianness::Big => BigEndian::write_i24(dst, value),
    }
}

fn read_u32(src: &[u8], endianness: Endianness) -> u32 {
    match endianness {
        Endianness::Little => LittleEndian::read_u32(src),
        Endianness::Big => BigEndian::read_u32(src),
    }
}

fn write_u32(dst: &mut [u8], value: u32, endianness: Endianness) {
    match endianness {
        Endianness::Little => LittleEndian::write_u32(dst, value),
        Endianness::Big => BigEndian::write_u32(dst, value),
    }
}

fn read_u64(src: &[u8], endianness: Endianness) -> u64 {
    match endianness {
        Endianness::Little => LittleEndian::read_u64(src),
        Endianness::Big => BigEndian::read_u64(src),
    }
}

fn write_u64(dst: &mut [u8], value: u64, endianness: Endianness) {
    match endianness {
        Endianness::Little => LittleEndian::write_u64(dst, value),
        Endianness::Big => BigEndian::write_u64(dst, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn sixteen_bit_round_trip_within_one_step() {
        for i in 0..200 {
            let t = i as f32 / 200.0;
            let sample = (2.0 * PI * t).sin();
            let mut buf = [0u8; 2];
            encode_sample(sample, &mut buf, 2, Endianness::Little);
            let back = decode_sample(&buf, 2, Endianness::Little);
            assert!((back - sample).abs() <= 1.0 / I16_SCALE, "sample {sample} back {back}");
        }
    }

    #[test]
    fn twentyfour_bit_round_trip_within_one_step() {
        for i in 0..200 {
            let t = i as f32 / 200.0;
            let sample = (2.0 * PI * t).sin();
            let mut buf = [0u8; 3];
            encode_sample(sample, &mut buf, 3, Endianness::Big);
            let back = decode_sample(&buf, 3, Endianness::Big);
            assert!((back - sample).abs() <= 1.0 / I24_SCALE, "sample {sample} back {back}");
        }
    }

    #[test]
    fn float32_passes_through_exactly() {
        let sample = 0.333_333_3_f32;
        let mut buf = [0u8; 4];
        encode_sample(sample, &mut buf, 4, Endianness::Little);
        let back = decode_sample(&buf, 4, Endianness::Little);
        assert_eq!(back, sample);
    }

    #[test]
    fn write_saturates_away_from_negative_extremum() {
        let mut buf16 = [0u8; 2];
        encode_sample(-2.0, &mut buf16, 2, Endianness::Little);
        assert_eq!(LittleEndian::read_i16(&buf16), -(I16_LIMIT as i16));

        let mut buf24 = [0u8; 3];
        encode_sample(-2.0, &mut buf24, 3, Endianness::Little);
        assert_eq!(LittleEndian::read_i24(&buf24), -(I24_LIMIT as i32));
    }

    #[test]
    fn decode_frame_zero_fills_excess_host_channels() {
        let bps = 2usize;
        let mut src = vec![0u8; bps]; // 1 file channel
        write_i16(&mut src, 16384, Endianness::Little);
        let mut out = [0.0f32; 2];
        decode_frame(&src, 1, 2, 2, Endianness::Little, &mut out);
        assert!(out[0] > 0.0);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn encode_frame_drops_excess_input_channels() {
        let mut dst = vec![0u8; 2]; // 1 file channel
        encode_frame(&[0.5, 0.9, 0.1], 1, 2, Endianness::Little, &mut dst);
        let decoded = decode_sample(&dst, 2, Endianness::Little);
        assert!((decoded - 0.5).abs() <= 1.0 / I16_SCALE);
    }
}
