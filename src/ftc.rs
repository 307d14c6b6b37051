//! FrameTimeCode (FTC): the canonical time quantity.
//!
//! An exact frame count split into three single-precision floats so it
//! survives a lossless round trip over a float-only wire format:
//! `sign ∈ {+1, −1}`, `epoch = |n| div 2^24`, `frames = |n| mod 2^24`.
//! `2^24` is the largest integer exactly representable in `f32`, which
//! bounds `frames` *and* `epoch` itself to the same exact range — so the
//! split is only lossless for magnitudes up to `2^24 × 2^24 = 2^48 − 1`.
//! `from_frames` saturates anything beyond that instead of silently
//! truncating `epoch` through an inexact `f32` cast.

use std::cmp::Ordering;
use std::fmt;

/// Largest magnitude exactly representable in `f32`; the FTC split radix.
pub const EPOCH_RADIX: i64 = 1 << 24;

/// Largest magnitude `from_frames`/`to_frames` round-trips exactly:
/// `epoch` and `frames` both fit within `EPOCH_RADIX`, so
/// `(EPOCH_RADIX - 1) * EPOCH_RADIX + (EPOCH_RADIX - 1) == EPOCH_RADIX^2 - 1`.
pub const MAX_EXACT_MAGNITUDE: i64 = EPOCH_RADIX * EPOCH_RADIX - 1;

/// An exact frame count, represented as `(sign, epoch, frames)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimeCode {
    pub sign: f32,
    pub epoch: f32,
    pub frames: f32,
}

impl Eq for FrameTimeCode {}

impl FrameTimeCode {
    /// Canonical zero: `(+1, 0, 0)`.
    pub const ZERO: FrameTimeCode = FrameTimeCode {
        sign: 1.0,
        epoch: 0.0,
        frames: 0.0,
    };

    /// Build from an exact signed frame count, normalizing to `0 ≤ frames < 2^24`.
    /// Magnitudes beyond `MAX_EXACT_MAGNITUDE` saturate rather than round-trip
    /// lossily — `epoch` is itself an `f32` and can't carry an exact value
    /// past `EPOCH_RADIX`.
    pub fn from_frames(n: i64) -> Self {
        let sign = if n < 0 { -1.0 } else { 1.0 };
        let magnitude = n.unsigned_abs().min(MAX_EXACT_MAGNITUDE as u64);
        let epoch = magnitude / (EPOCH_RADIX as u64);
        let frames = magnitude % (EPOCH_RADIX as u64);
        FrameTimeCode {
            sign,
            epoch: epoch as f32,
            frames: frames as f32,
        }
    }

    /// Recover the exact signed frame count.
    pub fn to_frames(self) -> i64 {
        let magnitude = (self.epoch as i64) * EPOCH_RADIX + (self.frames as i64);
        if self.sign < 0.0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Parse a 3-float wire tuple, rejecting anything that isn't a legal,
    /// normalized FTC.
    pub fn parse(triple: [f32; 3]) -> Option<Self> {
        let [sign, epoch, frames] = triple;
        if !sign.is_finite() || !epoch.is_finite() || !frames.is_finite() {
            return None;
        }
        if sign != 1.0 && sign != -1.0 {
            return None;
        }
        if epoch.fract() != 0.0 || frames.fract() != 0.0 {
            return None;
        }
        if epoch < 0.0 || frames < 0.0 || frames >= EPOCH_RADIX as f32 {
            return None;
        }
        Some(FrameTimeCode { sign, epoch, frames })
    }

    /// Emit as the 3-float wire tuple `[sign, epoch, frames]`.
    pub fn emit(self) -> [f32; 3] {
        [self.sign, self.epoch, self.frames]
    }

    /// `a + b`, re-normalized. Saturates at `i64::MIN`/`i64::MAX` rather than
    /// wrapping, matching the saturation discipline used for scalar multiply.
    pub fn add(self, other: Self) -> Self {
        let sum = self.to_frames().saturating_add(other.to_frames());
        Self::from_frames(sum)
    }

    /// `floor(toFrames(a) × s)`, saturating at `±(2^63 − 1)`.
    pub fn multiply_by_scalar(self, s: f32) -> Self {
        let product = (self.to_frames() as f64) * (s as f64);
        let floored = product.floor();
        let clamped = if floored.is_nan() {
            0.0
        } else {
            floored.clamp(-(i64::MAX as f64), i64::MAX as f64)
        };
        Self::from_frames(clamped as i64)
    }

    /// Total order agreeing with `toFrames`.
    pub fn compare(self, other: Self) -> i32 {
        match self.to_frames().cmp(&other.to_frames()) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }
}

impl PartialOrd for FrameTimeCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrameTimeCode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_frames().cmp(&other.to_frames())
    }
}

impl fmt::Display for FrameTimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_frames())
    }
}

impl From<i64> for FrameTimeCode {
    fn from(n: i64) -> Self {
        FrameTimeCode::from_frames(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_canonical() {
        let z = FrameTimeCode::from_frames(0);
        assert_eq!(z, FrameTimeCode::ZERO);
        assert_eq!(z.emit(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn negative_zero_form_is_accepted_equivalently() {
        let neg_zero = FrameTimeCode::parse([-1.0, 0.0, 0.0]).unwrap();
        assert_eq!(neg_zero.to_frames(), 0);
    }

    #[test]
    fn round_trip_from_frames_to_frames() {
        for n in [
            0,
            1,
            -1,
            EPOCH_RADIX - 1,
            EPOCH_RADIX,
            EPOCH_RADIX + 1,
            -EPOCH_RADIX,
            MAX_EXACT_MAGNITUDE,
            -MAX_EXACT_MAGNITUDE,
            1_000_000_000,
            -1_000_000_000,
        ] {
            let ftc = FrameTimeCode::from_frames(n);
            assert!(ftc.frames >= 0.0 && ftc.frames < EPOCH_RADIX as f32);
            assert_eq!(ftc.to_frames(), n, "round trip failed for {n}");
        }
    }

    #[test]
    fn from_frames_saturates_beyond_exact_magnitude() {
        let max = FrameTimeCode::from_frames(i64::MAX);
        assert_eq!(max.to_frames(), MAX_EXACT_MAGNITUDE);
        let min = FrameTimeCode::from_frames(i64::MIN);
        assert_eq!(min.to_frames(), -MAX_EXACT_MAGNITUDE);
    }

    #[test]
    fn emit_then_parse_round_trips() {
        for n in [0_i64, 1, -1, 1_234_567_890, -1_234_567_890] {
            let ftc = FrameTimeCode::from_frames(n);
            let parsed = FrameTimeCode::parse(ftc.emit()).expect("legal FTC parses");
            assert_eq!(parsed, ftc);
        }
    }

    #[test]
    fn parse_rejects_out_of_range_frames() {
        assert!(FrameTimeCode::parse([1.0, 0.0, EPOCH_RADIX as f32]).is_none());
        assert!(FrameTimeCode::parse([0.0, 0.0, 0.0]).is_none());
        assert!(FrameTimeCode::parse([1.0, 0.0, 0.5]).is_none());
        assert!(FrameTimeCode::parse([1.0, -1.0, 0.0]).is_none());
    }

    #[test]
    fn add_is_commutative_and_associative() {
        let a = FrameTimeCode::from_frames(1000);
        let b = FrameTimeCode::from_frames(-250);
        let c = FrameTimeCode::from_frames(EPOCH_RADIX * 2 + 5);
        assert_eq!(a.add(b), b.add(a));
        assert_eq!(a.add(b).add(c), a.add(b.add(c)));
    }

    #[test]
    fn compare_is_total_order_agreeing_with_to_frames() {
        let a = FrameTimeCode::from_frames(10);
        let b = FrameTimeCode::from_frames(20);
        assert_eq!(a.compare(b), -1);
        assert_eq!(b.compare(a), 1);
        assert_eq!(a.compare(a), 0);
        assert!(a < b);
    }

    #[test]
    fn multiply_by_scalar_truncates_toward_negative_infinity() {
        let a = FrameTimeCode::from_frames(7);
        assert_eq!(a.multiply_by_scalar(0.5).to_frames(), 3);
        let neg = FrameTimeCode::from_frames(-7);
        assert_eq!(neg.multiply_by_scalar(0.5).to_frames(), -4);
    }

    #[test]
    fn multiply_by_scalar_saturates() {
        let a = FrameTimeCode::from_frames(MAX_EXACT_MAGNITUDE);
        let result = a.multiply_by_scalar(2.0);
        assert_eq!(result.to_frames(), MAX_EXACT_MAGNITUDE);
    }
}
