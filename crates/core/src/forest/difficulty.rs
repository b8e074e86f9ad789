use num_bigint::BigUint;
use num_traits::{One, Zero};
use thicket_common::error::{ForestError, Result};

/// Turns a block's opaque difficulty bits into the work it contributes.
pub trait DifficultyCalculator: Send + Sync {
    fn work(&self, bits: u32) -> Result<BigUint>;
}

/// Bitcoin compact targets: `work = 2^256 / (target + 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactWork;

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

impl CompactWork {
    /// Expand compact bits into the full 256-bit target.
    pub fn target(bits: u32) -> Result<BigUint> {
        let exponent = bits >> 24;
        let mantissa = bits & MANTISSA_MASK;

        if mantissa != 0 && bits & SIGN_BIT != 0 {
            return Err(ForestError::Difficulty(format!("bits {:#010x} encode a negative target", bits)));
        }
        if mantissa != 0
            && (exponent > 34 || (mantissa > 0xff && exponent > 33) || (mantissa > 0xffff && exponent > 32))
        {
            return Err(ForestError::Difficulty(format!("bits {:#010x} overflow 256 bits", bits)));
        }

        let target = if exponent <= 3 {
            BigUint::from(mantissa >> (8 * (3 - exponent)))
        } else {
            BigUint::from(mantissa) << (8 * (exponent - 3)) as usize
        };
        if target.is_zero() {
            return Err(ForestError::Difficulty(format!("bits {:#010x} encode a zero target", bits)));
        }
        Ok(target)
    }
}

impl DifficultyCalculator for CompactWork {
    fn work(&self, bits: u32) -> Result<BigUint> {
        let target = Self::target(bits)?;
        Ok((BigUint::one() << 256usize) / (target + BigUint::one()))
    }
}
