use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for the base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed throughout gradir. Work
/// vectors, tapes, constants and seeds all carry one of these types; there is
/// no wrapper-number evaluation path — derivatives come from tape sweeps.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
    /// Raw bit pattern, used to key constant-pool deduplication.
    fn to_key_bits(self) -> u64;
}

impl Float for f32 {
    #[inline]
    fn to_key_bits(self) -> u64 {
        self.to_bits() as u64
    }
}

impl Float for f64 {
    #[inline]
    fn to_key_bits(self) -> u64 {
        self.to_bits()
    }
}
