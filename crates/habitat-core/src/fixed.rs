use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Every resource quantity, rate, efficiency and severity inside the tick
/// loop uses this type so that runs are bit-identical across platforms.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Fixed64, saturating at the representable range. Use
/// only for initialization, never in sim loop. Panics on NaN.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::saturating_from_num(v)
}

/// Convert an f64 to Fixed64, or `None` if it is NaN or out of range.
#[inline]
pub fn try_f64_to_fixed64(v: f64) -> Option<Fixed64> {
    Fixed64::checked_from_num(v)
}

/// Convert Fixed64 to f64. Use only for reports and logging, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Clamp a value into the unit interval `[0, 1]`.
#[inline]
pub fn clamp_unit(v: Fixed64) -> Fixed64 {
    v.clamp(Fixed64::ZERO, Fixed64::ONE)
}

/// Multiply saturating at the representable range instead of panicking.
#[inline]
pub fn mul_sat(a: Fixed64, b: Fixed64) -> Fixed64 {
    a.saturating_mul(b)
}
