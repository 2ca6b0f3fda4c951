//! Small integer helpers shared by the planners.

/// Greatest common divisor, `gcd(0, x) == x`.
pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Integer division rounding up. `div_up(x, 0)` is `x`.
pub(crate) fn div_up(value: u64, divisor: u64) -> u64 {
    if divisor == 0 {
        return value;
    }
    value.div_ceil(divisor)
}

/// Round `value` up to the next multiple of `multiple`.
pub(crate) fn round_up(value: u64, multiple: u64) -> u64 {
    div_up(value, multiple) * multiple
}

/// Largest power of two dividing `value`; zero maps to zero.
pub(crate) fn pow2_factor(value: u64) -> u64 {
    value & value.wrapping_neg()
}
