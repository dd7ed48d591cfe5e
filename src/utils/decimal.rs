//! Decimal arithmetic utilities for price and fee calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round to tick size (e.g., 0.01 for equity prices).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Round up to the next tick. Used for exit floors so rounding never eats profit.
pub fn ceil_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Truncate to a fixed number of decimals without rounding up.
pub fn truncate_dp(value: Decimal, decimals: u32) -> Decimal {
    value.trunc_with_scale(decimals)
}

/// Relative difference `|a - b| / max(1, |b|)`.
pub fn relative_diff(a: Decimal, b: Decimal) -> Decimal {
    (a - b).abs() / b.abs().max(Decimal::ONE)
}

/// Calculate basis points (1 bp = 0.01%)
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * dec!(10000)
}

/// Convert basis points to decimal rate
pub fn from_basis_points(bps: Decimal) -> Decimal {
    bps / dec!(10000)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Exponentially weighted update. The first sample seeds the average.
pub fn ewma(previous: Option<Decimal>, sample: Decimal, alpha: Decimal) -> Decimal {
    match previous {
        Some(prev) => alpha * sample + (Decimal::ONE - alpha) * prev,
        None => sample,
    }
}

/// Clamp into `[min, max]`.
pub fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.10)), dec!(50123.50));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(1.00)), dec!(50123.00));
    }

    #[test]
    fn test_ceil_to_tick() {
        assert_eq!(ceil_to_tick(dec!(100.451127), dec!(0.00001)), dec!(100.45113));
        assert_eq!(ceil_to_tick(dec!(10.001), dec!(0.01)), dec!(10.01));
        // Already on the grid
        assert_eq!(ceil_to_tick(dec!(10.01), dec!(0.01)), dec!(10.01));
    }

    #[test]
    fn test_truncate_dp() {
        assert_eq!(truncate_dp(dec!(0.1234567), 6), dec!(0.123456));
        assert_eq!(truncate_dp(dec!(3.99999), 4), dec!(3.9999));
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(to_basis_points(dec!(0.0001)), dec!(1)); // 0.01% = 1 bp
        assert_eq!(to_basis_points(dec!(0.01)), dec!(100)); // 1% = 100 bp
        assert_eq!(from_basis_points(dec!(50)), dec!(0.005)); // 50 bp = 0.5%
    }

    #[test]
    fn test_ewma_seeds_then_blends() {
        let first = ewma(None, dec!(10), dec!(0.2));
        assert_eq!(first, dec!(10));
        assert_eq!(ewma(Some(first), dec!(20), dec!(0.2)), dec!(12));
    }

    #[test]
    fn test_relative_diff_floors_denominator() {
        assert_eq!(relative_diff(dec!(0.5), dec!(0.25)), dec!(0.25));
        assert_eq!(relative_diff(dec!(101), dec!(100)), dec!(0.01));
    }
}
