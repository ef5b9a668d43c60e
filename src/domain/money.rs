//! Cents-denominated arithmetic helpers.
//!
//! All money in the ledger is dollars with two decimal places. Comparisons
//! go through integer cents so float noise never breaks an invariant check.
//! Rounding nudges the scaled value by a sliver before rounding: decimal
//! halves like 1.005 sit just below .5 in binary and would otherwise round
//! the wrong way.

const NUDGE: f64 = 1e-9;

fn round_scaled(scaled: f64) -> f64 {
    if scaled >= 0.0 {
        (scaled + NUDGE).round()
    } else {
        (scaled - NUDGE).round()
    }
}

/// Round half-away-from-zero to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    round_scaled(value * 100.0) / 100.0
}

/// Round a count field to the nearest whole unit.
pub fn round_units(value: f64) -> f64 {
    round_scaled(value)
}

/// Integer cents for equality checks.
pub fn cents(value: f64) -> i64 {
    round_scaled(value * 100.0) as i64
}

/// True when two money values agree to the cent.
pub fn cents_eq(a: f64, b: f64) -> bool {
    cents(a) == cents(b)
}

/// True when two money values differ by more than one cent.
pub fn drifts_beyond_one_cent(a: f64, b: f64) -> bool {
    (cents(a) - cents(b)).abs() > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(-1.005), -1.01);
        assert_eq!(round2(2.675), 2.68);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(99.994), 99.99);
    }

    #[test]
    fn test_round2_is_idempotent() {
        for value in [0.1, 1.005, -3.338, 1234.5678, -0.004999] {
            let once = round2(value);
            assert_eq!(round2(once), once);
        }
    }

    #[test]
    fn test_round_units_to_whole() {
        assert_eq!(round_units(49.6), 50.0);
        assert_eq!(round_units(49.5), 50.0);
        assert_eq!(round_units(-0.4), 0.0);
        assert_eq!(round_units(-1.5), -2.0);
    }

    #[test]
    fn test_cents_eq_absorbs_float_noise() {
        assert!(cents_eq(0.1 + 0.2, 0.3));
        assert!(cents_eq(1300.0, 1000.0 + 300.0));
        assert!(!cents_eq(1300.0, 1300.02));
    }

    #[test]
    fn test_drift_threshold_is_one_cent() {
        assert!(!drifts_beyond_one_cent(1000.0, 1000.01));
        assert!(drifts_beyond_one_cent(1000.0, 1000.02));
        assert!(drifts_beyond_one_cent(900.0, 1000.0));
    }
}
