//! Tolerant fingerprint comparison.
//!
//! A fingerprint is a short `k1=v1 k2=v2` string summarizing local state at a
//! sync point. Replicas accumulate floating-point values in different but
//! equally valid orders, so corresponding numeric tokens are compared with an
//! absolute tolerance instead of byte equality. Everything else (keys, step
//! counts formatted as text, flags) must match exactly.
//!
//! Token ordering is significant: callers format fingerprints so that values
//! of comparable magnitude appear in corresponding positions.

use crate::wire::MAX_FINGERPRINT_LEN;

/// Absolute tolerance for numeric token comparison.
pub const FLOAT_TOLERANCE: f64 = 1e-10;

/// Compare two fingerprints token-wise.
///
/// Both inputs are split on spaces and `=` into non-empty tokens. A token
/// pair where both sides parse completely as finite numbers matches when the
/// absolute difference is within [`FLOAT_TOLERANCE`]; any other pair matches
/// on exact bytes. The fingerprints match iff the token sequences have equal
/// length and every pair matches.
pub fn matches(a: &str, b: &str) -> bool {
    let mut ta = tokens(a);
    let mut tb = tokens(b);
    loop {
        match (ta.next(), tb.next()) {
            (Some(x), Some(y)) => {
                if !token_matches(x, y) {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split([' ', '=']).filter(|t| !t.is_empty())
}

fn token_matches(a: &str, b: &str) -> bool {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= FLOAT_TOLERANCE,
        _ => a == b,
    }
}

/// Parse a token as a finite number. Non-finite values fall back to byte
/// comparison, where `inf` vs `-inf` still disagrees.
fn parse_number(token: &str) -> Option<f64> {
    let value: f64 = token.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Clamp a fingerprint to the wire width, respecting UTF-8 boundaries.
pub fn clamp(mut s: String) -> String {
    let max = MAX_FINGERPRINT_LEN - 1;
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Format a fingerprint in place, clamped to the wire width.
///
/// The convenience the hosted computation reaches for at every sync point:
///
/// ```
/// let fp = lockstep::fingerprint!("energy={:.12} step={}", -123.456, 7);
/// assert_eq!(fp, "energy=-123.456000000000 step=7");
/// ```
#[macro_export]
macro_rules! fingerprint {
    ($($arg:tt)*) => {
        $crate::fingerprint::clamp(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_match() {
        assert!(matches("energy=100.0 step=1", "energy=100.0 step=1"));
        assert!(matches("", ""));
    }

    #[test]
    fn numeric_tokens_match_within_tolerance() {
        assert!(matches("energy=1.0000000001", "energy=1.0"));
        // Difference 2e-11 is inside the 1e-10 band.
        assert!(matches("v=1e-11", "v=-1e-11"));
        // The boundary itself is inclusive.
        assert!(matches("v=0.0", "v=0.0000000001"));
    }

    #[test]
    fn numeric_tokens_mismatch_beyond_tolerance() {
        assert!(!matches("energy=1.0", "energy=1.001"));
        assert!(!matches("v=0.0", "v=0.00000000011"));
    }

    #[test]
    fn tolerance_is_absolute_not_relative() {
        // 1e12 vs 1e12 + 1 differ by 1.0, far over the absolute band, even
        // though the relative error is tiny.
        assert!(!matches("e=1000000000000.0", "e=1000000000001.0"));
    }

    #[test]
    fn non_numeric_tokens_compare_exactly() {
        assert!(matches("phase=INTRAF", "phase=INTRAF"));
        assert!(!matches("phase=INTRAF", "phase=INTERF"));
        // Case matters for text tokens.
        assert!(!matches("phase=a", "phase=A"));
    }

    #[test]
    fn numeric_vs_text_in_same_slot_mismatches() {
        assert!(!matches("v=1.0", "v=one"));
        assert!(!matches("v=one", "v=1.0"));
    }

    #[test]
    fn token_count_must_agree() {
        assert!(!matches("a=1 b=2", "a=1"));
        assert!(!matches("a=1", "a=1 b=2"));
        assert!(!matches("", "a=1"));
    }

    #[test]
    fn consecutive_separators_are_skipped() {
        assert!(matches("a==1  b=2", "a=1 b=2"));
        assert!(matches(" a=1 ", "a=1"));
    }

    #[test]
    fn keys_participate_in_comparison() {
        // Keys are tokens too; a renamed key is a mismatch even if values agree.
        assert!(!matches("energy=1.0", "enthalpy=1.0"));
    }

    #[test]
    fn ordering_is_significant() {
        assert!(!matches("a=1 b=2", "b=2 a=1"));
    }

    #[test]
    fn comparison_is_symmetric() {
        let a = "energy=1.0000000001 step=3";
        let b = "energy=1.0 step=3";
        assert_eq!(matches(a, b), matches(b, a));
    }

    #[test]
    fn non_finite_tokens_fall_back_to_bytes() {
        assert!(matches("v=inf", "v=inf"));
        assert!(!matches("v=inf", "v=-inf"));
        assert!(matches("v=NaN", "v=NaN"));
    }

    #[test]
    fn clamp_respects_wire_width() {
        let long = "x".repeat(MAX_FINGERPRINT_LEN * 2);
        assert_eq!(clamp(long).len(), MAX_FINGERPRINT_LEN - 1);
        let short = clamp("energy=1.0".into());
        assert_eq!(short, "energy=1.0");
    }

    #[test]
    fn fingerprint_macro_formats_and_clamps() {
        assert_eq!(fingerprint!("e={:.3} s={}", 1.5, 2), "e=1.500 s=2");
        assert_eq!(
            fingerprint!("{}", "y".repeat(1000)).len(),
            MAX_FINGERPRINT_LEN - 1
        );
    }
}
