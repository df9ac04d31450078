//! Kubernetes resource quantities (`1Gi`, `500M`, `1.5e9`) as storage sizes.

use std::{fmt, str::FromStr};

use crate::error::ValidationError;

/// A storage size, kept both as the quantity string it was requested with and
/// as a byte count.
///
/// The original string is what gets written back onto the volume, so a claim
/// for `1Gi` produces a volume advertising `1Gi` rather than `1073741824`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capacity {
    quantity: String,
    bytes: u64,
}

impl Capacity {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == 0
    }

    /// The quantity exactly as it was parsed
    pub fn as_str(&self) -> &str {
        &self.quantity
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quantity)
    }
}

enum Scale {
    Multiply(u128),
    Divide(u128),
    // Exponents beyond any `u128` factor
    TooLarge,
    TooSmall,
}

impl Scale {
    fn from_suffix(suffix: &str) -> Option<Self> {
        let scale = match suffix {
            "" => Self::Multiply(1),

            "Ki" => Self::Multiply(1 << 10),
            "Mi" => Self::Multiply(1 << 20),
            "Gi" => Self::Multiply(1 << 30),
            "Ti" => Self::Multiply(1 << 40),
            "Pi" => Self::Multiply(1 << 50),
            "Ei" => Self::Multiply(1 << 60),

            "n" => Self::Divide(10u128.pow(9)),
            "u" => Self::Divide(10u128.pow(6)),
            "m" => Self::Divide(10u128.pow(3)),
            "k" => Self::Multiply(10u128.pow(3)),
            "M" => Self::Multiply(10u128.pow(6)),
            "G" => Self::Multiply(10u128.pow(9)),
            "T" => Self::Multiply(10u128.pow(12)),
            "P" => Self::Multiply(10u128.pow(15)),
            "E" => Self::Multiply(10u128.pow(18)),

            // Decimal exponent, e.g. `1e3` or `5E-1`
            _ => {
                let exponent = suffix
                    .strip_prefix('e')
                    .or_else(|| suffix.strip_prefix('E'))?;
                let (negative, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => (true, digits),
                    None => (false, exponent.strip_prefix('+').unwrap_or(exponent)),
                };
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }

                // All digits, so parsing can only fail by overflowing
                let factor = digits
                    .parse::<u32>()
                    .ok()
                    .and_then(|exponent| 10u128.checked_pow(exponent));

                match (factor, negative) {
                    (Some(factor), false) => Self::Multiply(factor),
                    (Some(factor), true) => Self::Divide(factor),
                    (None, false) => Self::TooLarge,
                    (None, true) => Self::TooSmall,
                }
            }
        };

        Some(scale)
    }
}

impl FromStr for Capacity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidQuantity {
            quantity: s.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = s.trim();
        if trimmed.starts_with('-') {
            return Err(invalid("storage size cannot be negative"));
        }
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(split);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(invalid("more than one decimal point"));
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("missing numeric value"));
        }

        let scale = Scale::from_suffix(suffix).ok_or_else(|| invalid("unknown suffix"))?;

        let too_large = || invalid("value does not fit in 64 bits");
        let numerator: u128 = format!("{whole}{fraction}")
            .parse()
            .map_err(|_| too_large())?;
        let denominator = u32::try_from(fraction.len())
            .ok()
            .and_then(|digits| 10u128.checked_pow(digits))
            .ok_or_else(too_large)?;

        // Partial bytes still need a whole byte of backing storage
        let bytes = match scale {
            Scale::Multiply(factor) => numerator
                .checked_mul(factor)
                .ok_or_else(too_large)?
                .div_ceil(denominator),
            Scale::Divide(factor) => match denominator.checked_mul(factor) {
                Some(denominator) => numerator.div_ceil(denominator),
                // The divisor exceeds any mantissa, so less than a byte is left
                None => u128::from(numerator != 0),
            },
            Scale::TooLarge if numerator == 0 => 0,
            Scale::TooLarge => return Err(too_large()),
            Scale::TooSmall => u128::from(numerator != 0),
        };
        let bytes = u64::try_from(bytes).map_err(|_| too_large())?;

        Ok(Self {
            quantity: trimmed.to_owned(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(quantity: &str) -> u64 {
        quantity.parse::<Capacity>().unwrap().bytes()
    }

    #[test]
    fn binary_suffixes() {
        assert_eq!(bytes("1Ki"), 1024);
        assert_eq!(bytes("1Gi"), 1024 * 1024 * 1024);
        assert_eq!(bytes("1.5Gi"), 3 * 512 * 1024 * 1024);
        assert_eq!(bytes("2Ti"), 2 << 40);
    }

    #[test]
    fn decimal_suffixes_and_exponents() {
        assert_eq!(bytes("500M"), 500_000_000);
        assert_eq!(bytes("10k"), 10_000);
        assert_eq!(bytes("1e3"), 1000);
        assert_eq!(bytes("2E6"), 2_000_000);
        assert_eq!(bytes("1E"), 1_000_000_000_000_000_000);
        assert_eq!(bytes("+12"), 12);
    }

    #[test]
    fn fractions_round_up_to_whole_bytes() {
        assert_eq!(bytes("100m"), 1);
        assert_eq!(bytes("1500m"), 2);
        assert_eq!(bytes("0.1"), 1);
        assert_eq!(bytes("5e-1"), 1);
        assert_eq!(bytes("1e-50"), 1);
        assert_eq!(bytes("0.5e-38"), 1);
        assert_eq!(bytes("0e-50"), 0);
    }

    #[test]
    fn huge_exponents_overflow() {
        for quantity in ["1e40", "1e99999999999", "2e19"] {
            let err = quantity.parse::<Capacity>().unwrap_err();
            assert!(err.to_string().contains("does not fit in 64 bits"), "{err}");
        }
        assert_eq!(bytes("0e40"), 0);
    }

    #[test]
    fn zero_is_parsed_but_flagged() {
        let capacity: Capacity = "0Gi".parse().unwrap();
        assert!(capacity.is_zero());
        assert_eq!(capacity.to_string(), "0Gi");
    }

    #[test]
    fn keeps_the_original_spelling() {
        let capacity: Capacity = " 1Gi ".parse().unwrap();
        assert_eq!(capacity.as_str(), "1Gi");
    }

    #[test]
    fn rejects_malformed_quantities() {
        for quantity in ["", "Gi", "-1Gi", "1.2.3", "12XB", "1e", ".", "99999Ei"] {
            let err = quantity.parse::<Capacity>().unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidQuantity { .. }),
                "{quantity}: {err}"
            );
        }
    }
}
