//! Kubernetes resource quantities, restricted to what byte sizes need.

use crate::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
  ("Ei", 60),
  ("Pi", 50),
  ("Ti", 40),
  ("Gi", 30),
  ("Mi", 20),
  ("Ki", 10),
];

// Mantissas longer than this cannot be scaled without overflowing u128.
const MAX_DIGITS: usize = 24;
const MAX_EXPONENT: u32 = 24;

/// Parse a quantity such as `10Gi`, `1.5G`, `512e6` or `1024` into bytes.
/// Fractions of a byte are rounded up.
pub fn parse(value: &str) -> Result<u64> {
  let invalid = || Error::InvalidQuantity(value.to_owned());

  let s = value.trim();
  let s = s.strip_prefix('+').unwrap_or(s);
  let split = s
    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
    .unwrap_or(s.len());
  let (number, suffix) = s.split_at(split);
  let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
  if whole.is_empty() && fraction.is_empty() {
    return Err(invalid());
  }

  if fraction.contains('.') || whole.len() + fraction.len() > MAX_DIGITS {
    return Err(invalid());
  }

  let (numerator, denominator) = scale(suffix).ok_or_else(invalid)?;
  let mantissa = whole
    .bytes()
    .chain(fraction.bytes())
    .fold(0u128, |acc, d| acc * 10 + u128::from(d - b'0'));
  let denominator = denominator
    .checked_mul(10u128.pow(fraction.len() as u32))
    .ok_or_else(invalid)?;
  let numerator = numerator.checked_mul(mantissa).ok_or_else(invalid)?;

  let bytes = numerator / denominator + u128::from(numerator % denominator != 0);
  u64::try_from(bytes).map_err(|_| invalid())
}

/// Multiplier of `suffix` as a fraction.
fn scale(suffix: &str) -> Option<(u128, u128)> {
  let decimal = |exp: u32| Some((10u128.pow(exp), 1));

  if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
    return Some((1u128 << shift, 1));
  }

  match suffix {
    "" => Some((1, 1)),
    "n" => Some((1, 10u128.pow(9))),
    "u" => Some((1, 10u128.pow(6))),
    "m" => Some((1, 10u128.pow(3))),
    "k" => decimal(3),
    "M" => decimal(6),
    "G" => decimal(9),
    "T" => decimal(12),
    "P" => decimal(15),
    "E" => decimal(18),
    s if s.starts_with('e') || s.starts_with('E') => {
      let exp: i32 = s[1..].parse().ok()?;
      if exp.unsigned_abs() > MAX_EXPONENT {
        return None;
      }

      if exp >= 0 {
        decimal(exp as u32)
      } else {
        Some((1, 10u128.pow(exp.unsigned_abs())))
      }
    }
    _ => None,
  }
}

/// Format a byte count in canonical binary-SI form: the largest binary
/// suffix that divides it exactly, otherwise plain bytes.
pub fn format(bytes: u64) -> String {
  if bytes != 0 {
    for (suffix, shift) in BINARY_SUFFIXES {
      if bytes % (1u64 << shift) == 0 {
        return format!("{}{}", bytes >> shift, suffix);
      }
    }
  }

  bytes.to_string()
}

pub fn to_quantity(bytes: u64) -> Quantity {
  Quantity(format(bytes))
}
