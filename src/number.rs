// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;

use anyhow::{anyhow, bail, Result};
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

// Longest integer rendered without exponent. Matches the cut-off JSON
// encoders commonly use.
const MAX_PLAIN_DIGITS: i128 = 21;

/// Arbitrary precision decimal.
///
/// The value is `mantissa * 10^exponent` kept in normalized form: the
/// mantissa carries no trailing zeros and zero is always `(0, 0)`. Two
/// numbers are equal exactly when their normalized parts are equal, so
/// `1`, `1.0` and `10e-1` are the same number and `-0 == 0`.
#[derive(Clone)]
pub struct Number {
    mantissa: BigInt,
    exponent: i64,
}

fn pow10(n: u64) -> BigInt {
    num_traits::pow(BigInt::from(10u8), n as usize)
}

impl Number {
    // Strips trailing zeros off the mantissa, returning how many were removed.
    fn strip_zeros(mut mantissa: BigInt) -> (BigInt, i64) {
        let mut stripped = 0;
        if mantissa.is_zero() {
            return (mantissa, stripped);
        }
        let ten = BigInt::from(10u8);
        while (&mantissa % &ten).is_zero() {
            mantissa /= &ten;
            stripped += 1;
        }
        (mantissa, stripped)
    }

    fn normalized(mantissa: BigInt, exponent: i64) -> Option<Number> {
        if mantissa.is_zero() {
            return Some(Number::zero());
        }
        let (mantissa, stripped) = Number::strip_zeros(mantissa);
        let exponent = exponent.checked_add(stripped)?;
        Some(Number { mantissa, exponent })
    }

    fn integer(value: BigInt) -> Number {
        let (mantissa, exponent) = Number::strip_zeros(value);
        Number { mantissa, exponent }
    }

    pub fn zero() -> Number {
        Number {
            mantissa: BigInt::zero(),
            exponent: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    pub fn is_integer(&self) -> bool {
        self.exponent >= 0
    }

    fn digits(&self) -> String {
        self.mantissa.magnitude().to_str_radix(10)
    }

    // Position of the most significant digit relative to the decimal point.
    fn magnitude(&self) -> i128 {
        self.digits().len() as i128 + self.exponent as i128
    }

    pub fn as_i64(&self) -> Option<i64> {
        if !self.is_integer() || self.exponent > 20 {
            return None;
        }
        (&self.mantissa * pow10(self.exponent as u64)).to_i64()
    }

    pub fn as_u64(&self) -> Option<u64> {
        if !self.is_integer() || self.exponent > 20 {
            return None;
        }
        (&self.mantissa * pow10(self.exponent as u64)).to_u64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        f64::from_str(&self.to_string()).ok().filter(|f| f.is_finite())
    }
}

impl FromStr for Number {
    type Err = anyhow::Error;

    /// Parses the JSON number grammar.
    fn from_str(s: &str) -> Result<Number> {
        let bytes = s.as_bytes();
        let mut pos = 0;
        let negative = bytes.first() == Some(&b'-');
        if negative {
            pos += 1;
        }

        let int_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let int_part = &s[int_start..pos];
        if int_part.is_empty() {
            bail!("invalid number `{s}`");
        }
        if int_part.len() > 1 && int_part.starts_with('0') {
            bail!("invalid number `{s}`: leading zeros");
        }

        let mut frac_part = "";
        if pos < bytes.len() && bytes[pos] == b'.' {
            pos += 1;
            let frac_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            frac_part = &s[frac_start..pos];
            if frac_part.is_empty() {
                bail!("invalid number `{s}`: expecting digits after `.`");
            }
        }

        let mut exponent = 0i64;
        if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
            pos += 1;
            let exp_start = pos;
            if pos < bytes.len() && matches!(bytes[pos], b'+' | b'-') {
                pos += 1;
            }
            let digits_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if digits_start == pos {
                bail!("invalid number `{s}`: expecting exponent digits");
            }
            exponent = s[exp_start..pos]
                .parse::<i64>()
                .map_err(|_| anyhow!("number `{s}` out of range"))?;
        }

        if pos != bytes.len() {
            bail!("invalid number `{s}`: trailing characters");
        }

        let digits = format!("{int_part}{frac_part}");
        let magnitude = BigInt::from_str(&digits).map_err(|e| anyhow!("invalid number `{s}`: {e}"))?;
        let mantissa = if negative { -magnitude } else { magnitude };
        let exponent = exponent
            .checked_sub(frac_part.len() as i64)
            .ok_or_else(|| anyhow!("number `{s}` out of range"))?;
        Number::normalized(mantissa, exponent).ok_or_else(|| anyhow!("number `{s}` out of range"))
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::integer(BigInt::from(value))
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        Number::integer(BigInt::from(value))
    }
}

impl From<usize> for Number {
    fn from(value: usize) -> Self {
        Number::integer(BigInt::from(value))
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::from(value as i64)
    }
}

impl TryFrom<f64> for Number {
    type Error = anyhow::Error;

    fn try_from(value: f64) -> Result<Self> {
        if !value.is_finite() {
            bail!("{value} cannot be represented as a number");
        }
        // Shortest representation that round-trips.
        let text = format!("{value:?}");
        Number::from_str(&text)
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Number) -> Ordering {
        let (a_sign, b_sign) = (self.mantissa.sign(), other.mantissa.sign());
        if a_sign != b_sign {
            let rank = |s: Sign| match s {
                Sign::Minus => 0,
                Sign::NoSign => 1,
                Sign::Plus => 2,
            };
            return rank(a_sign).cmp(&rank(b_sign));
        }
        if a_sign == Sign::NoSign {
            return Ordering::Equal;
        }

        // Same sign. Compare orders of magnitude first so that very large
        // exponents never need to be materialized.
        let by_magnitude = self.magnitude().cmp(&other.magnitude());
        if by_magnitude != Ordering::Equal {
            return match a_sign {
                Sign::Minus => by_magnitude.reverse(),
                _ => by_magnitude,
            };
        }

        // Equal magnitudes keep the exponents within a few digits of each other.
        let e = self.exponent.min(other.exponent) as i128;
        let a = &self.mantissa * pow10((self.exponent as i128 - e) as u64);
        let b = &other.mantissa * pow10((other.exponent as i128 - e) as u64);
        a.cmp(&b)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Number) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Number) -> bool {
        self.mantissa == other.mantissa && self.exponent == other.exponent
    }
}

impl Eq for Number {}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mantissa.hash(state);
        self.exponent.hash(state);
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let sign = if self.is_negative() { "-" } else { "" };
        let digits = self.digits();
        let len = digits.len() as i128;
        let exponent = self.exponent as i128;

        if exponent >= 0 && len + exponent <= MAX_PLAIN_DIGITS {
            let zeros = "0".repeat(self.exponent as usize);
            return write!(f, "{sign}{digits}{zeros}");
        }

        // Position of the decimal point within `digits`.
        let point = len + exponent;
        if self.exponent < 0 && point > 0 {
            let (int, frac) = digits.split_at(point as usize);
            return write!(f, "{sign}{int}.{frac}");
        }
        if self.exponent < 0 && point > -6 {
            let zeros = "0".repeat((-point) as usize);
            return write!(f, "{sign}0.{zeros}{digits}");
        }

        let sci = point - 1;
        let (first, rest) = digits.split_at(1);
        let exp_sign = if sci < 0 { "-" } else { "+" };
        if rest.is_empty() {
            write!(f, "{sign}{first}e{exp_sign}{}", sci.abs())
        } else {
            write!(f, "{sign}{first}.{rest}e{exp_sign}{}", sci.abs())
        }
    }
}

impl fmt::Debug for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v = serde_json::Number::from_str(&self.to_string())
            .map_err(|_| serde::ser::Error::custom("could not serialize number"))?;
        v.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = serde_json::Number::deserialize(deserializer)?;
        Number::from_str(&n.to_string()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Number {
        Number::from_str(s).unwrap()
    }

    #[test]
    fn normalizes_equivalent_spellings() {
        assert_eq!(num("1"), num("1.0"));
        assert_eq!(num("1"), num("10e-1"));
        assert_eq!(num("-0"), num("0"));
        assert_eq!(num("0.000"), Number::zero());
        assert_eq!(num("1200"), num("1.2e3"));
    }

    #[test]
    fn compares_numerically() {
        assert!(num("2") < num("10"));
        assert!(num("-10") < num("-2"));
        assert!(num("-1") < num("0"));
        assert!(num("0.5") < num("1"));
        assert!(num("1e100") > num("99999999999999999999"));
        assert!(num("-1e100") < num("-99999999999999999999"));
        assert!(num("1.25") > num("1.2"));
        assert_eq!(num("3.0").cmp(&num("3")), Ordering::Equal);
    }

    #[test]
    fn renders_canonical_text() {
        assert_eq!(num("1.50").to_string(), "1.5");
        assert_eq!(num("100").to_string(), "100");
        assert_eq!(num("-0.001").to_string(), "-0.001");
        assert_eq!(num("1e30").to_string(), "1e+30");
        assert_eq!(num("1.5e-10").to_string(), "1.5e-10");
        assert_eq!(
            num("123456789012345678901234567890").to_string(),
            "123456789012345678901234567890"
        );
    }

    #[test]
    fn text_round_trips() {
        for s in ["0", "-7", "3.14159", "1e+30", "2.5e-9", "0.000001", "98765432109876543210"] {
            let n = num(s);
            assert_eq!(num(&n.to_string()), n, "{s}");
        }
    }

    #[test]
    fn rejects_invalid_numbers() {
        for s in ["", "-", "01", "1.", ".5", "1e", "1x", "NaN", "Infinity"] {
            assert!(Number::from_str(s).is_err(), "{s}");
        }
        assert!(Number::try_from(f64::NAN).is_err());
        assert!(Number::try_from(f64::INFINITY).is_err());
    }

    #[test]
    fn extreme_exponents() {
        let big = num("1e9223372036854775807");
        assert_eq!(big.to_string(), "1e+9223372036854775807");
        assert_eq!(num(&big.to_string()), big);
        assert_eq!(big.cmp(&Number::from(1i64)), Ordering::Greater);
        assert_eq!(num("-1e9223372036854775807").cmp(&num("-1")), Ordering::Less);
        assert!(num("1e-9223372036854775808") < num("1e-9223372036854775807"));
        assert_eq!(num("1e-9223372036854775808").to_string(), "1e-9223372036854775808");
        assert_eq!(big.as_i64(), None);

        // Trailing zeros would push the exponent past its range.
        let err = Number::from_str("10e9223372036854775807").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(Number::from_str("1e9223372036854775808").is_err());
    }

    #[test]
    fn converts_from_floats_and_ints() {
        assert_eq!(Number::try_from(0.25).unwrap(), num("0.25"));
        assert_eq!(Number::try_from(-0.0).unwrap(), Number::zero());
        assert_eq!(Number::from(42i64).as_i64(), Some(42));
        assert_eq!(num("4.2e1").as_u64(), Some(42));
        assert_eq!(num("4.5").as_i64(), None);
    }
}
