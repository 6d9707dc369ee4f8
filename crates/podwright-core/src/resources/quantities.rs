use crate::error::{PodwrightError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Internal precision: one unit is 10^9 nano-units
const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Largest number of significant digits accepted in a quantity string
const MAX_DIGITS: usize = 30;

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Decimal exponents tried from largest to smallest when formatting
const DECIMAL_EXPONENTS: [i32; 10] = [18, 15, 12, 9, 6, 3, 0, -3, -6, -9];

/// Suffix family a quantity was written in; formatting keeps the family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityFormat {
    /// Ki, Mi, Gi, Ti, Pi, Ei
    BinarySI,
    /// n, u, m, (none), k, M, G, T, P, E
    DecimalSI,
    /// 1e3, 5E-3
    DecimalExponent,
}

/// A canonical resource quantity (CPU, memory, storage)
///
/// Two quantities are equal when they denote the same amount, whatever their
/// spelling: `"0.5"` equals `"500m"` and `"1Gi"` equals `"1024Mi"`.
#[derive(Debug, Clone, Copy)]
pub struct Quantity {
    nanos: i128,
    format: QuantityFormat,
}

enum Scale {
    Binary(u32),
    Decimal(i32),
}

impl Quantity {
    /// Parse a Kubernetes quantity string
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(PodwrightError::invalid_quantity(input, "empty quantity"));
        }

        let bytes = s.as_bytes();
        let mut idx = 0;
        let negative = match bytes[0] {
            b'-' => {
                idx = 1;
                true
            }
            b'+' => {
                idx = 1;
                false
            }
            _ => false,
        };

        let int_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        let int_part = &s[int_start..idx];

        let mut frac_part = "";
        if idx < bytes.len() && bytes[idx] == b'.' {
            idx += 1;
            let frac_start = idx;
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            frac_part = &s[frac_start..idx];
        }

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(PodwrightError::invalid_quantity(input, "missing numeric value"));
        }

        let (format, scale) = parse_suffix(&s[idx..])
            .ok_or_else(|| PodwrightError::invalid_quantity(input, "unknown suffix"))?;

        let digits = format!("{}{}", int_part, frac_part);
        let digits = digits.trim_start_matches('0');
        if digits.len() > MAX_DIGITS {
            return Err(PodwrightError::invalid_quantity(input, "too many digits"));
        }
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|e| PodwrightError::invalid_quantity(input, format!("{}", e)))?
        };

        let out_of_range = || PodwrightError::invalid_quantity(input, "value out of range");
        let frac_len = frac_part.len() as i32;

        let (numerator, denominator) = match scale {
            Scale::Binary(power) => {
                let multiplier = 1024_i128.pow(power);
                let numerator = mantissa
                    .checked_mul(multiplier)
                    .and_then(|v| v.checked_mul(NANOS_PER_UNIT))
                    .ok_or_else(out_of_range)?;
                (numerator, pow10(frac_len).ok_or_else(out_of_range)?)
            }
            Scale::Decimal(exp) => {
                let total = exp + 9 - frac_len;
                if total >= 0 {
                    let numerator = pow10(total)
                        .and_then(|m| mantissa.checked_mul(m))
                        .ok_or_else(out_of_range)?;
                    (numerator, 1)
                } else {
                    (mantissa, pow10(-total).ok_or_else(out_of_range)?)
                }
            }
        };

        // Sub-nano precision rounds up, as the API server does
        let mut nanos = numerator / denominator;
        if numerator % denominator != 0 {
            nanos += 1;
        }
        if negative {
            nanos = -nanos;
        }

        Ok(Self { nanos, format })
    }

    /// Build a decimal quantity from millicores / milli-units
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: millis as i128 * 1_000_000,
            format: QuantityFormat::DecimalSI,
        }
    }

    /// Build a binary quantity from a byte count
    pub fn from_bytes(bytes: i64) -> Self {
        Self {
            nanos: bytes as i128 * NANOS_PER_UNIT,
            format: QuantityFormat::BinarySI,
        }
    }

    /// Amount in milli-units, rounded up
    pub fn as_millis(&self) -> i128 {
        let millis = self.nanos / 1_000_000;
        if self.nanos % 1_000_000 > 0 {
            millis + 1
        } else {
            millis
        }
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Canonical spelling: the largest suffix of the declared family that
    /// leaves an integer mantissa
    pub fn canonical(&self) -> String {
        if self.nanos == 0 {
            return "0".to_string();
        }

        if self.format == QuantityFormat::BinarySI && self.nanos % NANOS_PER_UNIT == 0 {
            let units = self.nanos / NANOS_PER_UNIT;
            if units.abs() >= 1024 {
                for power in (1..BINARY_SUFFIXES.len() as u32).rev() {
                    let multiplier = 1024_i128.pow(power);
                    if units % multiplier == 0 {
                        return format!("{}{}", units / multiplier, BINARY_SUFFIXES[power as usize]);
                    }
                }
                return units.to_string();
            }
        }

        for exp in DECIMAL_EXPONENTS {
            let divisor = 10_i128.pow((exp + 9) as u32);
            if self.nanos % divisor == 0 {
                let mantissa = self.nanos / divisor;
                return match self.format {
                    QuantityFormat::DecimalExponent if exp != 0 => format!("{}e{}", mantissa, exp),
                    QuantityFormat::DecimalExponent => mantissa.to_string(),
                    _ => format!("{}{}", mantissa, decimal_suffix(exp)),
                };
            }
        }

        format!("{}n", self.nanos)
    }

    /// Convert to the k8s-openapi wire type
    pub fn to_k8s(&self) -> k8s_openapi::apimachinery::pkg::api::resource::Quantity {
        k8s_openapi::apimachinery::pkg::api::resource::Quantity(self.canonical())
    }

    /// Parse the k8s-openapi wire type
    pub fn from_k8s(quantity: &k8s_openapi::apimachinery::pkg::api::resource::Quantity) -> Result<Self> {
        Self::parse(&quantity.0)
    }
}

fn pow10(exp: i32) -> Option<i128> {
    if exp < 0 {
        return None;
    }
    10_i128.checked_pow(exp as u32)
}

fn parse_suffix(suffix: &str) -> Option<(QuantityFormat, Scale)> {
    let decimal = |exp| Some((QuantityFormat::DecimalSI, Scale::Decimal(exp)));
    match suffix {
        "" => decimal(0),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            if let Some(power) = BINARY_SUFFIXES.iter().skip(1).position(|s| *s == suffix) {
                return Some((QuantityFormat::BinarySI, Scale::Binary(power as u32 + 1)));
            }
            let exp = suffix.strip_prefix(['e', 'E'])?.parse::<i32>().ok()?;
            if exp.abs() > 30 {
                return None;
            }
            Some((QuantityFormat::DecimalExponent, Scale::Decimal(exp)))
        }
    }
}

fn decimal_suffix(exp: i32) -> &'static str {
    match exp {
        -9 => "n",
        -6 => "u",
        -3 => "m",
        3 => "k",
        6 => "M",
        9 => "G",
        12 => "T",
        15 => "P",
        18 => "E",
        _ => "",
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Quantity {
    type Err = PodwrightError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a quantity string such as \"500m\" or \"1Gi\", or a number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
        Quantity::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
        Quantity::parse(&v.to_string()).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
        Quantity::parse(&v.to_string()).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Quantity, E> {
        Quantity::parse(&v.to_string()).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    #[test]
    fn test_canonical_cpu() {
        assert_eq!(q("250m").canonical(), "250m");
        assert_eq!(q("0.5").canonical(), "500m");
        assert_eq!(q("1000m").canonical(), "1");
        assert_eq!(q("2").canonical(), "2");
        assert_eq!(q("1.5").canonical(), "1500m");
        assert_eq!(q("0").canonical(), "0");
        assert_eq!(q("100u").canonical(), "100u");
    }

    #[test]
    fn test_canonical_memory() {
        assert_eq!(q("512Mi").canonical(), "512Mi");
        assert_eq!(q("1024Mi").canonical(), "1Gi");
        assert_eq!(q("1.5Gi").canonical(), "1536Mi");
        assert_eq!(q("0.5Ki").canonical(), "512");
        assert_eq!(q("1025").canonical(), "1025");
        assert_eq!(q("128974848").canonical(), "128974848");
        assert_eq!(q("1k").canonical(), "1k");
        assert_eq!(q("1000k").canonical(), "1M");
    }

    #[test]
    fn test_canonical_exponent() {
        assert_eq!(q("1e3").canonical(), "1e3");
        assert_eq!(q("1000e0").canonical(), "1e3");
        assert_eq!(q("5E-3").canonical(), "5e-3");
        assert_eq!(q("1e0").canonical(), "1");
    }

    #[test]
    fn test_numeric_equality_across_spellings() {
        assert_eq!(q("0.5"), q("500m"));
        assert_eq!(q("1Gi"), q("1024Mi"));
        assert_eq!(q("1k"), q("1e3"));
        assert_eq!(q("1000m"), q("1"));
        assert_ne!(q("1G"), q("1Gi"));
        assert!(q("250m") < q("500m"));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "abc", "12Qi", "1.2.3", "m", "1e99", "Mi"] {
            assert!(Quantity::parse(bad).is_err(), "expected '{}' to fail", bad);
        }
    }

    #[test]
    fn test_negative_quantity() {
        assert_eq!(q("-1").canonical(), "-1");
        assert_eq!(q("-500m").canonical(), "-500m");
    }

    #[test]
    fn test_as_millis() {
        assert_eq!(q("250m").as_millis(), 250);
        assert_eq!(q("2").as_millis(), 2000);
        assert_eq!(q("1n").as_millis(), 1);
        assert_eq!(Quantity::from_millis(750).canonical(), "750m");
        assert_eq!(Quantity::from_bytes(64 * 1024 * 1024).canonical(), "64Mi");
    }

    #[test]
    fn test_serde_accepts_strings_and_numbers() {
        let parsed: Quantity = serde_json::from_str("\"0.25\"").unwrap();
        assert_eq!(parsed.canonical(), "250m");

        let parsed: Quantity = serde_json::from_str("2").unwrap();
        assert_eq!(parsed.canonical(), "2");

        let parsed: Quantity = serde_yaml::from_str("0.5").unwrap();
        assert_eq!(parsed.canonical(), "500m");

        assert_eq!(serde_json::to_string(&q("1024Mi")).unwrap(), "\"1Gi\"");
    }

    #[test]
    fn test_k8s_conversion() {
        let wire = q("0.5Gi").to_k8s();
        assert_eq!(wire.0, "512Mi");
        assert_eq!(Quantity::from_k8s(&wire).unwrap(), q("536870912"));
    }
}
