// ── Bus address ──
//
// 7-bit device address. The persisted document written by older
// front-ends stores addresses as Python-style hex strings ("0x3"),
// so parsing accepts every common spelling while display is canonical.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// A 7-bit bus address, displayed as `0x` followed by two hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusAddress(u8);

impl BusAddress {
    /// Highest address representable on a 7-bit bus.
    pub const MAX: u8 = 0x7f;
    /// First address probed by a default scan (0x00-0x02 are reserved).
    pub const SCAN_FIRST: u8 = 0x03;
    /// Last address probed by a default scan (0x78-0x7f are reserved).
    pub const SCAN_LAST: u8 = 0x77;

    pub fn new(raw: u8) -> Result<Self, CoreError> {
        if raw > Self::MAX {
            return Err(CoreError::InvalidAddress {
                input: format!("{raw:#04x}"),
            });
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl FromStr for BusAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => trimmed.parse::<u8>(),
        };
        let raw = parsed.map_err(|_| CoreError::InvalidAddress { input: s.into() })?;
        Self::new(raw).map_err(|_| CoreError::InvalidAddress { input: s.into() })
    }
}

impl TryFrom<u8> for BusAddress {
    type Error = CoreError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl Serialize for BusAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BusAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AddressVisitor)
    }
}

struct AddressVisitor;

impl Visitor<'_> for AddressVisitor {
    type Value = BusAddress;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 7-bit bus address as an integer or a hex string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        u8::try_from(v)
            .map_err(|_| E::custom(format!("bus address {v} out of range")))
            .and_then(|raw| BusAddress::new(raw).map_err(E::custom))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map_err(|_| E::custom(format!("bus address {v} out of range")))
            .and_then(|raw| self.visit_u64(raw))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_style_hex() {
        assert_eq!("0x3".parse::<BusAddress>().unwrap().get(), 3);
        assert_eq!("0x48".parse::<BusAddress>().unwrap().get(), 0x48);
        assert_eq!("0X1a".parse::<BusAddress>().unwrap().get(), 0x1a);
        assert_eq!("32".parse::<BusAddress>().unwrap().get(), 32);
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert!("0x80".parse::<BusAddress>().is_err());
        assert!("0xzz".parse::<BusAddress>().is_err());
        assert!("".parse::<BusAddress>().is_err());
        assert!(BusAddress::new(0xff).is_err());
    }

    #[test]
    fn displays_canonical_two_digit_hex() {
        assert_eq!(BusAddress::new(3).unwrap().to_string(), "0x03");
        assert_eq!(BusAddress::new(0x77).unwrap().to_string(), "0x77");
    }

    #[test]
    fn serde_accepts_strings_and_integers() {
        let a: BusAddress = serde_json::from_str("\"0x10\"").unwrap();
        let b: BusAddress = serde_json::from_str("16").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"0x10\"");
        assert!(serde_json::from_str::<BusAddress>("-1").is_err());
        assert!(serde_json::from_str::<BusAddress>("300").is_err());
    }
}
