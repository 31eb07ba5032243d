//! Log sequence numbers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A position in the write-ahead log.
///
/// Displayed and parsed in PostgreSQL's `X/Y` form, where `X` and `Y` are
/// the upper and lower 32 bits in hexadecimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidMessage {
            message: format!("Invalid LSN: {}", s),
        };

        let (high, low) = s.split_once('/').ok_or_else(invalid)?;
        let high = u64::from_str_radix(high, 16).map_err(|_| invalid())?;
        let low = u64::from_str_radix(low, 16).map_err(|_| invalid())?;
        if high > u32::MAX as u64 || low > u32::MAX as u64 {
            return Err(invalid());
        }

        Ok(Lsn((high << 32) | low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsn() {
        assert_eq!("0/16B3748".parse::<Lsn>().unwrap(), Lsn(0x16B3748));
        assert_eq!(
            "1/16B3748".parse::<Lsn>().unwrap(),
            Lsn(0x1_0000_0000 + 0x16B3748)
        );
        assert!("invalid".parse::<Lsn>().is_err());
        assert!("0/XYZ".parse::<Lsn>().is_err());
        assert!("100000000/0".parse::<Lsn>().is_err());
    }

    #[test]
    fn test_format_lsn() {
        assert_eq!(Lsn(0x16B3748).to_string(), "0/16B3748");
        assert_eq!(Lsn(0x1_0000_0000 + 0x16B3748).to_string(), "1/16B3748");
        assert_eq!(Lsn::ZERO.to_string(), "0/0");
    }

    #[test]
    fn test_ordering() {
        let earlier: Lsn = "0/FFFFFFFF".parse().unwrap();
        let later: Lsn = "1/0".parse().unwrap();
        assert!(earlier < later);
    }
}
