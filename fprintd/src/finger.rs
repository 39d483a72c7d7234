//! Finger identifiers and their wire/storage encodings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the ten recognised fingers, or the `unknown`/`any` placeholder.
///
/// The numeric discriminants double as the single hex digit used in the
/// print store's filenames on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Finger {
    Unknown = 0,
    LeftThumb = 1,
    LeftIndexFinger = 2,
    LeftMiddleFinger = 3,
    LeftRingFinger = 4,
    LeftLittleFinger = 5,
    RightThumb = 6,
    RightIndexFinger = 7,
    RightMiddleFinger = 8,
    RightRingFinger = 9,
    RightLittleFinger = 10,
}

impl Finger {
    /// All ten concrete (non-`Unknown`) fingers, in storage order.
    pub const ALL: [Finger; 10] = [
        Finger::LeftThumb,
        Finger::LeftIndexFinger,
        Finger::LeftMiddleFinger,
        Finger::LeftRingFinger,
        Finger::LeftLittleFinger,
        Finger::RightThumb,
        Finger::RightIndexFinger,
        Finger::RightMiddleFinger,
        Finger::RightRingFinger,
        Finger::RightLittleFinger,
    ];

    pub fn is_unknown(self) -> bool {
        matches!(self, Finger::Unknown)
    }

    /// The single lowercase hex digit used as the print store filename.
    pub fn storage_hex_digit(self) -> char {
        match self as u8 {
            n @ 0..=9 => (b'0' + n) as char,
            n => (b'a' + (n - 10)) as char,
        }
    }

    pub fn from_storage_hex_digit(c: char) -> Option<Finger> {
        let n = c.to_digit(16)?;
        Finger::from_code(n as u8)
    }

    fn from_code(n: u8) -> Option<Finger> {
        Some(match n {
            0 => Finger::Unknown,
            1 => Finger::LeftThumb,
            2 => Finger::LeftIndexFinger,
            3 => Finger::LeftMiddleFinger,
            4 => Finger::LeftRingFinger,
            5 => Finger::LeftLittleFinger,
            6 => Finger::RightThumb,
            7 => Finger::RightIndexFinger,
            8 => Finger::RightMiddleFinger,
            9 => Finger::RightRingFinger,
            10 => Finger::RightLittleFinger,
            _ => return None,
        })
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Finger::Unknown => "unknown",
            Finger::LeftThumb => "left-thumb",
            Finger::LeftIndexFinger => "left-index-finger",
            Finger::LeftMiddleFinger => "left-middle-finger",
            Finger::LeftRingFinger => "left-ring-finger",
            Finger::LeftLittleFinger => "left-little-finger",
            Finger::RightThumb => "right-thumb",
            Finger::RightIndexFinger => "right-index-finger",
            Finger::RightMiddleFinger => "right-middle-finger",
            Finger::RightRingFinger => "right-ring-finger",
            Finger::RightLittleFinger => "right-little-finger",
        };
        f.write_str(s)
    }
}

/// Error returned when a client supplies a finger token we don't recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFingerName(pub String);

impl fmt::Display for InvalidFingerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid finger name: {}", self.0)
    }
}

impl std::error::Error for InvalidFingerName {}

impl FromStr for Finger {
    type Err = InvalidFingerName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "any" | "unknown" | "" => Finger::Unknown,
            "left-thumb" => Finger::LeftThumb,
            "left-index-finger" => Finger::LeftIndexFinger,
            "left-middle-finger" => Finger::LeftMiddleFinger,
            "left-ring-finger" => Finger::LeftRingFinger,
            "left-little-finger" => Finger::LeftLittleFinger,
            "right-thumb" => Finger::RightThumb,
            "right-index-finger" => Finger::RightIndexFinger,
            "right-middle-finger" => Finger::RightMiddleFinger,
            "right-ring-finger" => Finger::RightRingFinger,
            "right-little-finger" => Finger::RightLittleFinger,
            other => return Err(InvalidFingerName(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_storage_hex_digit() {
        for finger in Finger::ALL {
            let digit = finger.storage_hex_digit();
            assert_eq!(Finger::from_storage_hex_digit(digit), Some(finger));
        }
    }

    #[test]
    fn any_is_a_synonym_for_unknown() {
        assert_eq!("any".parse::<Finger>().unwrap(), Finger::Unknown);
        assert_eq!("unknown".parse::<Finger>().unwrap(), Finger::Unknown);
    }

    #[test]
    fn rejects_garbage_finger_names() {
        assert!("left-pinky".parse::<Finger>().is_err());
    }

    #[test]
    fn display_round_trips_with_from_str() {
        for finger in Finger::ALL {
            let s = finger.to_string();
            assert_eq!(s.parse::<Finger>().unwrap(), finger);
        }
    }
}
