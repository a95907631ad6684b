//! Bar size and history duration strings.
//!
//! The platform expresses bar sizes as `"<n> <unit>"` (`"5 secs"`, `"1 min"`,
//! `"5 mins"`, `"1 hour"`, `"1 day"`) and history spans as `"<n> <S|D|W|M|Y>"`
//! (`"1 D"`, `"3600 S"`). Parsing is lenient about unit spelling; `Display`
//! always produces the canonical platform form so equal sizes compare and
//! hash equal regardless of how the client spelled them.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Unit of a [`BarSize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarUnit {
    Secs,
    Mins,
    Hours,
    Days,
    Weeks,
    Months,
}

impl BarUnit {
    fn seconds(self) -> u64 {
        match self {
            BarUnit::Secs => 1,
            BarUnit::Mins => 60,
            BarUnit::Hours => 3_600,
            BarUnit::Days => 86_400,
            BarUnit::Weeks => 7 * 86_400,
            BarUnit::Months => 30 * 86_400,
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        let unit = unit.trim().to_ascii_lowercase();
        let unit = match unit.as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => BarUnit::Secs,
            "m" | "min" | "mins" | "minute" | "minutes" => BarUnit::Mins,
            "h" | "hour" | "hours" => BarUnit::Hours,
            "d" | "day" | "days" => BarUnit::Days,
            "w" | "week" | "weeks" => BarUnit::Weeks,
            "mo" | "month" | "months" => BarUnit::Months,
            _ => return None,
        };
        Some(unit)
    }
}

/// A bar aggregation interval such as `5 mins`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarSize {
    pub value: u32,
    pub unit: BarUnit,
}

impl BarSize {
    pub const fn new(value: u32, unit: BarUnit) -> Self {
        Self { value, unit }
    }

    /// Length of one bar in seconds.
    pub fn seconds(&self) -> u64 {
        u64::from(self.value) * self.unit.seconds()
    }
}

impl fmt::Display for BarSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.value;
        let plural = n != 1;
        match self.unit {
            // Seconds are always plural on the platform ("1 secs").
            BarUnit::Secs => write!(f, "{} secs", n),
            BarUnit::Mins => write!(f, "{} {}", n, if plural { "mins" } else { "min" }),
            BarUnit::Hours => write!(f, "{} {}", n, if plural { "hours" } else { "hour" }),
            BarUnit::Days => write!(f, "{} {}", n, if plural { "days" } else { "day" }),
            BarUnit::Weeks => write!(f, "{} {}", n, if plural { "weeks" } else { "week" }),
            BarUnit::Months => write!(f, "{} {}", n, if plural { "months" } else { "month" }),
        }
    }
}

impl FromStr for BarSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (value, unit) = split_count(s).ok_or_else(|| Error::InvalidBarSize(s.to_string()))?;
        let unit = BarUnit::parse(unit).ok_or_else(|| Error::InvalidBarSize(s.to_string()))?;
        Ok(BarSize::new(value, unit))
    }
}

/// A history span such as `1 D` or `3600 S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryDuration {
    pub value: u32,
    pub unit: char,
}

impl HistoryDuration {
    pub fn seconds(&self) -> u64 {
        let unit = match self.unit {
            'S' => 1,
            'D' => 86_400,
            'W' => 7 * 86_400,
            'M' => 30 * 86_400,
            _ => 365 * 86_400,
        };
        u64::from(self.value) * unit
    }
}

impl fmt::Display for HistoryDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

impl FromStr for HistoryDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (value, unit) =
            split_count(s).ok_or_else(|| Error::InvalidDuration(s.to_string()))?;
        let unit = unit.trim().to_ascii_uppercase();
        match unit.as_str() {
            "S" | "D" | "W" | "M" | "Y" => Ok(HistoryDuration {
                value,
                unit: unit.chars().next().unwrap_or('D'),
            }),
            _ => Err(Error::InvalidDuration(s.to_string())),
        }
    }
}

/// Split `"5 mins"` / `"5mins"` into a positive count and the unit text.
fn split_count(s: &str) -> Option<(u32, &str)> {
    let s = s.trim();
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let value: u32 = s[..digits].parse().ok()?;
    if value == 0 {
        return None;
    }
    Some((value, &s[digits..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_forms() {
        assert_eq!("5 secs".parse::<BarSize>().unwrap(), BarSize::new(5, BarUnit::Secs));
        assert_eq!("1 min".parse::<BarSize>().unwrap(), BarSize::new(1, BarUnit::Mins));
        assert_eq!("5 mins".parse::<BarSize>().unwrap(), BarSize::new(5, BarUnit::Mins));
        assert_eq!("1 hour".parse::<BarSize>().unwrap(), BarSize::new(1, BarUnit::Hours));
        assert_eq!("1 day".parse::<BarSize>().unwrap(), BarSize::new(1, BarUnit::Days));
    }

    #[test]
    fn test_spellings_normalize() {
        for s in ["5 mins", "5 min", "5mins", " 5 Minutes ", "5m"] {
            assert_eq!(s.parse::<BarSize>().unwrap().to_string(), "5 mins", "{s}");
        }
        assert_eq!("1 secs".parse::<BarSize>().unwrap().to_string(), "1 secs");
        assert_eq!("2 hours".parse::<BarSize>().unwrap().seconds(), 7_200);
    }

    #[test]
    fn test_invalid_bar_sizes() {
        assert!("".parse::<BarSize>().is_err());
        assert!("mins".parse::<BarSize>().is_err());
        assert!("0 mins".parse::<BarSize>().is_err());
        assert!("5 fortnights".parse::<BarSize>().is_err());
    }

    #[test]
    fn test_history_duration() {
        let d: HistoryDuration = "1 D".parse().unwrap();
        assert_eq!(d.seconds(), 86_400);
        assert_eq!("3600 S".parse::<HistoryDuration>().unwrap().seconds(), 3_600);
        assert_eq!("2 w".parse::<HistoryDuration>().unwrap().to_string(), "2 W");
        assert!("1 Q".parse::<HistoryDuration>().is_err());
    }
}
