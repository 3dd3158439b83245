//! Interval string parsing
//!
//! Accepts `"30s"`, `"5m"`, `"2h"` (seconds/minutes/hours) or a bare
//! integer meaning milliseconds. Empty and single-character strings are
//! rejected: an interval needs at least one digit and, with a unit
//! suffix, at least one digit before it.

use std::time::Duration;

use crate::error::{Error, Result};

pub fn parse_interval(s: &str) -> Result<Duration> {
    if s.len() <= 1 {
        return Err(Error::Config(format!("invalid interval {:?}", s)));
    }

    let (magnitude, per_unit_secs) = match s.as_bytes()[s.len() - 1] {
        b's' | b'S' => (&s[..s.len() - 1], Some(1)),
        b'm' | b'M' => (&s[..s.len() - 1], Some(60)),
        b'h' | b'H' => (&s[..s.len() - 1], Some(3600)),
        _ => (s, None),
    };

    let n: u64 = magnitude
        .parse()
        .map_err(|_| Error::Config(format!("invalid interval {:?}", s)))?;
    Ok(match per_unit_secs {
        Some(secs) => Duration::from_secs(n * secs),
        None => Duration::from_millis(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_suffixes() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval("10S").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval("1M").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("3H").unwrap(), Duration::from_secs(10800));
    }

    #[test]
    fn bare_integer_is_milliseconds() {
        assert_eq!(parse_interval("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("99").unwrap(), Duration::from_millis(99));
    }

    #[test]
    fn rejects_empty_and_short() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("s").is_err());
        assert!(parse_interval("5").is_err());
    }

    #[test]
    fn rejects_non_numeric_magnitude() {
        assert!(parse_interval("abcs").is_err());
        assert!(parse_interval("1.5s").is_err());
    }
}
