//! Object identifiers (OIDs)
//!
//! A controller OID addresses one datapoint as `/subnet/node/fct/group/member[/ext]`.
//! The same coordinates appear on the host side as dotted paths
//! (`subnet.node-fct`) and as the `GG-MMM` datapoint name used as a key into
//! the function-type configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConvError, ConvResult};

/// Minimum number of `/`-separated segments (including the empty leading one)
const MIN_SEGMENTS: usize = 6;
/// Maximum number of segments (with the optional extension)
const MAX_SEGMENTS: usize = 7;

/// Parsed controller object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid {
    pub subnet: u32,
    pub node: u32,
    pub fct: u32,
    pub group_nr: u32,
    pub member_nr: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<u32>,
}

impl Oid {
    /// Parse an OID string such as `/60/1/1/0/1/0`
    pub fn parse(s: &str) -> ConvResult<Self> {
        let segments: Vec<&str> = s.trim().split('/').collect();
        if segments.len() < MIN_SEGMENTS || segments.len() > MAX_SEGMENTS {
            return Err(ConvError::MalformedIdentifier(s.to_string()));
        }
        if !segments[0].is_empty() {
            return Err(ConvError::MalformedIdentifier(s.to_string()));
        }

        let number = |segment: &str| -> ConvResult<u32> {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConvError::MalformedIdentifier(s.to_string()));
            }
            segment
                .parse::<u32>()
                .map_err(|_| ConvError::MalformedIdentifier(s.to_string()))
        };

        Ok(Self {
            subnet: number(segments[1])?,
            node: number(segments[2])?,
            fct: number(segments[3])?,
            group_nr: number(segments[4])?,
            member_nr: number(segments[5])?,
            ext: segments.get(6).map(|e| number(e)).transpose()?,
        })
    }

    /// Build the OID of a known datapoint of a function (`ext` is always 0)
    pub fn for_function(subnet: u32, node: u32, fct: u32, group_nr: u32, member_nr: u32) -> Self {
        Self {
            subnet,
            node,
            fct,
            group_nr,
            member_nr,
            ext: Some(0),
        }
    }

    /// Rebuild an OID from a host function path (`60.1-1`) and a datapoint
    /// suffix (`/0/1/0`) produced by [`Oid::suffix`].
    pub fn rehydrate(function_path: &str, suffix: &str) -> ConvResult<Self> {
        let prefix: String = function_path
            .chars()
            .map(|c| if c == '.' || c == '-' { '/' } else { c })
            .collect();
        Self::parse(&format!("/{}{}", prefix, suffix))
    }

    /// Device id as used in the node listing: `subnet.node`
    pub fn device_id(&self) -> String {
        format!("{}.{}", self.subnet, self.node)
    }

    /// Function key inside one subnet: `node-fct`
    pub fn function_id(&self) -> String {
        format!("{}-{}", self.node, self.fct)
    }

    /// Host-side function path: `subnet.node-fct`
    pub fn function_path(&self) -> String {
        format!("{}.{}-{}", self.subnet, self.node, self.fct)
    }

    /// Datapoint name in `GG-MMM` form
    pub fn name(&self) -> String {
        format!("{:02}-{:03}", self.group_nr, self.member_nr)
    }

    /// Datapoint part of the OID with the subnet/node/function prefix removed
    pub fn suffix(&self) -> String {
        match self.ext {
            Some(ext) => format!("/{}/{}/{}", self.group_nr, self.member_nr, ext),
            None => format!("/{}/{}", self.group_nr, self.member_nr),
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}{}", self.subnet, self.node, self.fct, self.suffix())
    }
}

impl FromStr for Oid {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Format a group/member pair as a `GG-MMM` datapoint name
///
/// Group is padded to 2 digits, member to 3. Fails for negative inputs.
pub fn format_name(group_nr: i64, member_nr: i64) -> ConvResult<String> {
    if group_nr < 0 || member_nr < 0 {
        return Err(ConvError::InvalidNumber(format!(
            "group {} / member {}",
            group_nr, member_nr
        )));
    }
    Ok(format!("{:02}-{:03}", group_nr, member_nr))
}

/// Parse a `GG-MMM` datapoint name back into its group/member pair
pub fn parse_name(name: &str) -> ConvResult<(u32, u32)> {
    let (group, member) = name
        .split_once('-')
        .ok_or_else(|| ConvError::InvalidNumber(name.to_string()))?;
    let group = group
        .parse::<u32>()
        .map_err(|_| ConvError::InvalidNumber(name.to_string()))?;
    let member = member
        .parse::<u32>()
        .map_err(|_| ConvError::InvalidNumber(name.to_string()))?;
    Ok((group, member))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oid() {
        let oid = Oid::parse("/60/1/1/0/1/0").unwrap();
        assert_eq!(oid.subnet, 60);
        assert_eq!(oid.node, 1);
        assert_eq!(oid.fct, 1);
        assert_eq!(oid.group_nr, 0);
        assert_eq!(oid.member_nr, 1);
        assert_eq!(oid.ext, Some(0));
        assert_eq!(oid.device_id(), "60.1");
        assert_eq!(oid.function_id(), "1-1");
        assert_eq!(oid.function_path(), "60.1-1");
        assert_eq!(oid.name(), "00-001");
    }

    #[test]
    fn test_parse_without_extension() {
        let oid = Oid::parse("/60/15/2/5/12").unwrap();
        assert_eq!(oid.ext, None);
        assert_eq!(oid.name(), "05-012");
        assert_eq!(oid.to_string(), "/60/15/2/5/12");
    }

    #[test]
    fn test_parse_malformed() {
        for bad in [
            "",
            "/60/1/1/0",
            "60/1/1/0/1/0",
            "/60/1/x/0/1",
            "/60/1/1/0/1/0/9",
            "/60/1/1/-1/1",
            "/60//1/0/1",
        ] {
            assert!(
                matches!(Oid::parse(bad), Err(ConvError::MalformedIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_numeric_round_trip() {
        for raw in ["/60/1/1/0/1/0", "/1/2/3/99/250/7", "/60/01/02/003/0004"] {
            let oid = Oid::parse(raw).unwrap();
            let digits: Vec<u32> = raw
                .trim_start_matches('/')
                .split('/')
                .map(|s| s.parse().unwrap())
                .collect();
            let (group, member) = parse_name(&oid.name()).unwrap();
            assert_eq!(group, digits[3]);
            assert_eq!(member, digits[4]);
            assert_eq!(Oid::parse(&oid.to_string()).unwrap(), oid);
        }
    }

    #[test]
    fn test_format_name() {
        assert_eq!(format_name(5, 12).unwrap(), "05-012");
        assert_eq!(format_name(12, 5).unwrap(), "12-005");
        assert_eq!(format_name(0, 0).unwrap(), "00-000");
        assert_eq!(format_name(123, 4567).unwrap(), "123-4567");
        assert!(matches!(format_name(-1, 5), Err(ConvError::InvalidNumber(_))));
        assert!(matches!(format_name(1, -5), Err(ConvError::InvalidNumber(_))));
    }

    #[test]
    fn test_suffix_and_rehydrate() {
        let oid = Oid::parse("/60/1/1/2/44/0").unwrap();
        assert_eq!(oid.suffix(), "/2/44/0");

        let other = Oid::rehydrate("60.3-2", &oid.suffix()).unwrap();
        assert_eq!(other.to_string(), "/60/3/2/2/44/0");
        assert_eq!(other.name(), oid.name());
    }
}
