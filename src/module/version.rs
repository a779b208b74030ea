//! Version and version range value types
//!
//! Versions are `major.minor.micro.qualifier`; numeric fields compare as integers
//! and the qualifier compares lexicographically last. Ranges use interval notation
//! (`[1.0,2.0)`), and a bare version means "at least this version".

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::module::filter::Filter;

/// Version parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("empty version component in {0:?}")]
    EmptyComponent(String),

    #[error("invalid numeric component {component:?} in {input:?}")]
    InvalidNumber { input: String, component: String },

    #[error("invalid qualifier {qualifier:?} in {input:?}")]
    InvalidQualifier { input: String, qualifier: String },

    #[error("too many components in {0:?}")]
    TooManyComponents(String),

    #[error("malformed version range {0:?}")]
    MalformedRange(String),
}

/// Module version
///
/// Field order matters: the derived ordering compares major, minor, micro and
/// then the qualifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

impl Version {
    /// The empty version, `0.0.0`
    pub const fn empty() -> Self {
        Self {
            major: 0,
            minor: 0,
            micro: 0,
            qualifier: String::new(),
        }
    }

    /// Create a version without a qualifier
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Create a version with a qualifier
    pub fn with_qualifier(major: u32, minor: u32, micro: u32, qualifier: &str) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: qualifier.to_string(),
        }
    }

    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }

        let mut parts = trimmed.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (idx, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    if part.is_empty() {
                        return Err(VersionParseError::EmptyComponent(input.to_string()));
                    }
                    *slot = part.parse::<u32>().map_err(|_| VersionParseError::InvalidNumber {
                        input: input.to_string(),
                        component: part.to_string(),
                    })?;
                }
                None if idx == 0 => {
                    return Err(VersionParseError::EmptyComponent(input.to_string()));
                }
                None => break,
            }
        }

        let qualifier = match parts.next() {
            Some(q) => {
                let valid = !q.is_empty()
                    && q
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                if !valid {
                    return Err(VersionParseError::InvalidQualifier {
                        input: input.to_string(),
                        qualifier: q.to_string(),
                    });
                }
                q.to_string()
            }
            None => String::new(),
        };

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// Version range with inclusive/exclusive bounds
///
/// A missing ceiling means the range is unbounded above.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    pub floor: Version,
    pub floor_inclusive: bool,
    pub ceiling: Option<Version>,
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// `[floor, ∞)`
    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// `[floor, ceiling)`
    pub fn half_open(floor: Version, ceiling: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: Some(ceiling),
            ceiling_inclusive: false,
        }
    }

    /// Parse interval notation or a bare version
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let s = input.trim();
        let first = s.chars().next();
        if !matches!(first, Some('[') | Some('(')) {
            return Ok(Self::at_least(Version::parse(s)?));
        }

        let last = s.chars().last();
        if !matches!(last, Some(']') | Some(')')) || s.len() < 2 {
            return Err(VersionParseError::MalformedRange(input.to_string()));
        }

        let inner = &s[1..s.len() - 1];
        let (floor, ceiling) = inner
            .split_once(',')
            .ok_or_else(|| VersionParseError::MalformedRange(input.to_string()))?;
        if ceiling.contains(',') {
            return Err(VersionParseError::MalformedRange(input.to_string()));
        }

        Ok(Self {
            floor: Version::parse(floor)?,
            floor_inclusive: first == Some('['),
            ceiling: Some(Version::parse(ceiling)?),
            ceiling_inclusive: last == Some(']'),
        })
    }

    /// Check whether `v` lies inside the range
    pub fn contains(&self, v: &Version) -> bool {
        let above_floor = match v.cmp(&self.floor) {
            Ordering::Greater => true,
            Ordering::Equal => self.floor_inclusive,
            Ordering::Less => false,
        };
        if !above_floor {
            return false;
        }
        match &self.ceiling {
            None => true,
            Some(ceiling) => match v.cmp(ceiling) {
                Ordering::Less => true,
                Ordering::Equal => self.ceiling_inclusive,
                Ordering::Greater => false,
            },
        }
    }

    /// True if no version can satisfy the range
    pub fn is_empty(&self) -> bool {
        match &self.ceiling {
            None => false,
            Some(ceiling) => match self.floor.cmp(ceiling) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.floor_inclusive && self.ceiling_inclusive),
                Ordering::Less => false,
            },
        }
    }

    /// Build an equivalent filter over `attribute`
    pub fn to_filter(&self, attribute: &str) -> Filter {
        let floor = Filter::version_cmp(attribute, ">=", &self.floor);
        let floor = if self.floor_inclusive {
            floor
        } else {
            Filter::and(vec![
                floor,
                Filter::not(Filter::version_cmp(attribute, "<=", &self.floor)),
            ])
        };

        match &self.ceiling {
            None => floor,
            Some(ceiling) => {
                let upper = if self.ceiling_inclusive {
                    Filter::version_cmp(attribute, "<=", ceiling)
                } else {
                    Filter::not(Filter::version_cmp(attribute, ">=", ceiling))
                };
                Filter::and(vec![floor, upper])
            }
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::at_least(Version::empty())
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some(ceiling) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(r: VersionRange) -> Self {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing_fills_missing_components() {
        assert_eq!(Version::parse("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(
            Version::parse("1.2.3.beta-1").unwrap(),
            Version::with_qualifier(1, 2, 3, "beta-1")
        );
        assert_eq!(Version::parse("").unwrap(), Version::empty());
    }

    #[test]
    fn test_version_parsing_rejects_garbage() {
        assert!(Version::parse("a.b").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.2.3.bad qualifier").is_err());
    }

    #[test]
    fn test_version_ordering_numeric_then_qualifier() {
        let v = |s: &str| Version::parse(s).unwrap();
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.0.0.b") > v("1.0.0.a"));
        assert!(v("1.0.0.a") > v("1.0.0"));
    }

    #[test]
    fn test_range_contains_respects_bounds() {
        let r = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(r.contains(&Version::new(1, 0, 0)));
        assert!(r.contains(&Version::new(1, 5, 0)));
        assert!(!r.contains(&Version::new(2, 0, 0)));
        assert!(!r.contains(&Version::new(0, 9, 0)));

        let open = VersionRange::parse("(1.0,2.0]").unwrap();
        assert!(!open.contains(&Version::new(1, 0, 0)));
        assert!(open.contains(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_bare_version_range_is_unbounded() {
        let r = VersionRange::parse("1.5").unwrap();
        assert!(r.contains(&Version::new(99, 0, 0)));
        assert!(!r.contains(&Version::new(1, 4, 9)));
        assert_eq!(r.to_string(), "1.5.0");
    }

    #[test]
    fn test_empty_ranges() {
        assert!(VersionRange::parse("[2.0,1.0]").unwrap().is_empty());
        assert!(VersionRange::parse("[1.0,1.0)").unwrap().is_empty());
        assert!(!VersionRange::parse("[1.0,1.0]").unwrap().is_empty());
        assert!(VersionRange::parse("[1.0;2.0)").is_err());
    }

    #[test]
    fn test_range_filter_agrees_with_contains() {
        use crate::module::capability::{AttributeValue, Attributes};

        let r = VersionRange::parse("(1.0,2.0]").unwrap();
        let filter = r.to_filter("version");
        for s in ["1.0", "1.0.1", "1.9", "2.0", "2.0.1"] {
            let v = Version::parse(s).unwrap();
            let mut attrs = Attributes::new();
            attrs.insert("version".to_string(), AttributeValue::Version(v.clone()));
            assert_eq!(filter.matches(&attrs), r.contains(&v), "version {}", s);
        }
    }
}
