//! Requirement filter expressions
//!
//! Filters use the LDAP-style prefix syntax, e.g.
//! `(&(package=org.example)(version>=1.0.0)(!(version>=2.0.0)))`.
//! Attribute names are matched case-sensitively. Comparison semantics depend on
//! the type of the capability attribute being tested; a literal that cannot be
//! converted to that type never matches.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::module::capability::{AttributeValue, Attributes};
use crate::module::version::Version;

/// Filter parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterParseError {
    #[error("unexpected end of filter {0:?}")]
    UnexpectedEnd(String),

    #[error("expected {expected:?} at offset {offset} in {input:?}")]
    Expected {
        input: String,
        offset: usize,
        expected: char,
    },

    #[error("missing attribute name at offset {offset} in {input:?}")]
    MissingAttribute { input: String, offset: usize },

    #[error("invalid operator at offset {offset} in {input:?}")]
    InvalidOperator { input: String, offset: usize },

    #[error("empty filter list at offset {offset} in {input:?}")]
    EmptyList { input: String, offset: usize },

    #[error("trailing characters at offset {offset} in {input:?}")]
    Trailing { input: String, offset: usize },
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attr: String, value: String },
    Approx { attr: String, value: String },
    GreaterEq { attr: String, value: String },
    LessEq { attr: String, value: String },
    Present { attr: String },
    /// Wildcard match; `segments` are the literal pieces between `*`s, so a
    /// leading or trailing empty segment anchors nothing on that side
    Substring { attr: String, segments: Vec<String> },
}

impl Filter {
    /// Parse a filter string
    pub fn parse(input: &str) -> Result<Self, FilterParseError> {
        let mut parser = Parser {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let filter = parser.parse_filter()?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(FilterParseError::Trailing {
                input: input.to_string(),
                offset: parser.pos,
            });
        }
        Ok(filter)
    }

    /// `(attr=value)` with `value` taken literally
    pub fn eq(attr: &str, value: &str) -> Self {
        Filter::Equal {
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    /// Version comparison; `op` is one of `>=`, `<=`, `=`
    pub fn version_cmp(attr: &str, op: &str, version: &Version) -> Self {
        let attr = attr.to_string();
        let value = version.to_string();
        match op {
            ">=" => Filter::GreaterEq { attr, value },
            "<=" => Filter::LessEq { attr, value },
            _ => Filter::Equal { attr, value },
        }
    }

    /// Conjunction; a single operand is returned unwrapped
    pub fn and(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Filter::And(filters)
    }

    /// Disjunction; a single operand is returned unwrapped
    pub fn or(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Filter::Or(filters)
    }

    /// Negation
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Evaluate against a capability's attributes
    pub fn matches(&self, attrs: &Attributes) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(attrs)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(attrs)),
            Filter::Not(f) => !f.matches(attrs),
            Filter::Present { attr } => attrs.contains_key(attr),
            Filter::Equal { attr, value } => {
                test_attr(attrs, attr, &|a: &AttributeValue| {
                    compare(a, value) == Some(Ordering::Equal)
                })
            }
            Filter::Approx { attr, value } => {
                test_attr(attrs, attr, &|a: &AttributeValue| approx(a, value))
            }
            Filter::GreaterEq { attr, value } => test_attr(attrs, attr, &|a: &AttributeValue| {
                matches!(compare(a, value), Some(Ordering::Greater | Ordering::Equal))
            }),
            Filter::LessEq { attr, value } => test_attr(attrs, attr, &|a: &AttributeValue| {
                matches!(compare(a, value), Some(Ordering::Less | Ordering::Equal))
            }),
            Filter::Substring { attr, segments } => {
                test_attr(attrs, attr, &|a: &AttributeValue| match a {
                    AttributeValue::String(s) => wildcard_match(s, segments),
                    _ => false,
                })
            }
        }
    }

    /// Every attribute name referenced anywhere in the expression
    pub fn referenced_attributes(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Filter::And(fs) | Filter::Or(fs) => fs.iter().for_each(|f| f.collect_attributes(out)),
            Filter::Not(f) => f.collect_attributes(out),
            Filter::Equal { attr, .. }
            | Filter::Approx { attr, .. }
            | Filter::GreaterEq { attr, .. }
            | Filter::LessEq { attr, .. }
            | Filter::Present { attr }
            | Filter::Substring { attr, .. } => {
                out.insert(attr.as_str());
            }
        }
    }
}

fn test_attr(attrs: &Attributes, attr: &str, pred: &dyn Fn(&AttributeValue) -> bool) -> bool {
    match attrs.get(attr) {
        Some(AttributeValue::List(items)) => items.iter().any(pred),
        Some(value) => pred(value),
        None => false,
    }
}

/// Compare an attribute against a literal converted to the attribute's type
fn compare(attr: &AttributeValue, literal: &str) -> Option<Ordering> {
    match attr {
        AttributeValue::String(s) => Some(s.as_str().cmp(literal)),
        AttributeValue::Long(n) => literal.trim().parse::<i64>().ok().map(|l| n.cmp(&l)),
        AttributeValue::Double(d) => literal
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|l| d.partial_cmp(&l)),
        AttributeValue::Version(v) => Version::parse(literal).ok().map(|l| v.cmp(&l)),
        AttributeValue::List(_) => None,
    }
}

fn approx(attr: &AttributeValue, literal: &str) -> bool {
    fn normalize(s: &str) -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    }
    match attr {
        AttributeValue::String(s) => normalize(s) == normalize(literal),
        other => compare(other, literal) == Some(Ordering::Equal),
    }
}

fn wildcard_match(value: &str, segments: &[String]) -> bool {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return true,
    };
    if !value.starts_with(first.as_str()) {
        return false;
    }
    let mut remaining = &value[first.len()..];
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for seg in middle {
        match remaining.find(seg.as_str()) {
            Some(idx) => remaining = &remaining[idx + seg.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last.as_str())
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), FilterParseError> {
        match self.peek() {
            Some(b) if b == c => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(FilterParseError::Expected {
                input: self.input.to_string(),
                offset: self.pos,
                expected: c as char,
            }),
            None => Err(FilterParseError::UnexpectedEnd(self.input.to_string())),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterParseError> {
        self.expect(b'(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_ws();
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(FilterParseError::UnexpectedEnd(self.input.to_string())),
        };
        self.skip_ws();
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, FilterParseError> {
        let mut out = Vec::new();
        self.skip_ws();
        while self.peek() == Some(b'(') {
            out.push(self.parse_filter()?);
            self.skip_ws();
        }
        if out.is_empty() {
            return Err(FilterParseError::EmptyList {
                input: self.input.to_string(),
                offset: self.pos,
            });
        }
        Ok(out)
    }

    fn parse_item(&mut self) -> Result<Filter, FilterParseError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'~' | b'>' | b'<' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.input[start..self.pos].trim().to_string();
        if attr.is_empty() {
            return Err(FilterParseError::MissingAttribute {
                input: self.input.to_string(),
                offset: start,
            });
        }

        let op_offset = self.pos;
        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                b'='
            }
            Some(c @ (b'~' | b'>' | b'<')) => {
                self.pos += 1;
                if self.peek() != Some(b'=') {
                    return Err(FilterParseError::InvalidOperator {
                        input: self.input.to_string(),
                        offset: op_offset,
                    });
                }
                self.pos += 1;
                c
            }
            _ => {
                return Err(FilterParseError::InvalidOperator {
                    input: self.input.to_string(),
                    offset: op_offset,
                })
            }
        };

        let segments = self.parse_value()?;
        if op != b'=' {
            let value = segments.join("*");
            return Ok(match op {
                b'~' => Filter::Approx { attr, value },
                b'>' => Filter::GreaterEq { attr, value },
                _ => Filter::LessEq { attr, value },
            });
        }

        Ok(match segments.len() {
            1 => Filter::Equal {
                attr,
                value: segments.into_iter().next().unwrap_or_default(),
            },
            2 if segments.iter().all(String::is_empty) => Filter::Present { attr },
            _ => Filter::Substring { attr, segments },
        })
    }

    /// Reads a value up to the closing paren, splitting on unescaped `*`
    fn parse_value(&mut self) -> Result<Vec<String>, FilterParseError> {
        let mut segments = vec![String::new()];
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                ')' => {
                    self.pos += offset;
                    return Ok(segments);
                }
                '(' => {
                    return Err(FilterParseError::Expected {
                        input: self.input.to_string(),
                        offset: self.pos + offset,
                        expected: ')',
                    })
                }
                '*' => segments.push(String::new()),
                '\\' => match chars.next() {
                    Some((_, escaped)) => push_char(&mut segments, escaped),
                    None => break,
                },
                other => push_char(&mut segments, other),
            }
        }
        Err(FilterParseError::UnexpectedEnd(self.input.to_string()))
    }
}

fn push_char(segments: &mut [String], c: char) {
    if let Some(last) = segments.last_mut() {
        last.push(c);
    }
}

fn escape(value: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            write!(f, "\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(fs) | Filter::Or(fs) => {
                write!(f, "({}", if matches!(self, Filter::And(_)) { '&' } else { '|' })?;
                for inner in fs {
                    write!(f, "{}", inner)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Present { attr } => write!(f, "({}=*)", attr),
            Filter::Equal { attr, value } => {
                write!(f, "({}=", attr)?;
                escape(value, f)?;
                write!(f, ")")
            }
            Filter::Approx { attr, value } => {
                write!(f, "({}~=", attr)?;
                escape(value, f)?;
                write!(f, ")")
            }
            Filter::GreaterEq { attr, value } => {
                write!(f, "({}>=", attr)?;
                escape(value, f)?;
                write!(f, ")")
            }
            Filter::LessEq { attr, value } => {
                write!(f, "({}<=", attr)?;
                escape(value, f)?;
                write!(f, ")")
            }
            Filter::Substring { attr, segments } => {
                write!(f, "({}=", attr)?;
                for (idx, seg) in segments.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "*")?;
                    }
                    escape(seg, f)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Filter {
    type Error = FilterParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Filter> for String {
    fn from(f: Filter) -> Self {
        f.to_string()
    }
}
