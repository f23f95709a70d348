//! Path addressing for nodes and sub-fields of a pipeline document.
//!
//! A [`Position`] is an immutable sequence of [`Segment`]s from the document
//! root. Positions render as dotted paths:
//!
//! ```text
//! pipeline.1.config.body.__value__.0
//! ```
//!
//! Keys containing `.` or `\` are escaped with a backslash, and all-digit
//! keys get a leading `\` so they don't read back as indexes.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::BricklineError;

/// Root key of the top-level pipeline.
pub const ROOT_PIPELINE_KEY: &str = "pipeline";

/// Key of the config mapping inside a node.
pub const CONFIG_KEY: &str = "config";

/// Key of the wrapped value inside an expression.
pub const EXPRESSION_VALUE_KEY: &str = "__value__";

/// One step in a [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => {
                if !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()) {
                    f.write_char('\\')?;
                }
                for c in k.chars() {
                    if c == '.' || c == '\\' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                Ok(())
            }
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

impl From<&str> for Segment {
    fn from(k: &str) -> Self {
        Segment::Key(k.to_string())
    }
}

impl From<String> for Segment {
    fn from(k: String) -> Self {
        Segment::Key(k)
    }
}

/// Immutable path from the document root to a node or sub-field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    segments: Vec<Segment>,
}

impl Position {
    /// The empty position (document root).
    pub fn root() -> Self {
        Self::default()
    }

    /// Position of the top-level pipeline.
    pub fn root_pipeline() -> Self {
        Self::root().child(ROOT_PIPELINE_KEY)
    }

    /// Build a position from segments.
    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// A new position with `segment` appended.
    pub fn child(&self, segment: impl Into<Segment>) -> Position {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Position { segments }
    }

    /// A new position with every segment of `other` appended.
    pub fn join(&self, other: &Position) -> Position {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Position { segments }
    }

    /// Position of a node's config property: `<node>.config.<property>`.
    pub fn config_field(&self, property: &str) -> Position {
        self.child(CONFIG_KEY).child(property)
    }

    /// Position of the pipeline held by a node's pipeline-valued property:
    /// `<node>.config.<property>.__value__`.
    pub fn sub_pipeline(&self, property: &str) -> Position {
        self.config_field(property).child(EXPRESSION_VALUE_KEY)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The enclosing position, or `None` at the root.
    pub fn parent(&self) -> Option<Position> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Position {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The last segment, if any.
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// `true` if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &Position) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Dotted path form.
    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Position {
    type Err = BricklineError;

    /// Parse a dotted path. Unescaped all-digit segments become indexes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Position::root());
        }
        let invalid = |message: &str| BricklineError::InvalidPosition {
            path: s.to_string(),
            message: message.into(),
        };

        let mut segments = Vec::new();
        let mut part = String::new();
        let mut escaped = false;
        let mut chars = s.chars();
        loop {
            let next = chars.next();
            match next {
                Some('\\') => {
                    let c = chars.next().ok_or_else(|| invalid("dangling escape"))?;
                    part.push(c);
                    escaped = true;
                }
                Some('.') | None => {
                    if part.is_empty() {
                        return Err(invalid("empty segment"));
                    }
                    let digits = part.bytes().all(|b| b.is_ascii_digit());
                    let segment = match part.parse::<usize>() {
                        Ok(i) if digits && !escaped => Segment::Index(i),
                        _ => Segment::Key(std::mem::take(&mut part)),
                    };
                    segments.push(segment);
                    part.clear();
                    escaped = false;
                    if next.is_none() {
                        break;
                    }
                }
                Some(c) => part.push(c),
            }
        }
        Ok(Position { segments })
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path())
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
