use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Origin of a tile on the slide canvas.
///
/// One component per grid axis, in the same axis order as the slide shape
/// (`(row, col)` for a 2-D slide). Coordinates are the unique keys of the
/// tile namespace. Ordering is lexicographic, which matches the grid's
/// row-major enumeration.
///
/// The stringified form `"(r, c)"` is the key used in the container manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TileCoord(Vec<usize>);

impl TileCoord {
    /// Create a coordinate from its components.
    pub fn new(components: impl Into<Vec<usize>>) -> Self {
        Self(components.into())
    }

    /// Number of components.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Components as a slice.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for TileCoord {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

impl From<&[usize]> for TileCoord {
    fn from(v: &[usize]) -> Self {
        Self(v.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for TileCoord {
    fn from(v: [usize; N]) -> Self {
        Self(v.to_vec())
    }
}

impl From<(usize, usize)> for TileCoord {
    fn from((a, b): (usize, usize)) -> Self {
        Self(vec![a, b])
    }
}

impl From<(usize, usize, usize)> for TileCoord {
    fn from((a, b, c): (usize, usize, usize)) -> Self {
        Self(vec![a, b, c])
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", c)?;
        }
        f.write_str(")")
    }
}

impl FromStr for TileCoord {
    type Err = StoreError;

    /// Parse `"(r, c)"`; the parentheses are optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .unwrap_or(trimmed);

        if inner.trim().is_empty() {
            return Err(StoreError::InvalidKey(s.to_string()));
        }

        inner
            .split(',')
            .map(|part| part.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map(TileCoord)
            .map_err(|_| StoreError::InvalidKey(s.to_string()))
    }
}

impl From<TileCoord> for String {
    fn from(coord: TileCoord) -> Self {
        coord.to_string()
    }
}

impl TryFrom<String> for TileCoord {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
