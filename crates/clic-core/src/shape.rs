//! Array shapes and dimensionality.

use std::fmt;

use crate::error::{ClicError, ClicResult};

/// Number of meaningful dimensions of a shape or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dimensionality {
    One = 1,
    Two = 2,
    Three = 3,
}

impl Dimensionality {
    pub const ALL: [Dimensionality; 3] = [Dimensionality::One, Dimensionality::Two, Dimensionality::Three];

    /// Dimensionality of a `(width, height, depth)` triple: depth > 1 is 3-D,
    /// height > 1 is 2-D, anything else 1-D.
    pub const fn of(_width: usize, height: usize, depth: usize) -> Self {
        if depth > 1 {
            Dimensionality::Three
        } else if height > 1 {
            Dimensionality::Two
        } else {
            Dimensionality::One
        }
    }

    pub const fn get(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Dimensionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.get())
    }
}

/// Width, height and depth of an array. Unused dimensions are 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    width: usize,
    height: usize,
    depth: usize,
}

impl Shape {
    /// Validated shape: every dimension at least 1 and the element count
    /// representable in `usize`.
    pub fn new(width: usize, height: usize, depth: usize) -> ClicResult<Self> {
        let invalid = || ClicError::InvalidShape { width, height, depth };
        if width == 0 || height == 0 || depth == 0 {
            return Err(invalid());
        }
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(depth))
            .ok_or_else(invalid)?;
        Ok(Self { width, height, depth })
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Number of elements.
    pub const fn size(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub const fn dim(&self) -> Dimensionality {
        Dimensionality::of(self.width, self.height, self.depth)
    }

    /// Same width and height, depth collapsed to 1.
    pub const fn xy(&self) -> Shape {
        Shape { width: self.width, height: self.height, depth: 1 }
    }

    pub const fn as_array(&self) -> [usize; 3] {
        [self.width, self.height, self.depth]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}
