//! Kernel parameter lists and execution ranges.

use std::fmt;
use std::sync::Arc;

use crate::array::Array;
use crate::dtype::Scalar;
use crate::shape::Dimensionality;

/// Value bound to one kernel parameter.
#[derive(Clone)]
pub enum ParameterValue {
    Array(Arc<Array>),
    Scalar(Scalar),
}

impl ParameterValue {
    pub fn as_array(&self) -> Option<&Arc<Array>> {
        match self {
            ParameterValue::Array(array) => Some(array),
            ParameterValue::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            ParameterValue::Array(_) => None,
            ParameterValue::Scalar(value) => Some(*value),
        }
    }
}

impl fmt::Debug for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Array(array) => write!(f, "Array({array:?})"),
            ParameterValue::Scalar(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<Arc<Array>> for ParameterValue {
    fn from(array: Arc<Array>) -> Self {
        ParameterValue::Array(array)
    }
}

impl From<&Arc<Array>> for ParameterValue {
    fn from(array: &Arc<Array>) -> Self {
        ParameterValue::Array(Arc::clone(array))
    }
}

impl From<Scalar> for ParameterValue {
    fn from(value: Scalar) -> Self {
        ParameterValue::Scalar(value)
    }
}

macro_rules! impl_value_from {
    ($($t:ty),* $(,)?) => {
        $(impl From<$t> for ParameterValue {
            fn from(value: $t) -> Self {
                ParameterValue::Scalar(Scalar::from(value))
            }
        })*
    };
}

impl_value_from!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

/// Ordered `(name, value)` pairs passed to a kernel.
///
/// Order matches the kernel's formal parameters; names identify arrays in the
/// generated preamble (`IMAGE_<name>_TYPE`, `READ_<name>`, ...).
///
/// ```ignore
/// let params = ParameterList::new()
///     .with("src", &src)
///     .with("dst", &dst)
///     .with("scalar", 5.0f32);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    entries: Vec<(String, ParameterValue)>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Array parameters in list order.
    pub fn arrays(&self) -> impl Iterator<Item = (&str, &Arc<Array>)> {
        self.iter()
            .filter_map(|(name, value)| value.as_array().map(|array| (name, array)))
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.iter().find(|(n, _)| *n == name).map(|(_, value)| value)
    }
}

impl<N: Into<String>, V: Into<ParameterValue>> FromIterator<(N, V)> for ParameterList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (name, value) in iter {
            list.push(name, value);
        }
        list
    }
}

/// Global execution range `(x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeArray([usize; 3]);

impl RangeArray {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self([x, y, z])
    }

    /// Range from up to three components; missing ones default to 1 and
    /// extra ones are ignored.
    pub fn from_slice(components: &[usize]) -> Self {
        let mut range = [1; 3];
        for (slot, value) in range.iter_mut().zip(components) {
            *slot = *value;
        }
        Self(range)
    }

    /// Range covering every element of `array`.
    pub fn of(array: &Array) -> Self {
        Self(array.shape().as_array())
    }

    pub const fn x(&self) -> usize {
        self.0[0]
    }

    pub const fn y(&self) -> usize {
        self.0[1]
    }

    pub const fn z(&self) -> usize {
        self.0[2]
    }

    pub const fn as_array(&self) -> [usize; 3] {
        self.0
    }

    /// True when any component is zero: nothing gets enqueued.
    pub fn is_empty(&self) -> bool {
        self.0.contains(&0)
    }

    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub const fn dim(&self) -> Dimensionality {
        Dimensionality::of(self.0[0], self.0[1], self.0[2])
    }

    /// Number of groups of `local` size needed to cover the range.
    pub fn groups(&self, local: [u32; 3]) -> [u64; 3] {
        let mut groups = [0u64; 3];
        for ((group, &extent), &size) in groups.iter_mut().zip(&self.0).zip(&local) {
            *group = (extent as u64).div_ceil(size.max(1) as u64);
        }
        groups
    }
}

impl Default for RangeArray {
    fn default() -> Self {
        Self([1; 3])
    }
}

impl From<[usize; 3]> for RangeArray {
    fn from(range: [usize; 3]) -> Self {
        Self(range)
    }
}

impl From<(usize, usize, usize)> for RangeArray {
    fn from((x, y, z): (usize, usize, usize)) -> Self {
        Self([x, y, z])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_padding() {
        assert_eq!(RangeArray::from_slice(&[10]), RangeArray::new(10, 1, 1));
        assert_eq!(RangeArray::from_slice(&[10, 5]), RangeArray::new(10, 5, 1));
        assert_eq!(RangeArray::from_slice(&[]), RangeArray::new(1, 1, 1));
        assert_eq!(RangeArray::from_slice(&[1, 2, 3, 4]), RangeArray::new(1, 2, 3));
        assert_eq!(RangeArray::default(), RangeArray::new(1, 1, 1));
    }

    #[test]
    fn test_range_empty() {
        assert!(RangeArray::new(10, 0, 1).is_empty());
        assert!(!RangeArray::new(10, 5, 1).is_empty());
        assert_eq!(RangeArray::new(10, 5, 2).size(), 100);
        assert_eq!(RangeArray::new(10, 5, 1).dim(), Dimensionality::Two);
    }

    #[test]
    fn test_range_groups() {
        let range = RangeArray::new(10, 5, 2);
        assert_eq!(range.groups([4, 4, 4]), [3, 2, 1]);
        assert_eq!(range.groups([256, 1, 1]), [1, 5, 2]);
        assert_eq!(RangeArray::new(0, 5, 1).groups([8, 8, 1]), [0, 1, 1]);
    }

    #[test]
    fn test_parameter_list_order() {
        let params = ParameterList::new()
            .with("a", 1.0f32)
            .with("b", 2i32)
            .with("c", Scalar::U8(3));
        let names: Vec<&str> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(params.len(), 3);
        assert_eq!(params.get("b").and_then(|v| v.as_scalar()), Some(Scalar::I32(2)));
        assert!(params.get("missing").is_none());
        assert_eq!(params.arrays().count(), 0);
    }

    #[test]
    fn test_parameter_list_collect() {
        let params: ParameterList = [("x", 1.0f64), ("y", 2.0f64)].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("y").and_then(|v| v.as_scalar()), Some(Scalar::F64(2.0)));
    }
}
