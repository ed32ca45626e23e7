use std::fmt;

// Shape — N-dimensional shape representation
//
// A Shape describes the size of each dimension of a tensor:
//   - Scalar: Shape([])          — 0 dimensions, 1 element
//   - Vector: Shape([4])         — 1 dimension, 4 elements
//   - Batch:  Shape([8, 3])      — leading (batch) dimension first
//
// Placeholders, nodes and tensors all carry a Shape. Two values are
// interchangeable only when their shapes (and element kinds) are equal;
// there is no implicit broadcasting at this layer.

/// Maximum number of dimensions a tensor may have.
pub const MAX_TENSOR_DIMENSIONS: usize = 6;

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar shape has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> crate::Result<usize> {
        self.0.get(d).copied().ok_or(crate::Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Size of the leading (batch) dimension.
    pub fn leading(&self) -> crate::Result<usize> {
        self.dim(0)
    }

    /// All dimensions after the leading one.
    pub fn trailing(&self) -> &[usize] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Number of elements in one step along the leading dimension.
    pub fn row_len(&self) -> usize {
        self.trailing().iter().product()
    }

    /// Return a copy with the leading dimension replaced.
    pub fn with_leading(&self, leading: usize) -> crate::Result<Shape> {
        if self.0.is_empty() {
            return Err(crate::Error::RankMismatch {
                expected: 1,
                got: 0,
            });
        }
        let mut dims = self.0.clone();
        dims[0] = leading;
        Ok(Shape(dims))
    }

    /// Check the dimension limit.
    pub fn validate(&self) -> crate::Result<()> {
        if self.rank() > MAX_TENSOR_DIMENSIONS {
            return Err(crate::Error::msg(format!(
                "shape {} has {} dimensions, at most {} are supported",
                self,
                self.rank(),
                MAX_TENSOR_DIMENSIONS
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// Convenient From implementations
// These let you write: Shape::from((8, 3)) instead of Shape::new(vec![8, 3])

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(s: [usize; N]) -> Self {
        Shape(s.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert!(s.leading().is_err());
    }

    #[test]
    fn test_batch_shape() {
        let s = Shape::from((8, 3));
        assert_eq!(s.leading().unwrap(), 8);
        assert_eq!(s.trailing(), &[3]);
        assert_eq!(s.row_len(), 3);
        assert_eq!(s.with_leading(2).unwrap(), Shape::from((2, 3)));
    }

    #[test]
    fn test_row_len_of_vector() {
        let s = Shape::from(5);
        assert_eq!(s.trailing(), &[] as &[usize]);
        assert_eq!(s.row_len(), 1);
    }

    #[test]
    fn test_validate_rank_limit() {
        assert!(Shape::from(vec![1; 6]).validate().is_ok());
        assert!(Shape::from(vec![1; 7]).validate().is_err());
    }

    #[test]
    fn test_display() {
        let s = Shape::from((3, 4));
        assert_eq!(format!("{}", s), "[3, 4]");
    }
}
