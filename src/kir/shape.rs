//! Static block shapes and right-aligned broadcasting.

use std::fmt;

/// Largest number of elements a single block may hold.
pub const MAX_NUMEL: usize = 1 << 20;

/// Static dimensions of a block. Rank 0 is a scalar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Shape(dims.into())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.rank()];
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }

    /// Multi-index of a flat row-major offset.
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut idx = vec![0; self.rank()];
        for d in (0..self.rank()).rev() {
            let n = self.0[d].max(1);
            idx[d] = flat % n;
            flat /= n;
        }
        idx
    }

    pub fn insert_axis(&self, axis: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.insert(axis, 1);
        Shape(dims)
    }

    pub fn remove_axis(&self, axis: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.remove(axis);
        Shape(dims)
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

/// Shape both operands broadcast to. Ranks align from the right and a
/// size-1 dimension stretches; any other mismatch is an error naming
/// the offending dimensions.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Result<Shape, String> {
    let rank = a.rank().max(b.rank());
    let mut dims = vec![0; rank];
    for i in 0..rank {
        let da = dim_from_right(a, rank - 1 - i);
        let db = dim_from_right(b, rank - 1 - i);
        dims[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => {
                return Err(format!(
                    "cannot broadcast shapes {} and {}: dimension {} is {} vs {}",
                    a, b, i, x, y
                ))
            }
        };
    }
    Ok(Shape(dims))
}

/// Whether `from` can be stretched to exactly `to`.
pub fn can_broadcast_to(from: &Shape, to: &Shape) -> bool {
    matches!(broadcast_shapes(from, to), Ok(s) if s == *to)
}

fn dim_from_right(s: &Shape, from_right: usize) -> usize {
    if from_right < s.rank() {
        s.0[s.rank() - 1 - from_right]
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_outer_product() {
        let a = Shape::new([32, 1]);
        let b = Shape::new([1, 16]);
        assert_eq!(broadcast_shapes(&a, &b).unwrap(), Shape::new([32, 16]));
    }

    #[test]
    fn test_broadcast_rank_extension() {
        let a = Shape::new([4, 8]);
        let b = Shape::new([8]);
        assert_eq!(broadcast_shapes(&a, &b).unwrap(), Shape::new([4, 8]));
        assert_eq!(
            broadcast_shapes(&Shape::scalar(), &b).unwrap(),
            Shape::new([8])
        );
    }

    #[test]
    fn test_broadcast_mismatch() {
        let err = broadcast_shapes(&Shape::new([32]), &Shape::new([16])).unwrap_err();
        assert!(err.contains("[32] and [16]"));
    }

    #[test]
    fn test_can_broadcast_to() {
        assert!(can_broadcast_to(&Shape::new([1, 8]), &Shape::new([4, 8])));
        assert!(!can_broadcast_to(&Shape::new([4, 8]), &Shape::new([1, 8])));
    }

    #[test]
    fn test_strides_and_unravel() {
        let s = Shape::new([2, 3, 4]);
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.unravel(23), vec![1, 2, 3]);
        assert_eq!(s.numel(), 24);
        assert_eq!(Shape::scalar().numel(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new([64, 32]).to_string(), "[64, 32]");
        assert_eq!(Shape::scalar().to_string(), "[]");
    }
}
