use smallvec::SmallVec;
use std::fmt;

/// Tensor shape, inline up to rank 4.
///
/// NHWC activations, per-channel vectors, and matmul operands all fit in
/// four dimensions, so the dimension list rarely touches the heap.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    /// Rank.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count. A rank-0 shape holds one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size along `axis`, if the axis exists.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Row-major strides, in elements.
    pub fn contiguous_strides(&self) -> SmallVec<[usize; 4]> {
        let mut strides: SmallVec<[usize; 4]> = SmallVec::with_capacity(self.ndim());
        let mut step = 1usize;
        for &d in self.dims.iter().rev() {
            strides.push(step);
            step *= d;
        }
        strides.reverse();
        strides
    }

    /// Pad with leading 1s to `ndim` dimensions, aligning broadcast
    /// operands to a common rank.
    pub fn padded_to(&self, ndim: usize) -> Shape {
        debug_assert!(ndim >= self.ndim());
        let mut dims = SmallVec::from_elem(1usize, ndim - self.ndim());
        dims.extend_from_slice(&self.dims);
        Shape { dims }
    }

    /// Broadcast two shapes together, or `None` when some dimension pair
    /// disagrees with neither side being 1.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let a = self.padded_to(ndim);
        let b = other.padded_to(ndim);
        let mut dims: SmallVec<[usize; 4]> = SmallVec::with_capacity(ndim);
        for (&x, &y) in a.dims.iter().zip(&b.dims) {
            match (x, y) {
                _ if x == y => dims.push(x),
                (1, _) => dims.push(y),
                (_, 1) => dims.push(x),
                _ => return None,
            }
        }
        Some(Shape { dims })
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}
