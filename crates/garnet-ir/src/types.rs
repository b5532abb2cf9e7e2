//! Element types and shapes for values flowing through the graph.

/// Element type of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    BF16,
    I64,
    I32,
    U8,
    Bool,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I64 => 8,
            DataType::U8 | DataType::Bool => 1,
        }
    }
}

/// Tensor shape: fully static, or not yet known.
///
/// `Unknown` shapes are allowed to exist in a graph, but any operation the
/// combiner is asked to combine must have static shapes — payload sizing
/// and result-slicing both need concrete dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    /// All dimensions are known at compile time.
    Static(Vec<usize>),

    /// Shape has not been inferred.
    Unknown,
}

impl Shape {
    /// Check if the shape is fully static.
    pub fn is_static(&self) -> bool {
        matches!(self, Shape::Static(_))
    }

    /// Get static dimensions if available.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            Shape::Static(dims) => Some(dims),
            Shape::Unknown => None,
        }
    }

    /// Number of dimensions, if known.
    pub fn ndim(&self) -> Option<usize> {
        match self {
            Shape::Static(dims) => Some(dims.len()),
            Shape::Unknown => None,
        }
    }

    /// Total number of elements, if the shape is static.
    pub fn element_count(&self) -> Option<usize> {
        match self {
            Shape::Static(dims) => Some(dims.iter().product()),
            Shape::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DataType::F32.size_bytes(), 4);
        assert_eq!(DataType::BF16.size_bytes(), 2);
        assert_eq!(DataType::I64.size_bytes(), 8);
        assert_eq!(DataType::Bool.size_bytes(), 1);
    }

    #[test]
    fn test_shape_element_count() {
        let shape = Shape::Static(vec![2, 3, 4]);
        assert_eq!(shape.element_count(), Some(24));
        assert_eq!(shape.ndim(), Some(3));
        assert!(shape.is_static());

        assert_eq!(Shape::Unknown.element_count(), None);
        assert_eq!(Shape::Unknown.ndim(), None);
    }

    #[test]
    fn test_scalar_shape() {
        let scalar = Shape::Static(vec![]);
        assert_eq!(scalar.element_count(), Some(1));
        assert_eq!(scalar.ndim(), Some(0));
    }
}
