//! Leaf values written into trajectories.
//!
//! A [`Tensor`] is a dense, row-major array with a logical [`DType`] and a
//! shape. Scalars have the empty shape `[]`. Data is stored in one of a few
//! storage families ([`TensorData`]); the dtype selects the logical width.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Logical element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// Booleans.
    Bool,
    /// Signed 8-bit integers.
    Int8,
    /// Signed 16-bit integers.
    Int16,
    /// Signed 32-bit integers.
    Int32,
    /// Signed 64-bit integers.
    Int64,
    /// Unsigned 8-bit integers.
    Uint8,
    /// Unsigned 16-bit integers.
    Uint16,
    /// Unsigned 32-bit integers.
    Uint32,
    /// Unsigned 64-bit integers.
    Uint64,
    /// Single precision floats. Stored widened; precision is not enforced.
    Float32,
    /// Double precision floats.
    Float64,
    /// UTF-8 strings.
    String,
}

impl DType {
    /// Returns the lowercase name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
            Self::Uint32 => "uint32",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
        }
    }

    /// Inclusive integer range of the narrow integer dtypes.
    fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Self::Int8 => Some((i8::MIN.into(), i8::MAX.into())),
            Self::Int16 => Some((i16::MIN.into(), i16::MAX.into())),
            Self::Int32 => Some((i32::MIN.into(), i32::MAX.into())),
            Self::Uint8 => Some((0, u8::MAX.into())),
            Self::Uint16 => Some((0, u16::MAX.into())),
            Self::Uint32 => Some((0, u32::MAX.into())),
            _ => None,
        }
    }

    const fn storage(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => "int",
            Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64 => "uint",
            Self::Float32 | Self::Float64 => "float",
            Self::String => "string",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flat element storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum TensorData {
    /// Storage for `bool`.
    Bool(Vec<bool>),
    /// Storage for the signed integer dtypes.
    Int(Vec<i64>),
    /// Storage for the unsigned integer dtypes.
    Uint(Vec<u64>),
    /// Storage for the float dtypes.
    Float(Vec<f64>),
    /// Storage for `string`.
    String(Vec<String>),
}

impl TensorData {
    /// Number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Uint(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    /// True when no elements are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    /// First element outside `[lo, hi]`, for integer storage.
    fn first_outside(&self, lo: i128, hi: i128) -> Option<i128> {
        let outside = |v: i128| !(lo..=hi).contains(&v);
        match self {
            Self::Int(v) => v.iter().map(|x| i128::from(*x)).find(|x| outside(*x)),
            Self::Uint(v) => v.iter().map(|x| i128::from(*x)).find(|x| outside(*x)),
            Self::Bool(_) | Self::Float(_) | Self::String(_) => None,
        }
    }

    fn extend_from(&mut self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(b),
            (Self::Int(a), Self::Int(b)) => a.extend_from_slice(b),
            (Self::Uint(a), Self::Uint(b)) => a.extend_from_slice(b),
            (Self::Float(a), Self::Float(b)) => a.extend_from_slice(b),
            (Self::String(a), Self::String(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    fn empty_like(&self, capacity: usize) -> Self {
        match self {
            Self::Bool(_) => Self::Bool(Vec::with_capacity(capacity)),
            Self::Int(_) => Self::Int(Vec::with_capacity(capacity)),
            Self::Uint(_) => Self::Uint(Vec::with_capacity(capacity)),
            Self::Float(_) => Self::Float(Vec::with_capacity(capacity)),
            Self::String(_) => Self::String(Vec::with_capacity(capacity)),
        }
    }
}

/// Formats a shape as `[d0,d1,...]`.
#[must_use]
pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("[{}]", dims.join(","))
}

/// A dense leaf value.
///
/// Narrow integer dtypes are range-checked on construction, including when
/// deserialized.
///
/// # Examples
///
/// ```
/// use trajectory_writer::{DType, Tensor};
///
/// let scalar = Tensor::from(3i64);
/// assert_eq!(scalar.dtype(), DType::Int64);
/// assert!(scalar.shape().is_empty());
///
/// let stacked = Tensor::stack(&[Tensor::from(1i64), Tensor::from(2i64)]).unwrap();
/// assert_eq!(stacked.shape(), &[2]);
/// assert_eq!(stacked.as_ints(), Some(&[1i64, 2][..]));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorParts")]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: TensorData,
}

/// Unchecked wire form of a [`Tensor`].
#[derive(Deserialize)]
struct TensorParts {
    dtype: DType,
    shape: Vec<usize>,
    data: TensorData,
}

impl TryFrom<TensorParts> for Tensor {
    type Error = ValidationError;

    fn try_from(parts: TensorParts) -> Result<Self, Self::Error> {
        Self::new(parts.dtype, parts.shape, parts.data)
    }
}

impl Tensor {
    /// Creates a tensor, checking that `data` can hold `dtype`, that every
    /// element fits the dtype and that the element count matches `shape`.
    pub fn new(dtype: DType, shape: Vec<usize>, data: TensorData) -> Result<Self, ValidationError> {
        if dtype.storage() != data.kind() {
            return Err(ValidationError::StorageMismatch {
                dtype,
                storage: data.kind(),
            });
        }
        if let Some((lo, hi)) = dtype.int_range() {
            if let Some(value) = data.first_outside(lo, hi) {
                return Err(ValidationError::ValueOutOfRange {
                    dtype,
                    value: value.to_string(),
                });
            }
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ValidationError::ElementCount {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Creates a scalar tensor.
    pub fn scalar(dtype: DType, data: TensorData) -> Result<Self, ValidationError> {
        Self::new(dtype, Vec::new(), data)
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions, outermost first. Empty for scalars.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat storage in row-major order.
    #[must_use]
    pub const fn data(&self) -> &TensorData {
        &self.data
    }

    /// Number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// True for rank-0 tensors.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Returns a copy with a new shape holding the same number of elements.
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Self, ValidationError> {
        Self::new(self.dtype, shape, self.data.clone())
    }

    /// Boolean elements, if stored as `bool`.
    #[must_use]
    pub fn as_bools(&self) -> Option<&[bool]> {
        match &self.data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a signed integer tensor.
    #[must_use]
    pub fn as_ints(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of an unsigned integer tensor.
    #[must_use]
    pub fn as_uints(&self) -> Option<&[u64]> {
        match &self.data {
            TensorData::Uint(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a float tensor.
    #[must_use]
    pub fn as_floats(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a string tensor.
    #[must_use]
    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.data {
            TensorData::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of a scalar integer tensor.
    #[must_use]
    pub fn as_int_scalar(&self) -> Option<i64> {
        if !self.is_scalar() {
            return None;
        }
        self.as_ints().and_then(|v| v.first().copied())
    }

    /// Stacks tensors of identical dtype and shape along a new leading axis.
    pub fn stack(tensors: &[Self]) -> Result<Self, ValidationError> {
        let Some(first) = tensors.first() else {
            return Err(ValidationError::StackMismatch {
                reason: "no tensors to stack".to_string(),
            });
        };

        let mut data = first.data.empty_like(first.num_elements() * tensors.len());
        for (i, t) in tensors.iter().enumerate() {
            if t.dtype != first.dtype {
                return Err(ValidationError::StackMismatch {
                    reason: format!("element {i} has dtype {} but element 0 has {}", t.dtype, first.dtype),
                });
            }
            if t.shape != first.shape {
                return Err(ValidationError::StackMismatch {
                    reason: format!(
                        "element {i} has shape {} but element 0 has {}",
                        format_shape(&t.shape),
                        format_shape(&first.shape)
                    ),
                });
            }
            if !data.extend_from(&t.data) {
                return Err(ValidationError::StackMismatch {
                    reason: format!("element {i} has incompatible storage"),
                });
            }
        }

        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(tensors.len());
        shape.extend_from_slice(&first.shape);
        Ok(Self {
            dtype: first.dtype,
            shape,
            data,
        })
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_scalar() {
            let shown = match &self.data {
                TensorData::Bool(v) => v.first().map(ToString::to_string),
                TensorData::Int(v) => v.first().map(ToString::to_string),
                TensorData::Uint(v) => v.first().map(ToString::to_string),
                TensorData::Float(v) => v.first().map(ToString::to_string),
                TensorData::String(v) => v.first().map(|s| format!("{s:?}")),
            };
            if let Some(shown) = shown {
                return f.write_str(&shown);
            }
        }
        write!(f, "{}{}", self.dtype, format_shape(&self.shape))
    }
}

// Scalar conversions
impl From<bool> for Tensor {
    fn from(v: bool) -> Self {
        Self {
            dtype: DType::Bool,
            shape: Vec::new(),
            data: TensorData::Bool(vec![v]),
        }
    }
}

impl From<i32> for Tensor {
    fn from(v: i32) -> Self {
        Self {
            dtype: DType::Int32,
            shape: Vec::new(),
            data: TensorData::Int(vec![i64::from(v)]),
        }
    }
}

impl From<i64> for Tensor {
    fn from(v: i64) -> Self {
        Self {
            dtype: DType::Int64,
            shape: Vec::new(),
            data: TensorData::Int(vec![v]),
        }
    }
}

impl From<u8> for Tensor {
    fn from(v: u8) -> Self {
        Self {
            dtype: DType::Uint8,
            shape: Vec::new(),
            data: TensorData::Uint(vec![u64::from(v)]),
        }
    }
}

impl From<f32> for Tensor {
    fn from(v: f32) -> Self {
        Self {
            dtype: DType::Float32,
            shape: Vec::new(),
            data: TensorData::Float(vec![f64::from(v)]),
        }
    }
}

impl From<f64> for Tensor {
    fn from(v: f64) -> Self {
        Self {
            dtype: DType::Float64,
            shape: Vec::new(),
            data: TensorData::Float(vec![v]),
        }
    }
}

impl From<&str> for Tensor {
    fn from(v: &str) -> Self {
        Self {
            dtype: DType::String,
            shape: Vec::new(),
            data: TensorData::String(vec![v.to_string()]),
        }
    }
}

impl From<String> for Tensor {
    fn from(v: String) -> Self {
        Self {
            dtype: DType::String,
            shape: Vec::new(),
            data: TensorData::String(vec![v]),
        }
    }
}

// Rank-1 conversions
impl From<Vec<i64>> for Tensor {
    fn from(v: Vec<i64>) -> Self {
        Self {
            dtype: DType::Int64,
            shape: vec![v.len()],
            data: TensorData::Int(v),
        }
    }
}

impl From<Vec<f32>> for Tensor {
    fn from(v: Vec<f32>) -> Self {
        Self {
            dtype: DType::Float32,
            shape: vec![v.len()],
            data: TensorData::Float(v.into_iter().map(f64::from).collect()),
        }
    }
}

impl From<Vec<f64>> for Tensor {
    fn from(v: Vec<f64>) -> Self {
        Self {
            dtype: DType::Float64,
            shape: vec![v.len()],
            data: TensorData::Float(v),
        }
    }
}

impl From<Vec<bool>> for Tensor {
    fn from(v: Vec<bool>) -> Self {
        Self {
            dtype: DType::Bool,
            shape: vec![v.len()],
            data: TensorData::Bool(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Tensor::from(true).dtype(), DType::Bool);
        assert_eq!(Tensor::from(1i32).dtype(), DType::Int32);
        assert_eq!(Tensor::from(1i64).dtype(), DType::Int64);
        assert_eq!(Tensor::from(1u8).dtype(), DType::Uint8);
        assert_eq!(Tensor::from(1.0f32).dtype(), DType::Float32);
        assert_eq!(Tensor::from(1.0f64).dtype(), DType::Float64);
        assert_eq!(Tensor::from("a").dtype(), DType::String);
        assert!(Tensor::from(1i64).is_scalar());
    }

    #[test]
    fn test_new_rejects_element_count() {
        let err = Tensor::new(DType::Int64, vec![2, 2], TensorData::Int(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, ValidationError::ElementCount { expected: 4, actual: 3, .. }));
    }

    #[test]
    fn test_new_rejects_storage_mismatch() {
        let err = Tensor::new(DType::Float32, vec![1], TensorData::Int(vec![1])).unwrap_err();
        assert!(matches!(err, ValidationError::StorageMismatch { dtype: DType::Float32, storage: "int" }));
    }

    #[test]
    fn test_new_rejects_out_of_range_narrow_ints() {
        let err = Tensor::new(DType::Int8, vec![2], TensorData::Int(vec![1, 300])).unwrap_err();
        assert!(matches!(err, ValidationError::ValueOutOfRange { dtype: DType::Int8, ref value } if value == "300"));
        assert!(Tensor::new(DType::Int8, vec![2], TensorData::Int(vec![-128, 127])).is_ok());
        assert!(Tensor::new(DType::Uint8, vec![1], TensorData::Uint(vec![256])).is_err());
        assert!(Tensor::new(DType::Uint16, vec![1], TensorData::Uint(vec![65_535])).is_ok());
        assert!(Tensor::new(DType::Int64, vec![1], TensorData::Int(vec![i64::MIN])).is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"dtype":"int8","shape":[],"data":{"kind":"int","values":[1000]}}"#;
        let err = serde_json::from_str::<Tensor>(json).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let json = r#"{"dtype":"int64","shape":[3],"data":{"kind":"int","values":[1,2]}}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());

        let json = r#"{"dtype":"int8","shape":[2],"data":{"kind":"int","values":[1,2]}}"#;
        let t: Tensor = serde_json::from_str(json).unwrap();
        assert_eq!(t.shape(), &[2]);
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::from(vec![1.0f64, 2.0]);
        let r = t.reshape(vec![1, 2]).unwrap();
        assert_eq!(r.shape(), &[1, 2]);
        assert!(t.reshape(vec![3]).is_err());
    }

    #[test]
    fn test_stack_scalars() {
        let s = Tensor::stack(&[Tensor::from(1i64), Tensor::from(2i64), Tensor::from(3i64)]).unwrap();
        assert_eq!(s.shape(), &[3]);
        assert_eq!(s.as_ints(), Some(&[1i64, 2, 3][..]));
    }

    #[test]
    fn test_stack_matrices() {
        let a = Tensor::new(DType::Float64, vec![2, 2], TensorData::Float(vec![0.0; 4])).unwrap();
        let b = Tensor::new(DType::Float64, vec![2, 2], TensorData::Float(vec![1.0; 4])).unwrap();
        let s = Tensor::stack(&[a, b]).unwrap();
        assert_eq!(s.shape(), &[2, 2, 2]);
        assert_eq!(s.as_floats().unwrap()[4..], [1.0; 4]);
    }

    #[test]
    fn test_stack_rejects_mixed_dtype() {
        let err = Tensor::stack(&[Tensor::from(1i64), Tensor::from(1.0f64)]).unwrap_err();
        assert!(matches!(err, ValidationError::StackMismatch { .. }));
    }

    #[test]
    fn test_stack_rejects_mixed_shape() {
        let err = Tensor::stack(&[Tensor::from(vec![1i64]), Tensor::from(vec![1i64, 2])]).unwrap_err();
        assert!(format!("{err}").contains("[2]"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Tensor::from(4i64).to_string(), "4");
        assert_eq!(Tensor::from(true).to_string(), "true");
        assert_eq!(Tensor::from("hi").to_string(), "\"hi\"");
        assert_eq!(Tensor::from(vec![1i64, 2]).to_string(), "int64[2]");
        assert_eq!(format_shape(&[]), "[]");
        assert_eq!(format_shape(&[1, 2]), "[1,2]");
    }

    #[test]
    fn test_serialization() {
        let t = Tensor::from(vec![1.5f64, 2.5]);
        let json = serde_json::to_string(&t).unwrap();
        let back: Tensor = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
