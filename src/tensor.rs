use crate::error::TestGenError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const INT4_MIN: i64 = -8;
pub const INT4_MAX: i64 = 7;

/// Integer encodings a kernel test can consume or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntType {
    Int4,
    Int8,
    Int16,
    Int32,
    Int64,
}

impl IntType {
    pub const fn min(self) -> i64 {
        match self {
            IntType::Int4 => INT4_MIN,
            IntType::Int8 => i8::MIN as i64,
            IntType::Int16 => i16::MIN as i64,
            IntType::Int32 => i32::MIN as i64,
            IntType::Int64 => i64::MIN,
        }
    }

    pub const fn max(self) -> i64 {
        match self {
            IntType::Int4 => INT4_MAX,
            IntType::Int8 => i8::MAX as i64,
            IntType::Int16 => i16::MAX as i64,
            IntType::Int32 => i32::MAX as i64,
            IntType::Int64 => i64::MAX,
        }
    }

    /// Storage width in bytes. Int4 values occupy a full byte until packed.
    pub const fn byte_width(self) -> usize {
        match self {
            IntType::Int4 | IntType::Int8 => 1,
            IntType::Int16 => 2,
            IntType::Int32 => 4,
            IntType::Int64 => 8,
        }
    }

    pub const fn c_type(self) -> &'static str {
        match self {
            IntType::Int4 | IntType::Int8 => "int8_t",
            IntType::Int16 => "int16_t",
            IntType::Int32 => "int32_t",
            IntType::Int64 => "int64_t",
        }
    }

    pub fn clamp(self, value: i64) -> i64 {
        value.clamp(self.min(), self.max())
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntType::Int4 => "int4",
            IntType::Int8 => "int8",
            IntType::Int16 => "int16",
            IntType::Int32 => "int32",
            IntType::Int64 => "int64",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    Input,
    Weight,
    Bias,
    Output,
}

impl TensorRole {
    /// Cache table file name for the role. Reference outputs are never cached.
    pub const fn table_file_name(self) -> Option<&'static str> {
        match self {
            TensorRole::Input => Some("input.txt"),
            TensorRole::Weight => Some("kernel.txt"),
            TensorRole::Bias => Some("bias.txt"),
            TensorRole::Output => None,
        }
    }

    /// Prefix of the generated data header for the role.
    pub const fn data_file_prefix(self) -> &'static str {
        match self {
            TensorRole::Input => "input",
            TensorRole::Weight => "weights",
            TensorRole::Bias => "biases",
            TensorRole::Output => "output_ref",
        }
    }
}

/// Half-open randomization range `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueDomain {
    pub min: f64,
    pub max: f64,
}

impl ValueDomain {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn of(int_type: IntType) -> Self {
        Self {
            min: int_type.min() as f64,
            max: int_type.max() as f64,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }

    pub(crate) fn validate(&self) -> Result<(), TestGenError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(TestGenError::invalid_config(format!(
                "randomization range [{}, {}) is empty or not finite",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Dense row-major tensor in the f32 working representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TestGenError> {
        let expected = element_count(&shape);
        if expected != data.len() {
            return Err(TestGenError::ShapeMismatch {
                expected: shape,
                actual_elements: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let len = element_count(&shape);
        Self {
            shape,
            data: vec![value; len],
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: Vec<usize>) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn from_values<V: FlatValues + ?Sized>(
        shape: Vec<usize>,
        values: &V,
    ) -> Result<Self, TestGenError> {
        let data = values.flat_values().into_iter().map(|v| v as f32).collect();
        Self::new(shape, data)
    }

    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, TestGenError> {
        Self::new(shape, self.data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Canonical flattening of any numeric source into row-major integer values.
///
/// Floating point elements are truncated toward zero, the same conversion a C
/// `%d` formatter or an integer cast applies.
pub trait FlatValues {
    fn flat_values(&self) -> Vec<i64>;
}

impl FlatValues for Tensor {
    fn flat_values(&self) -> Vec<i64> {
        self.data.flat_values()
    }
}

impl FlatValues for [f32] {
    fn flat_values(&self) -> Vec<i64> {
        self.iter().map(|v| v.trunc() as i64).collect()
    }
}

impl FlatValues for [f64] {
    fn flat_values(&self) -> Vec<i64> {
        self.iter().map(|v| v.trunc() as i64).collect()
    }
}

macro_rules! impl_flat_values_for_ints {
    ($($ty:ty),*) => {
        $(
            impl FlatValues for [$ty] {
                fn flat_values(&self) -> Vec<i64> {
                    self.iter().map(|&v| v as i64).collect()
                }
            }
        )*
    };
}

impl_flat_values_for_ints!(i8, i16, i32, i64, u8, u16, u32);

impl<T> FlatValues for Vec<T>
where
    [T]: FlatValues,
{
    fn flat_values(&self) -> Vec<i64> {
        self.as_slice().flat_values()
    }
}

impl<T, const N: usize> FlatValues for [T; N]
where
    [T]: FlatValues,
{
    fn flat_values(&self) -> Vec<i64> {
        self.as_slice().flat_values()
    }
}
