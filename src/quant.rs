use crate::error::TestGenError;
use crate::tensor::{IntType, Tensor};
use serde::{Deserialize, Serialize};

const Q31_ONE: f64 = 2147483648.0;

/// Real scale expressed as `significand / 2^31 * 2^shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedScale {
    pub significand: i32,
    pub shift: i32,
}

impl QuantizedScale {
    pub fn to_f64(self) -> f64 {
        self.significand as f64 / Q31_ONE * 2f64.powi(self.shift)
    }
}

/// IEEE-754 decomposition `x = m * 2^e` with `0.5 <= |m| < 1`, or `(x, 0)` for zero
/// and non-finite input.
pub fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }

    let bits = x.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        let (m, e) = frexp(x * 2f64.powi(64));
        return (m, e - 64);
    }

    let mantissa_bits = (bits & !(0x7ffu64 << 52)) | (1022u64 << 52);
    (f64::from_bits(mantissa_bits), biased - 1022)
}

/// Encodes `scale` as a Q31 significand and power of two shift.
///
/// The scaled mantissa is rounded half to even. A mantissa that rounds up to
/// `2^31` saturates by halving the significand and incrementing the shift, so the
/// result always fits an `int32_t` and stays normalized.
pub fn encode_scale(scale: f64) -> Result<QuantizedScale, TestGenError> {
    if !scale.is_finite() {
        return Err(TestGenError::invalid_config(format!(
            "cannot encode non-finite scale {}",
            scale
        )));
    }

    let (mantissa, mut shift) = frexp(scale);
    let mut significand = (mantissa * Q31_ONE).round_ties_even() as i64;
    if significand.abs() == 1i64 << 31 {
        significand /= 2;
        shift += 1;
    }

    Ok(QuantizedScale {
        significand: significand as i32,
        shift,
    })
}

/// Per-channel multipliers and shifts as two parallel arrays.
pub fn encode_scales(scales: &[f64]) -> Result<(Vec<i32>, Vec<i32>), TestGenError> {
    let mut multipliers = Vec::with_capacity(scales.len());
    let mut shifts = Vec::with_capacity(scales.len());
    for &scale in scales {
        let encoded = encode_scale(scale)?;
        multipliers.push(encoded.significand);
        shifts.push(encoded.shift);
    }
    Ok((multipliers, shifts))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f64,
    pub zero_point: i64,
}

impl QuantParams {
    pub fn new(scale: f64, zero_point: i64) -> Self {
        Self { scale, zero_point }
    }

    /// Rounds half away from zero, as the TFLite reference kernels do.
    pub fn quantize(&self, value: f32, int_type: IntType) -> i64 {
        let scaled = (value as f64 / self.scale).round() as i64;
        int_type.clamp(scaled.saturating_add(self.zero_point))
    }

    pub fn dequantize(&self, value: i64) -> f32 {
        ((value - self.zero_point) as f64 * self.scale) as f32
    }
}

pub fn quantize_tensor(
    tensor: &Tensor,
    params: QuantParams,
    int_type: IntType,
) -> Result<Vec<i64>, TestGenError> {
    if !(params.scale.is_finite() && params.scale > 0.0) {
        return Err(TestGenError::invalid_config(format!(
            "quantization scale must be positive, got {}",
            params.scale
        )));
    }
    Ok(tensor
        .data()
        .iter()
        .map(|&value| params.quantize(value, int_type))
        .collect())
}

/// Effective requantization scale of a layer with per-channel weight scales.
pub fn effective_scales(input_scale: f64, weight_scales: &[f64], output_scale: f64) -> Vec<f64> {
    weight_scales
        .iter()
        .map(|weight_scale| input_scale * weight_scale / output_scale)
        .collect()
}
