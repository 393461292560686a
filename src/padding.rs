use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMode {
    Same,
    Valid,
}

impl PadMode {
    pub fn from_flag(has_padding: bool) -> Self {
        if has_padding {
            PadMode::Same
        } else {
            PadMode::Valid
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PadMode::Same => "SAME",
            PadMode::Valid => "VALID",
        }
    }
}

/// Kernel footprint along one spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisGeometry {
    pub filter: usize,
    pub stride: usize,
    pub dilation: usize,
}

impl AxisGeometry {
    pub const fn new(filter: usize, stride: usize, dilation: usize) -> Self {
        Self {
            filter,
            stride,
            dilation,
        }
    }

    pub fn effective_filter(&self) -> usize {
        (self.filter.saturating_sub(1)) * self.dilation + 1
    }
}

/// Padding before the data along one axis. `pad_with_offset` carries the extra
/// row or column when the total padding is odd.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisPadding {
    pub pad: usize,
    pub pad_with_offset: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Padding2d {
    pub x: AxisPadding,
    pub y: AxisPadding,
}

/// TensorFlow padding rule for one axis.
pub fn compute_axis_padding(
    output_extent: usize,
    input_extent: usize,
    geometry: AxisGeometry,
    mode: PadMode,
) -> AxisPadding {
    if mode == PadMode::Valid {
        return AxisPadding::default();
    }

    let covered = output_extent.saturating_sub(1) * geometry.stride + geometry.effective_filter();
    let needed = covered.saturating_sub(input_extent);
    let pad = needed / 2;
    AxisPadding {
        pad,
        pad_with_offset: pad + needed % 2,
    }
}

pub fn compute_padding(
    output: (usize, usize),
    input: (usize, usize),
    x: AxisGeometry,
    y: AxisGeometry,
    mode: PadMode,
) -> Padding2d {
    Padding2d {
        x: compute_axis_padding(output.0, input.0, x, mode),
        y: compute_axis_padding(output.1, input.1, y, mode),
    }
}

/// Output extent a TensorFlow convolution or pooling layer produces.
pub fn output_extent(input_extent: usize, geometry: AxisGeometry, mode: PadMode) -> usize {
    let stride = geometry.stride.max(1);
    match mode {
        PadMode::Same => input_extent.div_ceil(stride),
        PadMode::Valid => {
            let span = (input_extent + 1).saturating_sub(geometry.effective_filter());
            span.div_ceil(stride)
        }
    }
}
