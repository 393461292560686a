use crate::backend::{
    Activation, LayerKind, ModelBackend, ModelDescription, QuantizedTensorData, TensorData,
};
use crate::emitter::CMacro;
use crate::error::TestGenError;
use crate::quant::{effective_scales, encode_scales};
use crate::serialize::CArrayOptions;
use crate::settings::{GenerateData, KernelTestConfig, KernelTestSettings};
use crate::tensor::{IntType, Tensor, TensorRole};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvKind {
    Conv,
    Depthwise { ch_mult: usize },
}

/// Convolution and depthwise convolution test datasets.
pub struct ConvTestSet {
    settings: KernelTestSettings,
    kind: ConvKind,
}

impl ConvTestSet {
    pub fn conv(config: KernelTestConfig) -> Result<Self, TestGenError> {
        Ok(Self {
            settings: KernelTestSettings::new(config)?,
            kind: ConvKind::Conv,
        })
    }

    /// Depthwise variant; `out_ch` must be a multiple of `in_ch`.
    pub fn depthwise(config: KernelTestConfig) -> Result<Self, TestGenError> {
        if config.in_ch == 0 || config.out_ch % config.in_ch != 0 {
            return Err(TestGenError::invalid_config(format!(
                "depthwise out_ch {} is not a multiple of in_ch {}",
                config.out_ch, config.in_ch
            )));
        }
        let ch_mult = config.out_ch / config.in_ch;
        Ok(Self {
            settings: KernelTestSettings::new(config)?,
            kind: ConvKind::Depthwise { ch_mult },
        })
    }

    pub fn settings(&self) -> &KernelTestSettings {
        &self.settings
    }

    pub fn kind(&self) -> ConvKind {
        self.kind
    }

    /// Filter layout as the float model declares it (HWIO, or HWCM for depthwise).
    pub fn weight_shape(&self) -> Vec<usize> {
        let config = self.settings.config();
        let last = match self.kind {
            ConvKind::Conv => config.out_ch,
            ConvKind::Depthwise { ch_mult } => ch_mult,
        };
        vec![config.w_y, config.w_x, config.in_ch, last]
    }

    fn model_description(&self, weights: &Tensor, biases: Option<&Tensor>) -> ModelDescription {
        let config = self.settings.config();
        let layer = match self.kind {
            ConvKind::Conv => LayerKind::Conv2d {
                out_ch: config.out_ch,
            },
            ConvKind::Depthwise { ch_mult } => LayerKind::DepthwiseConv2d {
                depth_multiplier: ch_mult,
            },
        };
        ModelDescription {
            layer,
            input_shape: self.settings.input_shape(),
            filter: [config.w_x, config.w_y],
            strides: [config.stride_x, config.stride_y],
            dilation: [config.dilation_x, config.dilation_y],
            padding: self.settings.pad_mode(),
            activation: if config.relu6 {
                Activation::Relu6
            } else {
                Activation::None
            },
            weights: Some(TensorData::from(weights)),
            biases: biases.map(TensorData::from),
            int16xint8: config.int16xint8,
        }
    }

    fn per_channel_scales(&self, weights: &QuantizedTensorData) -> Result<Vec<f64>, TestGenError> {
        let out_ch = self.settings.config().out_ch;
        match weights.scales.len() {
            1 => Ok(vec![weights.scales[0]; out_ch]),
            n if n == out_ch => Ok(weights.scales.clone()),
            n => Err(TestGenError::Backend(format!(
                "expected 1 or {} weight scales, got {}",
                out_ch, n
            ))),
        }
    }

    fn config_macros(&self, input_zero_point: i64, output_zero_point: i64) -> Vec<CMacro> {
        let config = self.settings.config();
        let mut macros = self.settings.common_config_macros();
        macros.push(CMacro::new("INPUT_OFFSET", -input_zero_point));
        macros.push(CMacro::new("OUTPUT_OFFSET", output_zero_point));
        macros.push(CMacro::new("DILATION_X", config.dilation_x));
        macros.push(CMacro::new("DILATION_Y", config.dilation_y));
        if let ConvKind::Depthwise { ch_mult } = self.kind {
            macros.push(CMacro::new("CH_MULT", ch_mult));
        }
        macros
    }
}

impl GenerateData for ConvTestSet {
    fn generate_data(
        &mut self,
        backend: &dyn ModelBackend,
        input: Option<Tensor>,
        weights: Option<Tensor>,
        biases: Option<Tensor>,
    ) -> Result<PathBuf, TestGenError> {
        let dataset = self.settings.config().dataset.clone();
        info!("Generating {:?} test data for {}", self.kind, dataset);

        let input = self.settings.randomized_input_data(input, None)?;
        let weight_shape = self.weight_shape();
        let weights = self.settings.randomized_weight_data(&weight_shape, weights)?;
        let biases = if self.settings.config().generate_bias {
            Some(self.settings.randomized_bias_data(biases)?)
        } else {
            None
        };

        let model = self.model_description(&weights, biases.as_ref());
        let result = self
            .settings
            .convert_and_interpret(backend, &model, &input, None)?;

        let quantized_weights = result
            .weights
            .as_ref()
            .ok_or_else(|| TestGenError::Backend("interpreter returned no weights".to_string()))?;
        let scales = effective_scales(
            result.input_quant.scale,
            &self.per_channel_scales(quantized_weights)?,
            result.output_quant.scale,
        );
        let (multipliers, shifts) = encode_scales(&scales)?;

        let activation = self.settings.activation_type();
        let activation_array = CArrayOptions::typed(activation.c_type());
        let int32_array = CArrayOptions::typed(IntType::Int32.c_type());

        let mut session = self.settings.open_session(backend)?;
        let macros = self.config_macros(
            result.input_quant.zero_point,
            result.output_quant.zero_point,
        );
        self.settings
            .write_c_config_header(&mut session, true, &macros)?;

        self.settings.generate_c_array(
            &mut session,
            TensorRole::Input.data_file_prefix(),
            &result.input.values,
            &activation_array,
        )?;
        self.settings.generate_c_array(
            &mut session,
            TensorRole::Weight.data_file_prefix(),
            &quantized_weights.values,
            &CArrayOptions::typed(IntType::Int8.c_type())
                .packed(self.settings.weight_type() == IntType::Int4),
        )?;
        let bias_values = result
            .biases
            .as_ref()
            .map(|b| b.values.clone())
            .unwrap_or_default();
        self.settings.generate_c_array(
            &mut session,
            TensorRole::Bias.data_file_prefix(),
            &bias_values,
            &CArrayOptions::typed(self.settings.bias_type().c_type()),
        )?;
        self.settings
            .generate_c_array(&mut session, "output_mult", &multipliers, &int32_array)?;
        self.settings
            .generate_c_array(&mut session, "output_shift", &shifts, &int32_array)?;
        self.settings.generate_c_array(
            &mut session,
            TensorRole::Output.data_file_prefix(),
            &result.output.values,
            &activation_array,
        )?;

        self.settings.write_c_header_wrapper(&mut session)
    }
}
