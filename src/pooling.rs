use crate::backend::{Activation, LayerKind, ModelBackend, ModelDescription};
use crate::emitter::CMacro;
use crate::error::TestGenError;
use crate::serialize::CArrayOptions;
use crate::settings::{GenerateData, KernelTestConfig, KernelTestSettings};
use crate::tensor::{Tensor, TensorRole};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingKind {
    Average,
    Max,
}

/// Average and max pooling test datasets. Pooling keeps the channel count and
/// carries no weights or biases.
pub struct PoolingTestSet {
    settings: KernelTestSettings,
    kind: PoolingKind,
}

impl PoolingTestSet {
    pub fn new(mut config: KernelTestConfig, kind: PoolingKind) -> Result<Self, TestGenError> {
        config.out_ch = config.in_ch;
        config.generate_bias = false;
        Ok(Self {
            settings: KernelTestSettings::new(config)?,
            kind,
        })
    }

    pub fn average(config: KernelTestConfig) -> Result<Self, TestGenError> {
        Self::new(config, PoolingKind::Average)
    }

    pub fn max(config: KernelTestConfig) -> Result<Self, TestGenError> {
        Self::new(config, PoolingKind::Max)
    }

    pub fn settings(&self) -> &KernelTestSettings {
        &self.settings
    }

    pub fn kind(&self) -> PoolingKind {
        self.kind
    }

    fn model_description(&self) -> ModelDescription {
        let config = self.settings.config();
        ModelDescription {
            layer: match self.kind {
                PoolingKind::Average => LayerKind::AveragePool2d,
                PoolingKind::Max => LayerKind::MaxPool2d,
            },
            input_shape: self.settings.input_shape(),
            filter: [config.w_x, config.w_y],
            strides: [config.stride_x, config.stride_y],
            dilation: [1, 1],
            padding: self.settings.pad_mode(),
            activation: if config.relu6 {
                Activation::Relu6
            } else {
                Activation::None
            },
            weights: None,
            biases: None,
            int16xint8: config.int16xint8,
        }
    }
}

impl GenerateData for PoolingTestSet {
    fn generate_data(
        &mut self,
        backend: &dyn ModelBackend,
        input: Option<Tensor>,
        weights: Option<Tensor>,
        biases: Option<Tensor>,
    ) -> Result<PathBuf, TestGenError> {
        let dataset = self.settings.config().dataset.clone();
        info!("Generating {:?} pooling test data for {}", self.kind, dataset);
        if weights.is_some() || biases.is_some() {
            warn!("Pooling dataset {} ignores explicit weights and biases", dataset);
        }

        let input = self.settings.randomized_input_data(input, None)?;
        let model = self.model_description();
        let result = self
            .settings
            .convert_and_interpret(backend, &model, &input, None)?;

        let activation_array = CArrayOptions::typed(self.settings.activation_type().c_type());
        let mut session = self.settings.open_session(backend)?;
        let mut macros = self.settings.common_config_macros();
        if self.kind == PoolingKind::Average {
            macros.push(CMacro::new("OUTPUT_OFFSET", result.output_quant.zero_point));
        }
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
            TensorRole::Output.data_file_prefix(),
            &result.output.values,
            &activation_array,
        )?;

        self.settings.write_c_header_wrapper(&mut session)
    }
}
