use crate::emitter::BackendInfo;
use crate::error::TestGenError;
use crate::padding::PadMode;
use crate::quant::QuantParams;
use crate::tensor::{IntType, Tensor};
use crate::toolchain::ExternalCommand;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Interpreter used to produce reference outputs. Chosen once, at configuration
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterKind {
    Tensorflow,
    TfliteRuntime,
    TfliteMicro,
}

impl InterpreterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InterpreterKind::Tensorflow => "tensorflow",
            InterpreterKind::TfliteRuntime => "tflite_runtime",
            InterpreterKind::TfliteMicro => "tflite_micro",
        }
    }
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterpreterKind {
    type Err = TestGenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tensorflow" => Ok(InterpreterKind::Tensorflow),
            "tflite_runtime" => Ok(InterpreterKind::TfliteRuntime),
            "tflite_micro" => Ok(InterpreterKind::TfliteMicro),
            other => Err(TestGenError::invalid_config(format!(
                "Invalid interpreter {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl From<&Tensor> for TensorData {
    fn from(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayerKind {
    Conv2d { out_ch: usize },
    DepthwiseConv2d { depth_multiplier: usize },
    AveragePool2d,
    MaxPool2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    None,
    Relu6,
}

/// Single-layer float model handed to the converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub layer: LayerKind,
    pub input_shape: Vec<usize>,
    pub filter: [usize; 2],
    pub strides: [usize; 2],
    pub dilation: [usize; 2],
    pub padding: PadMode,
    pub activation: Activation,
    pub weights: Option<TensorData>,
    pub biases: Option<TensorData>,
    /// int16 activations with int8 weights.
    pub int16xint8: bool,
}

/// Calibration samples for the converter: one sample set of `n_inputs` tensors of
/// ones. Iterating again restarts the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentativeDataset {
    n_inputs: usize,
    shape: Vec<usize>,
}

impl RepresentativeDataset {
    pub fn new(n_inputs: usize, shape: Vec<usize>) -> Result<Self, TestGenError> {
        if n_inputs == 0 {
            return Err(TestGenError::invalid_config(format!(
                "Invalid number of representative test sets: {}. Must be more than 0",
                n_inputs
            )));
        }
        Ok(Self { n_inputs, shape })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn samples(&self) -> impl Iterator<Item = Vec<Tensor>> + '_ {
        std::iter::once(()).map(move |_| {
            (0..self.n_inputs)
                .map(|_| Tensor::ones(self.shape.clone()))
                .collect()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedModel {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedTensorData {
    pub shape: Vec<usize>,
    pub values: Vec<i64>,
    /// One scale per output channel for per-channel quantized tensors.
    #[serde(default)]
    pub scales: Vec<f64>,
}

/// Reference result of one interpreter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterOutput {
    pub output: QuantizedTensorData,
    pub input_quant: QuantParams,
    pub output_quant: QuantParams,
    /// The quantized input as it was fed to the interpreter.
    pub input: QuantizedTensorData,
    #[serde(default)]
    pub weights: Option<QuantizedTensorData>,
    #[serde(default)]
    pub biases: Option<QuantizedTensorData>,
}

/// Conversion and reference execution of a single-layer model.
pub trait ModelBackend {
    fn info(&self) -> BackendInfo;

    fn compile_and_quantize(
        &self,
        model: &ModelDescription,
        int_type: IntType,
        dataset: &RepresentativeDataset,
        out_path: &Path,
    ) -> Result<QuantizedModel, TestGenError>;

    fn load_and_run(
        &self,
        model: &QuantizedModel,
        input: &Tensor,
        int_type: IntType,
    ) -> Result<InterpreterOutput, TestGenError>;
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    framework: String,
    framework_version: String,
    interpreter_version: String,
    #[serde(default)]
    revision: Option<String>,
}

#[derive(Serialize)]
struct ConvertRequest<'a> {
    model: &'a ModelDescription,
    int_type: IntType,
    representative_dataset: Vec<Vec<TensorData>>,
}

#[derive(Serialize)]
struct RunRequest {
    interpreter: InterpreterKind,
    op_resolver: &'static str,
    int_type: IntType,
    input: TensorData,
}

/// Converter and interpreter driven through an external command speaking JSON.
///
/// The command receives a subcommand (`version`, `convert`, `run`) followed by
/// request/response file paths.
pub struct ExternalBackend {
    kind: InterpreterKind,
    command: ExternalCommand,
    info: BackendInfo,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TestGenError> {
    let text = serde_json::to_string(value)?;
    fs::write(path, text).map_err(|err| TestGenError::io(path, err))
}

impl ExternalBackend {
    /// Queries the command for framework versions.
    pub fn probe(kind: InterpreterKind, command: ExternalCommand) -> Result<Self, TestGenError> {
        let output = command.capture(&[
            "version".to_string(),
            "--interpreter".to_string(),
            kind.to_string(),
        ])?;
        let version: VersionResponse = serde_json::from_slice(&output.stdout)?;
        let info = BackendInfo {
            framework: version.framework,
            framework_version: version.framework_version,
            interpreter: kind.to_string(),
            interpreter_version: version.interpreter_version,
            revision: version.revision,
        };
        Ok(Self::with_info(kind, command, info))
    }

    pub fn with_info(kind: InterpreterKind, command: ExternalCommand, info: BackendInfo) -> Self {
        Self {
            kind,
            command,
            info,
        }
    }

    pub fn kind(&self) -> InterpreterKind {
        self.kind
    }
}

impl ModelBackend for ExternalBackend {
    fn info(&self) -> BackendInfo {
        self.info.clone()
    }

    fn compile_and_quantize(
        &self,
        model: &ModelDescription,
        int_type: IntType,
        dataset: &RepresentativeDataset,
        out_path: &Path,
    ) -> Result<QuantizedModel, TestGenError> {
        if let Some(dir) = out_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| TestGenError::io(dir, err))?;
        }

        let request_path = out_path.with_extension("convert.json");
        let request = ConvertRequest {
            model,
            int_type,
            representative_dataset: dataset
                .samples()
                .map(|set| set.iter().map(TensorData::from).collect())
                .collect(),
        };
        write_json(&request_path, &request)?;

        info!("Converting model to {}", out_path.display());
        self.command.run(&[
            "convert".to_string(),
            "--request".to_string(),
            path_arg(&request_path),
            "--output".to_string(),
            path_arg(out_path),
        ])?;

        if !out_path.exists() {
            return Err(TestGenError::Backend(format!(
                "converter reported success but {} is missing",
                out_path.display()
            )));
        }
        Ok(QuantizedModel {
            path: out_path.to_path_buf(),
        })
    }

    fn load_and_run(
        &self,
        model: &QuantizedModel,
        input: &Tensor,
        int_type: IntType,
    ) -> Result<InterpreterOutput, TestGenError> {
        let request_path = model.path.with_extension("run.json");
        let response_path = model.path.with_extension("output.json");
        write_json(
            &request_path,
            &RunRequest {
                interpreter: self.kind,
                op_resolver: "builtin_ref",
                int_type,
                input: TensorData::from(input),
            },
        )?;

        info!(
            "Running {} interpreter on {}",
            self.kind,
            model.path.display()
        );
        self.command.run(&[
            "run".to_string(),
            "--model".to_string(),
            path_arg(&model.path),
            "--request".to_string(),
            path_arg(&request_path),
            "--output".to_string(),
            path_arg(&response_path),
        ])?;

        let text =
            fs::read_to_string(&response_path).map_err(|err| TestGenError::io(&response_path, err))?;
        Ok(serde_json::from_str(&text)?)
    }
}
