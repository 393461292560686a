use crate::backend::{
    InterpreterKind, InterpreterOutput, ModelBackend, ModelDescription, RepresentativeDataset,
};
use crate::cache::DataCache;
use crate::emitter::{
    common_config_macros, tensor_config_macros, version_banner, write_config_header,
    write_data_header, write_umbrella_header, CMacro, GenerationSession, KernelGeometry,
    TensorGeometry,
};
use crate::error::TestGenError;
use crate::model_json::{BufferPatch, JsonModelTemplate};
use crate::padding::{compute_padding, output_extent, AxisGeometry, PadMode, Padding2d};
use crate::serialize::CArrayOptions;
use crate::tensor::{FlatValues, IntType, Tensor, TensorRole, ValueDomain};
use crate::toolchain::{SchemaCompiler, SourceFormatter, DEFAULT_FORMATTER, DEFAULT_SCHEMA_COMPILER};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTDIR: &str = "TestCases/TestData/";
pub const DEFAULT_PREGEN_DIR: &str = "PregeneratedData/";

/// Parameters of one generated test dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelTestConfig {
    pub dataset: String,
    pub regenerate_weights: bool,
    pub regenerate_input: bool,
    pub regenerate_biases: bool,
    pub schema_file: Option<PathBuf>,
    pub in_ch: usize,
    pub out_ch: usize,
    pub x_in: usize,
    pub y_in: usize,
    pub w_x: usize,
    pub w_y: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub dilation_x: usize,
    pub dilation_y: usize,
    pub pad: bool,
    pub randmin: f64,
    pub randmax: f64,
    pub bias_min: f64,
    pub bias_max: f64,
    pub batches: usize,
    pub generate_bias: bool,
    pub relu6: bool,
    pub out_activation_min: Option<i64>,
    pub out_activation_max: Option<i64>,
    pub int16xint8: bool,
    pub int4_weights: bool,
    pub interpreter: InterpreterKind,
    pub outdir: PathBuf,
    pub pregen_dir: PathBuf,
    pub formatter: String,
    pub schema_compiler: String,
    pub seed: Option<u64>,
}

impl Default for KernelTestConfig {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            regenerate_weights: false,
            regenerate_input: false,
            regenerate_biases: false,
            schema_file: None,
            in_ch: 1,
            out_ch: 1,
            x_in: 1,
            y_in: 1,
            w_x: 1,
            w_y: 1,
            stride_x: 1,
            stride_y: 1,
            dilation_x: 1,
            dilation_y: 1,
            pad: false,
            randmin: IntType::Int8.min() as f64,
            randmax: IntType::Int8.max() as f64,
            bias_min: IntType::Int32.min() as f64,
            bias_max: IntType::Int32.max() as f64,
            batches: 1,
            generate_bias: true,
            relu6: false,
            out_activation_min: None,
            out_activation_max: None,
            int16xint8: false,
            int4_weights: false,
            interpreter: InterpreterKind::Tensorflow,
            outdir: PathBuf::from(DEFAULT_OUTDIR),
            pregen_dir: PathBuf::from(DEFAULT_PREGEN_DIR),
            formatter: DEFAULT_FORMATTER.to_string(),
            schema_compiler: DEFAULT_SCHEMA_COMPILER.to_string(),
            seed: None,
        }
    }
}

impl KernelTestConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, TestGenError> {
        let text = fs::read_to_string(path).map_err(|err| TestGenError::io(path, err))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn set_regenerate_all(&mut self, regenerate: bool) {
        self.regenerate_weights = regenerate;
        self.regenerate_input = regenerate;
        self.regenerate_biases = regenerate;
    }

    fn validate(&self) -> Result<(), TestGenError> {
        if self.dataset.is_empty() {
            return Err(TestGenError::invalid_config("dataset name must not be empty"));
        }
        if self
            .dataset
            .chars()
            .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '_'))
        {
            return Err(TestGenError::invalid_config(format!(
                "dataset name {:?} is not a valid C identifier fragment",
                self.dataset
            )));
        }
        let positive = [
            ("in_ch", self.in_ch),
            ("out_ch", self.out_ch),
            ("x_in", self.x_in),
            ("y_in", self.y_in),
            ("w_x", self.w_x),
            ("w_y", self.w_y),
            ("stride_x", self.stride_x),
            ("stride_y", self.stride_y),
            ("dilation_x", self.dilation_x),
            ("dilation_y", self.dilation_y),
            ("batches", self.batches),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(TestGenError::invalid_config(format!(
                    "{} must be >= 1",
                    name
                )));
            }
        }
        ValueDomain::new(self.randmin, self.randmax).validate()?;
        if self.generate_bias {
            ValueDomain::new(self.bias_min, self.bias_max).validate()?;
        }
        if self.int4_weights && self.int16xint8 {
            return Err(TestGenError::invalid_config(
                "int4 weights are only supported with int8 activations",
            ));
        }
        Ok(())
    }
}

/// Validated dataset configuration plus everything derived from it.
pub struct KernelTestSettings {
    config: KernelTestConfig,
    pad_mode: PadMode,
    out_activation_min: i64,
    out_activation_max: i64,
    headers_dir: PathBuf,
    pregenerated_dir: PathBuf,
    model_path: PathBuf,
    cache: DataCache,
    schema_compiler: SchemaCompiler,
}

impl KernelTestSettings {
    pub fn new(config: KernelTestConfig) -> Result<Self, TestGenError> {
        config.validate()?;

        let activation_type = if config.int16xint8 {
            IntType::Int16
        } else {
            IntType::Int8
        };
        let (out_activation_min, out_activation_max) = if config.relu6 {
            (0, 6)
        } else {
            (
                config.out_activation_min.unwrap_or(activation_type.min()),
                config.out_activation_max.unwrap_or(activation_type.max()),
            )
        };
        if out_activation_min > out_activation_max {
            return Err(TestGenError::invalid_config(format!(
                "activation range [{}, {}] is empty",
                out_activation_min, out_activation_max
            )));
        }

        let headers_dir = config.outdir.join(&config.dataset);
        fs::create_dir_all(&headers_dir).map_err(|err| TestGenError::io(&headers_dir, err))?;
        let pregenerated_dir = config.pregen_dir.join(&config.dataset);
        let model_path = headers_dir.join(format!("model_{}", config.dataset));
        let schema_compiler = SchemaCompiler::new(&config.schema_compiler)?;

        Ok(Self {
            pad_mode: PadMode::from_flag(config.pad),
            out_activation_min,
            out_activation_max,
            headers_dir,
            pregenerated_dir,
            model_path,
            cache: DataCache::with_seed(config.seed),
            schema_compiler,
            config,
        })
    }

    pub fn config(&self) -> &KernelTestConfig {
        &self.config
    }

    pub fn pad_mode(&self) -> PadMode {
        self.pad_mode
    }

    pub fn activation_range(&self) -> (i64, i64) {
        (self.out_activation_min, self.out_activation_max)
    }

    /// Integer type of activations, int16 for the int16xint8 kernels.
    pub fn activation_type(&self) -> IntType {
        if self.config.int16xint8 {
            IntType::Int16
        } else {
            IntType::Int8
        }
    }

    /// Integer type of the generated bias array.
    pub fn bias_type(&self) -> IntType {
        if self.config.int16xint8 {
            IntType::Int64
        } else {
            IntType::Int32
        }
    }

    pub fn weight_type(&self) -> IntType {
        if self.config.int4_weights {
            IntType::Int4
        } else {
            IntType::Int8
        }
    }

    pub fn headers_dir(&self) -> &Path {
        &self.headers_dir
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn tflite_model_path(&self) -> PathBuf {
        self.model_path.with_extension("tflite")
    }

    pub fn table_path(&self, role: TensorRole) -> Option<PathBuf> {
        role.table_file_name()
            .map(|file| self.pregenerated_dir.join(file))
    }

    pub fn axis_geometry(&self) -> (AxisGeometry, AxisGeometry) {
        (
            AxisGeometry::new(self.config.w_x, self.config.stride_x, self.config.dilation_x),
            AxisGeometry::new(self.config.w_y, self.config.stride_y, self.config.dilation_y),
        )
    }

    /// Output width and height for the configured padding mode.
    pub fn output_extents(&self) -> (usize, usize) {
        let (x, y) = self.axis_geometry();
        (
            output_extent(self.config.x_in, x, self.pad_mode),
            output_extent(self.config.y_in, y, self.pad_mode),
        )
    }

    pub fn calculate_padding(&self, x_output: usize, y_output: usize) -> Padding2d {
        let (x, y) = self.axis_geometry();
        compute_padding(
            (x_output, y_output),
            (self.config.x_in, self.config.y_in),
            x,
            y,
            self.pad_mode,
        )
    }

    pub fn kernel_geometry(&self) -> KernelGeometry {
        let (output_w, output_h) = self.output_extents();
        KernelGeometry {
            filter_x: self.config.w_x,
            filter_y: self.config.w_y,
            stride_x: self.config.stride_x,
            stride_y: self.config.stride_y,
            padding: self.calculate_padding(output_w, output_h),
            output_w,
            output_h,
        }
    }

    pub fn tensor_geometry(&self) -> TensorGeometry {
        let (output_w, output_h) = self.output_extents();
        TensorGeometry {
            in_ch: self.config.in_ch,
            out_ch: self.config.out_ch,
            input_w: self.config.x_in,
            input_h: self.config.y_in,
            output_w,
            output_h,
            batches: self.config.batches,
            activation_min: self.out_activation_min,
            activation_max: self.out_activation_max,
        }
    }

    pub fn input_shape(&self) -> Vec<usize> {
        vec![
            self.config.batches,
            self.config.y_in,
            self.config.x_in,
            self.config.in_ch,
        ]
    }

    pub fn input_domain(&self) -> ValueDomain {
        ValueDomain::new(self.config.randmin, self.config.randmax)
    }

    /// Int4 weights are drawn from the nibble range regardless of `randmin`/`randmax`.
    pub fn weight_domain(&self) -> ValueDomain {
        if self.config.int4_weights {
            ValueDomain::new(IntType::Int4.min() as f64, IntType::Int4.max() as f64 + 1.0)
        } else {
            self.input_domain()
        }
    }

    pub fn bias_domain(&self) -> ValueDomain {
        ValueDomain::new(self.config.bias_min, self.config.bias_max)
    }

    fn cached(
        &mut self,
        role: TensorRole,
        shape: &[usize],
        regenerate: bool,
        domain: ValueDomain,
        explicit: Option<Tensor>,
    ) -> Result<Tensor, TestGenError> {
        let path = self.table_path(role).ok_or_else(|| {
            TestGenError::invalid_config(format!("{:?} tensors are never cached", role))
        })?;
        self.cache
            .get_or_generate(shape, &path, regenerate, domain, 0, explicit)
    }

    pub fn randomized_input_data(
        &mut self,
        explicit: Option<Tensor>,
        shape: Option<Vec<usize>>,
    ) -> Result<Tensor, TestGenError> {
        let shape = shape.unwrap_or_else(|| self.input_shape());
        let regenerate = self.config.regenerate_input;
        let domain = self.input_domain();
        self.cached(TensorRole::Input, &shape, regenerate, domain, explicit)
    }

    pub fn randomized_weight_data(
        &mut self,
        shape: &[usize],
        explicit: Option<Tensor>,
    ) -> Result<Tensor, TestGenError> {
        let regenerate = self.config.regenerate_weights;
        let domain = self.weight_domain();
        self.cached(TensorRole::Weight, shape, regenerate, domain, explicit)
    }

    /// Biases of length `out_ch`; all zero when bias generation is disabled.
    pub fn randomized_bias_data(&mut self, explicit: Option<Tensor>) -> Result<Tensor, TestGenError> {
        let shape = [self.config.out_ch];
        if !self.config.generate_bias {
            return Ok(Tensor::zeros(shape.to_vec()));
        }
        let regenerate = self.config.regenerate_biases;
        let domain = self.bias_domain();
        self.cached(TensorRole::Bias, &shape, regenerate, domain, explicit)
    }

    /// Opens the emission session for this dataset with the backend's banner.
    pub fn open_session(&self, backend: &dyn ModelBackend) -> Result<GenerationSession, TestGenError> {
        let formatter = SourceFormatter::new(&self.config.formatter)?;
        GenerationSession::new(
            &self.config.dataset,
            &self.headers_dir,
            version_banner(&backend.info()),
            formatter,
        )
    }

    /// Converts the model and runs it once on `input`.
    pub fn convert_and_interpret(
        &self,
        backend: &dyn ModelBackend,
        model: &ModelDescription,
        input: &Tensor,
        dataset_shape: Option<Vec<usize>>,
    ) -> Result<InterpreterOutput, TestGenError> {
        let shape = dataset_shape.unwrap_or_else(|| self.input_shape());
        let dataset = RepresentativeDataset::new(1, shape)?;
        let int_type = self.activation_type();
        let quantized =
            backend.compile_and_quantize(model, int_type, &dataset, &self.tflite_model_path())?;
        backend.load_and_run(&quantized, input, int_type)
    }

    /// Renders a JSON model from `template` and compiles it with the schema
    /// compiler into `model_<dataset>.tflite`.
    pub fn generate_model_from_template(
        &self,
        template: &JsonModelTemplate,
        replacements: &[(String, String)],
        patches: &[BufferPatch],
    ) -> Result<PathBuf, TestGenError> {
        let schema = self.config.schema_file.as_deref().ok_or_else(|| {
            TestGenError::invalid_config("A schema file is required.")
        })?;
        if !schema.is_file() {
            return Err(TestGenError::invalid_config(format!(
                "schema file {} does not exist",
                schema.display()
            )));
        }
        let json_path = self.model_path.with_extension("json");
        template.generate(replacements, patches, &json_path)?;
        Ok(self
            .schema_compiler
            .compile(&json_path, Some(schema), &self.headers_dir, "tflite")?)
    }

    pub fn common_config_macros(&self) -> Vec<CMacro> {
        common_config_macros(&self.kernel_geometry())
    }

    /// Writes `config_data.h`: shared kernel geometry, then the tensor geometry when
    /// `write_common_parameters` is set, then `extra` dataset specific macros.
    pub fn write_c_config_header(
        &self,
        session: &mut GenerationSession,
        write_common_parameters: bool,
        extra: &[CMacro],
    ) -> Result<PathBuf, TestGenError> {
        let mut macros = Vec::new();
        if write_common_parameters {
            macros.extend(tensor_config_macros(&self.tensor_geometry()));
        }
        macros.extend_from_slice(extra);
        write_config_header(session, &macros)
    }

    pub fn generate_c_array<V: FlatValues + ?Sized>(
        &self,
        session: &mut GenerationSession,
        name: &str,
        values: &V,
        options: &CArrayOptions,
    ) -> Result<PathBuf, TestGenError> {
        write_data_header(session, name, &values.flat_values(), options)
    }

    pub fn write_c_header_wrapper(
        &self,
        session: &mut GenerationSession,
    ) -> Result<PathBuf, TestGenError> {
        write_umbrella_header(session)
    }
}

/// Test dataset generator for one kernel family.
pub trait GenerateData {
    fn generate_data(
        &mut self,
        backend: &dyn ModelBackend,
        input: Option<Tensor>,
        weights: Option<Tensor>,
        biases: Option<Tensor>,
    ) -> Result<PathBuf, TestGenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> KernelTestConfig {
        KernelTestConfig {
            dataset: "basic".to_string(),
            in_ch: 2,
            out_ch: 3,
            x_in: 5,
            y_in: 5,
            w_x: 3,
            w_y: 3,
            pad: true,
            outdir: dir.join("out"),
            pregen_dir: dir.join("pregen"),
            formatter: "true".to_string(),
            seed: Some(5),
            ..KernelTestConfig::default()
        }
    }

    #[test]
    fn defaults_follow_int8_kernels() {
        let config = KernelTestConfig::default();
        assert_eq!(config.randmin, -128.0);
        assert_eq!(config.randmax, 127.0);
        assert_eq!(config.bias_min, i32::MIN as f64);
        assert_eq!(config.formatter, "clang-format-12 -i");
        assert_eq!(config.outdir, PathBuf::from("TestCases/TestData/"));
    }

    #[test]
    fn config_loads_from_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conv.json");
        fs::write(
            &path,
            r#"{"dataset": "conv_2", "in_ch": 4, "pad": true, "interpreter": "tflite_micro"}"#,
        )
        .unwrap();
        let config = KernelTestConfig::from_json_file(&path).unwrap();
        assert_eq!(config.dataset, "conv_2");
        assert_eq!(config.in_ch, 4);
        assert!(config.pad);
        assert_eq!(config.interpreter, InterpreterKind::TfliteMicro);
        assert_eq!(config.stride_x, 1);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config(dir.path());
        bad.stride_x = 0;
        assert!(matches!(
            KernelTestSettings::new(bad),
            Err(TestGenError::InvalidConfig(_))
        ));

        let mut bad = config(dir.path());
        bad.dataset = "conv-1".to_string();
        assert!(KernelTestSettings::new(bad).is_err());

        let mut bad = config(dir.path());
        bad.randmin = 10.0;
        bad.randmax = 10.0;
        assert!(KernelTestSettings::new(bad).is_err());
    }

    #[test]
    fn activation_bounds_follow_relu6_and_int16() {
        let dir = tempfile::tempdir().unwrap();
        let mut relu = config(dir.path());
        relu.relu6 = true;
        relu.out_activation_min = Some(-100);
        let settings = KernelTestSettings::new(relu).unwrap();
        assert_eq!(settings.activation_range(), (0, 6));

        let mut wide = config(dir.path());
        wide.int16xint8 = true;
        let settings = KernelTestSettings::new(wide).unwrap();
        assert_eq!(settings.activation_range(), (-32768, 32767));
        assert_eq!(settings.bias_type(), IntType::Int64);

        let mut custom = config(dir.path());
        custom.out_activation_max = Some(50);
        let settings = KernelTestSettings::new(custom).unwrap();
        assert_eq!(settings.activation_range(), (-128, 50));
    }

    #[test]
    fn geometry_and_padding_are_derived() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.stride_x = 2;
        let settings = KernelTestSettings::new(cfg).unwrap();
        let geometry = settings.kernel_geometry();
        assert_eq!((geometry.output_w, geometry.output_h), (3, 5));
        assert_eq!(geometry.padding.x.pad, 1);
        assert_eq!(geometry.padding.y.pad, 1);
        assert_eq!(settings.headers_dir(), dir.path().join("out").join("basic"));
        assert!(settings.headers_dir().exists());
    }

    #[test]
    fn disabled_bias_is_all_zero_and_uncached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.generate_bias = false;
        let mut settings = KernelTestSettings::new(cfg).unwrap();
        let biases = settings.randomized_bias_data(None).unwrap();
        assert_eq!(biases.data(), &[0.0, 0.0, 0.0]);
        assert!(!settings.table_path(TensorRole::Bias).unwrap().exists());
    }

    #[test]
    fn input_data_is_cached_under_pregenerated_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = KernelTestSettings::new(config(dir.path())).unwrap();
        let input = settings.randomized_input_data(None, None).unwrap();
        assert_eq!(input.shape(), &[1, 5, 5, 2]);
        let path = dir.path().join("pregen/basic/input.txt");
        assert!(path.exists());

        let again = settings.randomized_input_data(None, None).unwrap();
        assert_eq!(again, input);
    }

    #[test]
    fn template_model_requires_schema() {
        let dir = tempfile::tempdir().unwrap();
        let settings = KernelTestSettings::new(config(dir.path())).unwrap();
        let template = JsonModelTemplate::from_text(r#"{"buffers": []}"#);
        assert!(matches!(
            settings.generate_model_from_template(&template, &[], &[]),
            Err(TestGenError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_schema_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.schema_file = Some(dir.path().join("schema.fbs"));
        let settings = KernelTestSettings::new(cfg).unwrap();
        let template = JsonModelTemplate::from_text(r#"{"buffers": []}"#);
        assert!(matches!(
            settings.generate_model_from_template(&template, &[], &[]),
            Err(TestGenError::InvalidConfig(_))
        ));
        assert!(!settings.model_path().with_extension("json").exists());
    }
}
