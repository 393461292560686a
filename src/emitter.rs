use crate::error::TestGenError;
use crate::padding::Padding2d;
use crate::serialize::{c_array_source, CArrayOptions};
use crate::toolchain::SourceFormatter;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_HEADER_NAME: &str = "config_data.h";
pub const UMBRELLA_HEADER_NAME: &str = "test_data.h";

/// Reference framework and interpreter that produced the expected outputs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendInfo {
    pub framework: String,
    pub framework_version: String,
    pub interpreter: String,
    pub interpreter_version: String,
    pub revision: Option<String>,
}

/// Banner placed at the top of every generated header.
pub fn version_banner(info: &BackendInfo) -> String {
    format!(
        "// Generated by {} version {} using {} version {}.\n\
         // Interpreter from {} version {} and revision {}.\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        info.framework,
        info.framework_version,
        info.interpreter,
        info.interpreter_version,
        info.revision.as_deref().unwrap_or("None")
    )
}

/// State of one test dataset's generation run: where headers go, what has been
/// written so far and how to format it.
pub struct GenerationSession {
    dataset: String,
    headers_dir: PathBuf,
    banner: String,
    formatter: SourceFormatter,
    generated_files: Vec<String>,
}

impl GenerationSession {
    pub fn new(
        dataset: &str,
        headers_dir: impl Into<PathBuf>,
        banner: String,
        formatter: SourceFormatter,
    ) -> Result<Self, TestGenError> {
        if dataset.is_empty() {
            return Err(TestGenError::invalid_config("dataset name must not be empty"));
        }
        let headers_dir = headers_dir.into();
        fs::create_dir_all(&headers_dir).map_err(|err| TestGenError::io(&headers_dir, err))?;
        Ok(Self {
            dataset: dataset.to_string(),
            headers_dir,
            banner,
            formatter,
            generated_files: Vec::new(),
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Macro prefix that keeps datasets apart when headers are combined.
    pub fn prefix(&self) -> String {
        self.dataset.to_uppercase()
    }

    pub fn headers_dir(&self) -> &Path {
        &self.headers_dir
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn generated_files(&self) -> &[String] {
        &self.generated_files
    }

    fn register(&mut self, filename: &str) -> PathBuf {
        self.generated_files.push(filename.to_string());
        self.headers_dir.join(filename)
    }

    fn write_and_format(&self, path: &Path, contents: &str) -> Result<(), TestGenError> {
        fs::write(path, contents).map_err(|err| TestGenError::io(path, err))?;
        self.formatter.format_in_place(path)?;
        Ok(())
    }

    fn common_header(&self) -> String {
        format!("{}#pragma once\n", self.banner)
    }
}

/// One `#define <PREFIX>_<NAME> <value>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMacro {
    pub name: String,
    pub value: String,
}

impl CMacro {
    pub fn new(name: &str, value: impl fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Filter, stride, padding and output geometry shared by conv, depthwise conv
/// and pooling datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelGeometry {
    pub filter_x: usize,
    pub filter_y: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub padding: Padding2d,
    pub output_w: usize,
    pub output_h: usize,
}

pub fn common_config_macros(geometry: &KernelGeometry) -> Vec<CMacro> {
    vec![
        CMacro::new("FILTER_X", geometry.filter_x),
        CMacro::new("FILTER_Y", geometry.filter_y),
        CMacro::new("STRIDE_X", geometry.stride_x),
        CMacro::new("STRIDE_Y", geometry.stride_y),
        CMacro::new("PAD_X", geometry.padding.x.pad),
        CMacro::new("PAD_Y", geometry.padding.y.pad),
        CMacro::new("OUTPUT_W", geometry.output_w),
        CMacro::new("OUTPUT_H", geometry.output_h),
    ]
}

/// Channel counts, extents, buffer sizes, activation bounds and batch count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorGeometry {
    pub in_ch: usize,
    pub out_ch: usize,
    pub input_w: usize,
    pub input_h: usize,
    pub output_w: usize,
    pub output_h: usize,
    pub batches: usize,
    pub activation_min: i64,
    pub activation_max: i64,
}

pub fn tensor_config_macros(geometry: &TensorGeometry) -> Vec<CMacro> {
    vec![
        CMacro::new("OUT_CH", geometry.out_ch),
        CMacro::new("IN_CH", geometry.in_ch),
        CMacro::new("INPUT_W", geometry.input_w),
        CMacro::new("INPUT_H", geometry.input_h),
        CMacro::new(
            "DST_SIZE",
            geometry.output_w * geometry.output_h * geometry.out_ch * geometry.batches,
        ),
        CMacro::new(
            "INPUT_SIZE",
            geometry.input_w * geometry.input_h * geometry.in_ch,
        ),
        CMacro::new("OUT_ACTIVATION_MIN", geometry.activation_min),
        CMacro::new("OUT_ACTIVATION_MAX", geometry.activation_max),
        CMacro::new("INPUT_BATCHES", geometry.batches),
    ]
}

pub fn render_config_header(banner: &str, prefix: &str, macros: &[CMacro]) -> String {
    let mut out = format!("{}#pragma once\n", banner);
    for item in macros {
        out.push_str(&format!("#define {}_{} {}\n", prefix, item.name, item.value));
    }
    out
}

/// Writes `config_data.h` for the session's dataset.
pub fn write_config_header(
    session: &mut GenerationSession,
    macros: &[CMacro],
) -> Result<PathBuf, TestGenError> {
    let path = session.register(CONFIG_HEADER_NAME);
    info!("Writing C header with config data {}...", path.display());
    let contents = render_config_header(&session.banner, &session.prefix(), macros);
    session.write_and_format(&path, &contents)?;
    Ok(path)
}

pub fn data_file_name(name_prefix: &str) -> String {
    format!("{}_data.h", name_prefix)
}

/// Writes `<name>_data.h` declaring `<dataset>_<name>`.
pub fn write_data_header(
    session: &mut GenerationSession,
    name: &str,
    values: &[i64],
    options: &CArrayOptions,
) -> Result<PathBuf, TestGenError> {
    let symbol = format!("{}_{}", session.dataset, name);
    let array = c_array_source(&symbol, values, options)?;

    let filename = data_file_name(name);
    let path = session.register(&filename);
    info!("Generating C header {}...", path.display());

    let mut contents = session.common_header();
    contents.push_str("#include <stdint.h>\n\n");
    contents.push_str(&array);
    session.write_and_format(&path, &contents)?;
    Ok(path)
}

/// Writes `test_data.h` including every header generated so far, most recent
/// first, and empties the session's list.
pub fn write_umbrella_header(session: &mut GenerationSession) -> Result<PathBuf, TestGenError> {
    let path = session.headers_dir.join(UMBRELLA_HEADER_NAME);
    info!("Generating C header wrapper {}...", path.display());

    let mut contents = session.banner.clone();
    while let Some(filename) = session.generated_files.pop() {
        contents.push_str(&format!("#include \"{}\"\n", filename));
    }
    session.write_and_format(&path, &contents)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding::AxisPadding;

    fn session(dir: &Path, formatter: &str) -> GenerationSession {
        GenerationSession::new(
            "conv_1",
            dir.join("conv_1"),
            version_banner(&BackendInfo {
                framework: "tensorflow".to_string(),
                framework_version: "2.16.1".to_string(),
                interpreter: "tensorflow".to_string(),
                interpreter_version: "2.16.1".to_string(),
                revision: Some("v2.16.1-0-g5bc9d26649c".to_string()),
            }),
            SourceFormatter::new(formatter).unwrap(),
        )
        .unwrap()
    }

    fn geometry() -> KernelGeometry {
        KernelGeometry {
            filter_x: 3,
            filter_y: 2,
            stride_x: 2,
            stride_y: 1,
            padding: Padding2d {
                x: AxisPadding {
                    pad: 1,
                    pad_with_offset: 1,
                },
                y: AxisPadding::default(),
            },
            output_w: 3,
            output_h: 4,
        }
    }

    #[test]
    fn banner_names_generator_and_interpreter() {
        let banner = version_banner(&BackendInfo {
            framework: "tensorflow".to_string(),
            framework_version: "2.16.1".to_string(),
            interpreter: "tflite_micro".to_string(),
            interpreter_version: "0.dev".to_string(),
            revision: None,
        });
        assert!(banner.starts_with("// Generated by quant-testgen version "));
        assert!(banner.contains("using tensorflow version 2.16.1."));
        assert!(banner.ends_with("// Interpreter from tflite_micro version 0.dev and revision None.\n"));
    }

    #[test]
    fn config_header_uses_dataset_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "true");
        let path = write_config_header(&mut session, &common_config_macros(&geometry())).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("#pragma once\n"));
        assert!(text.contains("#define CONV_1_FILTER_X 3\n"));
        assert!(text.contains("#define CONV_1_PAD_X 1\n"));
        assert!(text.contains("#define CONV_1_PAD_Y 0\n"));
        assert!(text.contains("#define CONV_1_OUTPUT_H 4\n"));
        assert_eq!(session.generated_files(), &[CONFIG_HEADER_NAME.to_string()]);
    }

    #[test]
    fn derived_sizes_are_computed() {
        let macros = tensor_config_macros(&TensorGeometry {
            in_ch: 3,
            out_ch: 4,
            input_w: 5,
            input_h: 6,
            output_w: 2,
            output_h: 3,
            batches: 2,
            activation_min: -128,
            activation_max: 127,
        });
        let find = |name: &str| {
            macros
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.value.clone())
                .unwrap()
        };
        assert_eq!(find("DST_SIZE"), "48");
        assert_eq!(find("INPUT_SIZE"), "90");
        assert_eq!(find("OUT_ACTIVATION_MIN"), "-128");
    }

    #[test]
    fn config_rendering_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let macros = common_config_macros(&geometry());
        let mut first = session(dir.path(), "true");
        let a = fs::read(write_config_header(&mut first, &macros).unwrap()).unwrap();
        let mut second = session(dir.path(), "true");
        let b = fs::read(write_config_header(&mut second, &macros).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn data_header_declares_dataset_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "true");
        let path =
            write_data_header(&mut session, "biases", &[], &CArrayOptions::typed("int32_t")).unwrap();
        assert_eq!(path.file_name().unwrap(), "biases_data.h");
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("#include <stdint.h>\n\n"));
        assert!(text.contains("const int32_t *conv_1_biases = NULL;"));
    }

    #[test]
    fn packed_header_rejects_int8_range_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "true");
        let options = CArrayOptions::default().packed(true);
        assert!(matches!(
            write_data_header(&mut session, "weights", &[3, -100, 5], &options),
            Err(TestGenError::InvalidConfig(_))
        ));
        assert!(!session.headers_dir().join("weights_data.h").exists());
        assert!(session.generated_files().is_empty());
    }

    #[test]
    fn umbrella_header_drains_generated_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "true");
        write_config_header(&mut session, &[]).unwrap();
        write_data_header(&mut session, "input", &[1, 2], &CArrayOptions::default()).unwrap();

        let path = write_umbrella_header(&mut session).unwrap();
        assert!(session.generated_files().is_empty());
        let text = fs::read_to_string(path).unwrap();
        let includes: Vec<&str> = text.lines().filter(|l| l.starts_with("#include")).collect();
        assert_eq!(
            includes,
            vec!["#include \"input_data.h\"", "#include \"config_data.h\""]
        );
    }

    #[test]
    fn formatter_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "false");
        assert!(matches!(
            write_config_header(&mut session, &[]),
            Err(TestGenError::Toolchain(_))
        ));
    }
}
