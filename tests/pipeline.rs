use quant_testgen::{
    quantize_tensor, BackendInfo, ConvTestSet, GenerateData, IntType, InterpreterOutput,
    KernelTestConfig, LayerKind, ModelBackend, ModelDescription, PoolingTestSet, QuantParams,
    QuantizedModel, QuantizedTensorData, RepresentativeDataset, Tensor, TestGenError,
};
use std::cell::RefCell;
use std::fs;
use std::path::Path;

const INPUT_QUANT: QuantParams = QuantParams {
    scale: 1.0,
    zero_point: -1,
};
const OUTPUT_QUANT: QuantParams = QuantParams {
    scale: 0.25,
    zero_point: 3,
};
const WEIGHT_SCALE: f64 = 0.5;

/// In-process stand-in for the converter: records the model it was handed and
/// answers with a fixed quantization.
#[derive(Default)]
struct FakeBackend {
    converted: RefCell<Option<ModelDescription>>,
}

fn quantized(shape: &[usize], values: Vec<i64>, scales: Vec<f64>) -> QuantizedTensorData {
    QuantizedTensorData {
        shape: shape.to_vec(),
        values,
        scales,
    }
}

impl ModelBackend for FakeBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            framework: "tensorflow".to_string(),
            framework_version: "2.16.1".to_string(),
            interpreter: "fake".to_string(),
            interpreter_version: "0.1".to_string(),
            revision: None,
        }
    }

    fn compile_and_quantize(
        &self,
        model: &ModelDescription,
        _int_type: IntType,
        dataset: &RepresentativeDataset,
        out_path: &Path,
    ) -> Result<QuantizedModel, TestGenError> {
        assert_eq!(dataset.shape(), model.input_shape.as_slice());
        fs::write(out_path, b"TFL3").unwrap();
        *self.converted.borrow_mut() = Some(model.clone());
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
        assert!(model.path.exists());
        let converted = self.converted.borrow();
        let description = converted.as_ref().unwrap();

        let input_values = quantize_tensor(input, INPUT_QUANT, int_type)?;
        let weights = description.weights.as_ref().map(|w| {
            let values = w.data.iter().map(|&v| v as i64).collect();
            quantized(&w.shape, values, vec![WEIGHT_SCALE])
        });
        let biases = description.biases.as_ref().map(|b| {
            let values = b.data.iter().map(|&v| v as i64).collect();
            quantized(&b.shape, values, Vec::new())
        });

        Ok(InterpreterOutput {
            output: quantized(&[4], vec![3, -4, 5, -6], Vec::new()),
            input_quant: INPUT_QUANT,
            output_quant: OUTPUT_QUANT,
            input: quantized(input.shape(), input_values, Vec::new()),
            weights,
            biases,
        })
    }
}

fn config(dir: &Path, dataset: &str) -> KernelTestConfig {
    KernelTestConfig {
        dataset: dataset.to_string(),
        in_ch: 2,
        out_ch: 4,
        x_in: 5,
        y_in: 4,
        w_x: 3,
        w_y: 3,
        stride_x: 2,
        pad: true,
        randmin: -4.0,
        randmax: 4.0,
        bias_min: -100.0,
        bias_max: 100.0,
        outdir: dir.join("TestData"),
        pregen_dir: dir.join("PregeneratedData"),
        formatter: "true".to_string(),
        seed: Some(1234),
        ..KernelTestConfig::default()
    }
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn conv_dataset_writes_all_headers() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::default();
    let mut set = ConvTestSet::conv(config(dir.path(), "conv_pipeline")).unwrap();

    let wrapper = set.generate_data(&backend, None, None, None).unwrap();
    let headers = dir.path().join("TestData/conv_pipeline");
    assert_eq!(wrapper, headers.join("test_data.h"));

    let umbrella = read(&headers, "test_data.h");
    assert!(umbrella.starts_with("// Generated by quant-testgen version "));
    let includes: Vec<&str> = umbrella
        .lines()
        .filter(|l| l.starts_with("#include"))
        .collect();
    assert_eq!(
        includes,
        vec![
            "#include \"output_ref_data.h\"",
            "#include \"output_shift_data.h\"",
            "#include \"output_mult_data.h\"",
            "#include \"biases_data.h\"",
            "#include \"weights_data.h\"",
            "#include \"input_data.h\"",
            "#include \"config_data.h\"",
        ]
    );

    let config_header = read(&headers, "config_data.h");
    assert!(config_header.contains("#define CONV_PIPELINE_OUT_CH 4\n"));
    assert!(config_header.contains("#define CONV_PIPELINE_INPUT_SIZE 40\n"));
    assert!(config_header.contains("#define CONV_PIPELINE_OUTPUT_W 3\n"));
    assert!(config_header.contains("#define CONV_PIPELINE_PAD_X 1\n"));
    assert!(config_header.contains("#define CONV_PIPELINE_INPUT_OFFSET 1\n"));
    assert!(config_header.contains("#define CONV_PIPELINE_OUTPUT_OFFSET 3\n"));
    assert!(config_header.contains("#define CONV_PIPELINE_DILATION_X 1\n"));
    assert!(!config_header.contains("CH_MULT"));

    // 1.0 * 0.5 / 0.25 == 2.0 == 0.5 * 2^2
    let mult = read(&headers, "output_mult_data.h");
    assert!(mult.contains("const int32_t conv_pipeline_output_mult[4] ="));
    assert_eq!(mult.matches("1073741824").count(), 4);
    let shift = read(&headers, "output_shift_data.h");
    assert!(shift.contains("const int32_t conv_pipeline_output_shift[4] ="));

    let biases = read(&headers, "biases_data.h");
    assert!(biases.contains("const int32_t conv_pipeline_biases[4] ="));
    let weights = read(&headers, "weights_data.h");
    assert!(weights.contains("const int8_t conv_pipeline_weights[72] ="));
    let input = read(&headers, "input_data.h");
    assert!(input.contains("const int8_t conv_pipeline_input[40] ="));

    let pregen = dir.path().join("PregeneratedData/conv_pipeline");
    assert!(pregen.join("input.txt").exists());
    assert!(pregen.join("kernel.txt").exists());
    assert!(pregen.join("bias.txt").exists());
    assert!(dir
        .path()
        .join("TestData/conv_pipeline/model_conv_pipeline.tflite")
        .exists());
}

#[test]
fn cached_tables_make_regeneration_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::default();

    let mut first = ConvTestSet::conv(config(dir.path(), "conv_cached")).unwrap();
    first.generate_data(&backend, None, None, None).unwrap();
    let headers = dir.path().join("TestData/conv_cached");
    let weights = read(&headers, "weights_data.h");
    let input = read(&headers, "input_data.h");

    let mut reseeded = config(dir.path(), "conv_cached");
    reseeded.seed = Some(99);
    let mut second = ConvTestSet::conv(reseeded).unwrap();
    second.generate_data(&backend, None, None, None).unwrap();

    assert_eq!(read(&headers, "weights_data.h"), weights);
    assert_eq!(read(&headers, "input_data.h"), input);
}

#[test]
fn explicit_input_overrides_cache() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::default();
    let mut set = ConvTestSet::conv(config(dir.path(), "conv_explicit")).unwrap();

    let input = Tensor::full(vec![40], 2.0);
    set.generate_data(&backend, Some(input), None, None).unwrap();

    let converted = backend.converted.borrow();
    assert_eq!(converted.as_ref().unwrap().input_shape, vec![1, 4, 5, 2]);
    let text = read(&dir.path().join("TestData/conv_explicit"), "input_data.h");
    // 2.0 / 1.0 + (-1)
    assert_eq!(text.matches("  1,").count(), 39);
}

#[test]
fn depthwise_int4_weights_are_packed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::default();
    let mut cfg = config(dir.path(), "dw_int4");
    cfg.out_ch = 6;
    cfg.w_x = 3;
    cfg.w_y = 1;
    cfg.int4_weights = true;
    cfg.generate_bias = false;
    let mut set = ConvTestSet::depthwise(cfg).unwrap();
    set.generate_data(&backend, None, None, None).unwrap();

    let converted = backend.converted.borrow();
    let description = converted.as_ref().unwrap();
    assert_eq!(
        description.layer,
        LayerKind::DepthwiseConv2d {
            depth_multiplier: 3
        }
    );
    assert!(description.biases.is_none());
    let weights = description.weights.as_ref().unwrap();
    assert!(weights.data.iter().all(|&w| (-8.0..8.0).contains(&w)));

    let headers = dir.path().join("TestData/dw_int4");
    let packed = read(&headers, "weights_data.h");
    assert!(packed.contains("#define DW_INT4_WEIGHTS_ELEMENT_COUNT 18"));
    assert!(packed.contains("const int8_t dw_int4_weights[9] ="));
    assert!(read(&headers, "biases_data.h").contains("const int32_t *dw_int4_biases = NULL;"));
    assert!(read(&headers, "config_data.h").contains("#define DW_INT4_CH_MULT 3\n"));
}

#[test]
fn pooling_dataset_skips_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::default();
    let mut set = PoolingTestSet::average(config(dir.path(), "avgpool_pipeline")).unwrap();
    set.generate_data(&backend, None, None, None).unwrap();

    let headers = dir.path().join("TestData/avgpool_pipeline");
    let umbrella = read(&headers, "test_data.h");
    let includes: Vec<&str> = umbrella
        .lines()
        .filter(|l| l.starts_with("#include"))
        .collect();
    assert_eq!(
        includes,
        vec![
            "#include \"output_ref_data.h\"",
            "#include \"input_data.h\"",
            "#include \"config_data.h\"",
        ]
    );
    let config_header = read(&headers, "config_data.h");
    assert!(config_header.contains("#define AVGPOOL_PIPELINE_OUT_CH 2\n"));
    assert!(config_header.contains("#define AVGPOOL_PIPELINE_OUTPUT_OFFSET 3\n"));
    assert!(!headers.join("weights_data.h").exists());
    assert!(!dir
        .path()
        .join("PregeneratedData/avgpool_pipeline/bias.txt")
        .exists());
}

#[test]
fn failing_formatter_aborts_generation() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::default();
    let mut cfg = config(dir.path(), "conv_fmt");
    cfg.formatter = "false".to_string();
    let mut set = ConvTestSet::conv(cfg).unwrap();
    assert!(matches!(
        set.generate_data(&backend, None, None, None),
        Err(TestGenError::Toolchain(_))
    ));
}
