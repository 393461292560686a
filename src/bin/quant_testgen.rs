use quant_testgen::{
    ConvTestSet, ExternalBackend, ExternalCommand, GenerateData, KernelTestConfig, PoolingTestSet,
};
use std::error::Error;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TestType {
    Conv,
    Depthwise,
    AvgPool,
    MaxPool,
}

impl TestType {
    fn parse(value: &str) -> Result<Self, String> {
        match value {
            "conv" => Ok(Self::Conv),
            "depthwise_conv" => Ok(Self::Depthwise),
            "avgpool" => Ok(Self::AvgPool),
            "maxpool" => Ok(Self::MaxPool),
            _ => Err(format!(
                "invalid --test-type '{}', expected conv|depthwise_conv|avgpool|maxpool",
                value
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct Config {
    test_type: TestType,
    dataset_configs: Vec<PathBuf>,
    backend_cmd: String,
    regenerate_all: bool,
    seed: Option<u64>,
}

fn next_arg(args: &[String], idx: &mut usize, flag: &str) -> Result<String, String> {
    *idx += 1;
    if *idx >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    Ok(args[*idx].clone())
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Err("missing args: --test-type --backend-cmd <dataset.json>...".to_string());
    }

    let mut test_type: Option<TestType> = None;
    let mut dataset_configs = Vec::new();
    let mut backend_cmd: Option<String> = None;
    let mut regenerate_all = false;
    let mut seed: Option<u64> = None;

    let mut idx = 1usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--test-type" => {
                test_type = Some(TestType::parse(&next_arg(&args, &mut idx, "--test-type")?)?);
            }
            "--backend-cmd" => {
                backend_cmd = Some(next_arg(&args, &mut idx, "--backend-cmd")?);
            }
            "--regenerate-all" | "-a" => {
                regenerate_all = true;
            }
            "--seed" => {
                let value = next_arg(&args, &mut idx, "--seed")?;
                seed = Some(
                    value
                        .parse::<u64>()
                        .map_err(|e| format!("--seed invalid integer '{}': {}", value, e))?,
                );
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown flag: {}", other));
            }
            path => dataset_configs.push(PathBuf::from(path)),
        }
        idx += 1;
    }

    let Some(test_type) = test_type else {
        return Err("missing --test-type".to_string());
    };
    let Some(backend_cmd) = backend_cmd else {
        return Err("missing --backend-cmd".to_string());
    };
    if dataset_configs.is_empty() {
        return Err("no dataset config files given".to_string());
    }

    Ok(Config {
        test_type,
        dataset_configs,
        backend_cmd,
        regenerate_all,
        seed,
    })
}

fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let command = ExternalCommand::parse(&config.backend_cmd)?;

    for path in &config.dataset_configs {
        let mut dataset = KernelTestConfig::from_json_file(path)?;
        if config.regenerate_all {
            dataset.set_regenerate_all(true);
        }
        if config.seed.is_some() {
            dataset.seed = config.seed;
        }
        let backend = ExternalBackend::probe(dataset.interpreter, command.clone())?;

        let mut generator: Box<dyn GenerateData> = match config.test_type {
            TestType::Conv => Box::new(ConvTestSet::conv(dataset)?),
            TestType::Depthwise => Box::new(ConvTestSet::depthwise(dataset)?),
            TestType::AvgPool => Box::new(PoolingTestSet::average(dataset)?),
            TestType::MaxPool => Box::new(PoolingTestSet::max(dataset)?),
        };
        let wrapper = generator.generate_data(&backend, None, None, None)?;
        println!("Wrote {}", wrapper.display());
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match parse_args() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
