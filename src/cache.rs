use crate::error::TestGenError;
use crate::tensor::{element_count, Tensor, ValueDomain};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Produces randomized tensors and persists them as comma delimited text tables.
///
/// A table on disk is an immutable snapshot: it is only replaced when the caller
/// asks for regeneration. Fresh draws come from a ChaCha8 stream, so a seeded
/// cache regenerates the same values for the same sequence of requests.
pub struct DataCache {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DataCache {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn from_entropy() -> Self {
        let seed = rand::rng().random::<u64>();
        debug!("Data cache seeded from entropy with {}", seed);
        Self::seeded(seed)
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns `explicit` reshaped to `shape`, or the cached table at `path`, or a
    /// fresh draw over `domain` written to `path` when the table is missing or
    /// `regenerate` is set.
    ///
    /// With `decimals == 0` values are drawn as integers, otherwise as floats
    /// rounded to `decimals` places.
    pub fn get_or_generate(
        &mut self,
        shape: &[usize],
        path: &Path,
        regenerate: bool,
        domain: ValueDomain,
        decimals: u32,
        explicit: Option<Tensor>,
    ) -> Result<Tensor, TestGenError> {
        if let Some(tensor) = explicit {
            return tensor.reshape(shape.to_vec());
        }

        if !path.exists() || regenerate {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|err| TestGenError::io(dir, err))?;
            }
            let tensor = self.generate(shape, domain, decimals)?;
            info!("Saving data to {}", path.display());
            save_table(path, &tensor)?;
            Ok(tensor)
        } else {
            info!("Loading data from {}", path.display());
            load_table(path)
        }
    }

    fn generate(
        &mut self,
        shape: &[usize],
        domain: ValueDomain,
        decimals: u32,
    ) -> Result<Tensor, TestGenError> {
        domain.validate()?;
        let count = element_count(shape);
        let data = if decimals == 0 {
            let low = domain.min.ceil() as i64;
            let high = domain.max.ceil() as i64;
            if low >= high {
                return Err(TestGenError::invalid_config(format!(
                    "no integer in range [{}, {})",
                    domain.min, domain.max
                )));
            }
            let (first, last) = integral_f32_bounds(low, high - 1).ok_or_else(|| {
                TestGenError::invalid_config(format!(
                    "no f32 integer in range [{}, {})",
                    domain.min, domain.max
                ))
            })?;
            // Above 2^24 the cast rounds to a multiple of the f32 spacing, which may
            // leave the domain.
            (0..count)
                .map(|_| (self.rng.random_range(low..high) as f32).clamp(first, last))
                .collect()
        } else {
            let low = domain.min as f32;
            let high = domain.max as f32;
            if low >= high {
                return Err(TestGenError::invalid_config(format!(
                    "range [{}, {}) collapses in f32",
                    domain.min, domain.max
                )));
            }
            let step = 10f64.powi(-(decimals as i32)) as f32;
            (0..count)
                .map(|_| {
                    let value = round_to_decimals(self.rng.random_range(low..high), decimals);
                    // Rounding may land on the excluded upper bound.
                    if value >= high {
                        round_to_decimals(value - step, decimals)
                    } else if value < low {
                        round_to_decimals(value + step, decimals)
                    } else {
                        value
                    }
                })
                .collect()
        };
        Tensor::new(shape.to_vec(), data)
    }
}

/// Adjacent f32 in the direction of `up`.
fn next_f32(value: f32, up: bool) -> f32 {
    if value == 0.0 {
        let tiny = f32::from_bits(1);
        return if up { tiny } else { -tiny };
    }
    let bits = value.to_bits();
    if (value > 0.0) == up {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}

/// Smallest and largest f32 inside the integer range `[low, high]`, if any.
fn integral_f32_bounds(low: i64, high: i64) -> Option<(f32, f32)> {
    let mut first = low as f32;
    if (first as f64) < low as f64 {
        first = next_f32(first, true);
    }
    let mut last = high as f32;
    if (last as f64) > high as f64 {
        last = next_f32(last, false);
    }
    (first <= last).then_some((first, last))
}

/// Round half to even at `decimals` places.
pub fn round_to_decimals(value: f32, decimals: u32) -> f32 {
    let factor = 10f64.powi(decimals as i32);
    ((value as f64 * factor).round_ties_even() / factor) as f32
}

/// `%.18e` with a signed, at least two digit exponent.
fn format_scientific(value: f32) -> String {
    let raw = format!("{:.18e}", value as f64);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => raw,
    }
}

pub fn save_table(path: &Path, tensor: &Tensor) -> Result<(), TestGenError> {
    let shape = tensor.shape();
    let Some(&columns) = shape.last() else {
        return Err(TestGenError::invalid_config(
            "cannot store a rank-0 tensor in a data table",
        ));
    };

    let header = shape
        .iter()
        .map(|dim| dim.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut out = format!("# {}\n", header);

    let rows = element_count(&shape[..shape.len() - 1]);
    for row in 0..rows {
        let start = row * columns;
        let line = tensor.data()[start..start + columns]
            .iter()
            .map(|value| format_scientific(*value))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }

    fs::write(path, out).map_err(|err| TestGenError::io(path, err))
}

fn parse_header(path: &Path, line: &str) -> Result<Vec<usize>, TestGenError> {
    let parse_error = |reason: String| TestGenError::CacheParse {
        path: path.to_path_buf(),
        reason,
    };
    let body = line
        .strip_prefix('#')
        .ok_or_else(|| parse_error(format!("missing shape header, got {:?}", line)))?;
    let body = body.trim();
    if body.is_empty() {
        return Err(parse_error("empty shape header".to_string()));
    }
    body.split(',')
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .map_err(|err| parse_error(format!("invalid dimension {:?}: {}", dim, err)))
        })
        .collect()
}

/// Loads a table written by [`save_table`] (or by numpy `savetxt` with a shape
/// header). The stored header is the only source of the shape.
pub fn load_table(path: &Path) -> Result<Tensor, TestGenError> {
    let text = fs::read_to_string(path).map_err(|err| TestGenError::io(path, err))?;
    let parse_error = |reason: String| TestGenError::CacheParse {
        path: path.to_path_buf(),
        reason,
    };

    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| parse_error("file is empty".to_string()))?;
    let shape = parse_header(path, header)?;
    let columns = shape.last().copied().unwrap_or(0);

    let mut data = Vec::with_capacity(element_count(&shape));
    for (line_no, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row_start = data.len();
        for field in line.split(',') {
            let value = field.trim().parse::<f64>().map_err(|err| {
                parse_error(format!(
                    "line {}: invalid value {:?}: {}",
                    line_no + 2,
                    field,
                    err
                ))
            })?;
            let value = value as f32;
            if !value.is_finite() {
                return Err(parse_error(format!(
                    "line {}: non-finite value {:?}",
                    line_no + 2,
                    field
                )));
            }
            data.push(value);
        }
        let row_len = data.len() - row_start;
        if row_len != columns {
            return Err(parse_error(format!(
                "line {}: expected {} columns, found {}",
                line_no + 2,
                columns,
                row_len
            )));
        }
    }

    let expected = element_count(&shape);
    if data.len() != expected {
        return Err(parse_error(format!(
            "header shape {:?} needs {} values, found {}",
            shape,
            expected,
            data.len()
        )));
    }
    Tensor::new(shape, data)
}
