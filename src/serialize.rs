use crate::error::TestGenError;
use crate::tensor::{INT4_MAX, INT4_MIN};

/// Little-endian encoding of each value truncated to `byte_width` bytes.
///
/// Values wrap modulo `2^(8 * byte_width)`, so `-1` becomes `0xff` at width 1.
pub fn to_bytes(values: &[i64], byte_width: usize) -> Result<Vec<u8>, TestGenError> {
    if !matches!(byte_width, 1 | 2 | 4) {
        return Err(TestGenError::UnsupportedByteWidth(byte_width));
    }

    let mut out = Vec::with_capacity(values.len() * byte_width);
    for &value in values {
        match byte_width {
            1 => out.push(value as u8),
            2 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            _ => out.extend_from_slice(&(value as u32).to_le_bytes()),
        }
    }
    Ok(out)
}

/// Packs signed 4-bit values two per byte, first value in the low nibble.
/// An odd trailing value leaves the high nibble of the last byte zero.
///
/// Values outside `[-8, 7]` are rejected rather than wrapped.
pub fn pack_int4(values: &[i64]) -> Result<Vec<i8>, TestGenError> {
    if let Some((index, value)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !(INT4_MIN..=INT4_MAX).contains(*v))
    {
        return Err(TestGenError::invalid_config(format!(
            "value {} at index {} does not fit int4 [{}, {}]",
            value, index, INT4_MIN, INT4_MAX
        )));
    }

    Ok(values
        .chunks(2)
        .map(|pair| {
            let low = (pair[0] as u8) & 0x0f;
            let high = pair.get(1).map_or(0, |v| (*v as u8) & 0x0f);
            (low | (high << 4)) as i8
        })
        .collect())
}

pub fn unpack_int4(packed: &[i8], count: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity(count);
    for &byte in packed {
        for nibble in [byte << 4, byte] {
            if out.len() == count {
                break;
            }
            out.push((nibble >> 4) as i64);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CArrayOptions {
    pub datatype: String,
    pub constness: String,
    pub pack: bool,
}

impl Default for CArrayOptions {
    fn default() -> Self {
        Self {
            datatype: "int8_t".to_string(),
            constness: "const ".to_string(),
            pack: false,
        }
    }
}

impl CArrayOptions {
    pub fn typed(datatype: &str) -> Self {
        Self {
            datatype: datatype.to_string(),
            ..Self::default()
        }
    }

    pub fn packed(mut self, pack: bool) -> Self {
        self.pack = pack;
        self
    }

    pub fn mutable(mut self) -> Self {
        self.constness = String::new();
        self
    }
}

/// Declaration of `symbol` holding `values`, one element per line.
///
/// An empty input declares a NULL pointer of the element type. With `pack` set,
/// values are nibble packed and the array holds `ceil(n / 2)` slots, while a
/// `<SYMBOL>_ELEMENT_COUNT` macro keeps the unpacked count.
pub fn c_array_source(
    symbol: &str,
    values: &[i64],
    options: &CArrayOptions,
) -> Result<String, TestGenError> {
    let element_count = values.len();

    let literals: Vec<i64> = if options.pack {
        pack_int4(values)?.into_iter().map(i64::from).collect()
    } else {
        values.to_vec()
    };

    let Some((last, rest)) = literals.split_last() else {
        return Ok(format!(
            "{}{} *{} = NULL;\n",
            options.constness, options.datatype, symbol
        ));
    };

    let mut out = String::new();
    if options.pack {
        out.push_str(&format!(
            "#define {}_ELEMENT_COUNT {}\n\n",
            symbol.to_uppercase(),
            element_count
        ));
    }

    out.push_str(&format!(
        "{}{} {}[{}] =\n{{\n",
        options.constness,
        options.datatype,
        symbol,
        literals.len()
    ));
    for value in rest {
        out.push_str(&format!("  {},\n", value));
    }
    out.push_str(&format!("  {}\n}};\n", last));
    Ok(out)
}
