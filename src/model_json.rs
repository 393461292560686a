use crate::error::TestGenError;
use crate::serialize::to_bytes;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

/// Raw little-endian data for one entry of the model's `buffers` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPatch {
    pub index: usize,
    pub values: Vec<i64>,
    pub byte_width: usize,
}

impl BufferPatch {
    pub fn new(index: usize, values: Vec<i64>, byte_width: usize) -> Self {
        Self {
            index,
            values,
            byte_width,
        }
    }
}

/// Textual model template with placeholders for shapes, scales and zero points.
pub struct JsonModelTemplate {
    text: String,
}

impl JsonModelTemplate {
    pub fn load(path: &Path) -> Result<Self, TestGenError> {
        let text = fs::read_to_string(path).map_err(|err| TestGenError::io(path, err))?;
        Ok(Self { text })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Applies `replacements` in order, then overwrites the patched buffers.
    pub fn render(
        &self,
        replacements: &[(String, String)],
        patches: &[BufferPatch],
    ) -> Result<Value, TestGenError> {
        let mut text = self.text.clone();
        for (placeholder, value) in replacements {
            text = text.replace(placeholder.as_str(), value);
        }

        let mut model: Value = serde_json::from_str(&text)?;
        let buffers = model
            .get_mut("buffers")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| TestGenError::invalid_config("model template has no buffers array"))?;

        for patch in patches {
            let buffer_count = buffers.len();
            let buffer = buffers
                .get_mut(patch.index)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| {
                    TestGenError::invalid_config(format!(
                        "buffer index {} out of range ({} buffers)",
                        patch.index, buffer_count
                    ))
                })?;
            let bytes = to_bytes(&patch.values, patch.byte_width)?;
            buffer.insert(
                "data".to_string(),
                Value::Array(bytes.into_iter().map(Value::from).collect()),
            );
        }

        Ok(model)
    }

    pub fn generate(
        &self,
        replacements: &[(String, String)],
        patches: &[BufferPatch],
        out_path: &Path,
    ) -> Result<(), TestGenError> {
        let model = self.render(replacements, patches)?;
        info!("Writing model description {}", out_path.display());
        let text = serde_json::to_string_pretty(&model)?;
        fs::write(out_path, text).map_err(|err| TestGenError::io(out_path, err))
    }
}
