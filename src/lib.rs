mod backend;
mod cache;
mod conv;
mod emitter;
mod error;
mod model_json;
mod padding;
mod pooling;
mod quant;
mod serialize;
mod settings;
mod tensor;
mod toolchain;

pub use crate::backend::{
    Activation, ExternalBackend, InterpreterKind, InterpreterOutput, LayerKind, ModelBackend,
    ModelDescription, QuantizedModel, QuantizedTensorData, RepresentativeDataset, TensorData,
};
pub use crate::cache::{load_table, round_to_decimals, save_table, DataCache};
pub use crate::conv::{ConvKind, ConvTestSet};
pub use crate::emitter::{
    common_config_macros, data_file_name, render_config_header, tensor_config_macros,
    version_banner, write_config_header, write_data_header, write_umbrella_header, BackendInfo,
    CMacro, GenerationSession, KernelGeometry, TensorGeometry, CONFIG_HEADER_NAME,
    UMBRELLA_HEADER_NAME,
};
pub use crate::error::TestGenError;
pub use crate::model_json::{BufferPatch, JsonModelTemplate};
pub use crate::padding::{
    compute_axis_padding, compute_padding, output_extent, AxisGeometry, AxisPadding, PadMode,
    Padding2d,
};
pub use crate::pooling::{PoolingKind, PoolingTestSet};
pub use crate::quant::{
    effective_scales, encode_scale, encode_scales, frexp, quantize_tensor, QuantParams,
    QuantizedScale,
};
pub use crate::serialize::{c_array_source, pack_int4, to_bytes, unpack_int4, CArrayOptions};
pub use crate::settings::{
    GenerateData, KernelTestConfig, KernelTestSettings, DEFAULT_OUTDIR, DEFAULT_PREGEN_DIR,
};
pub use crate::tensor::{
    element_count, FlatValues, IntType, Tensor, TensorRole, ValueDomain, INT4_MAX, INT4_MIN,
};
pub use crate::toolchain::{
    ExternalCommand, SchemaCompiler, SourceFormatter, ToolchainError, DEFAULT_FORMATTER,
    DEFAULT_SCHEMA_COMPILER,
};
