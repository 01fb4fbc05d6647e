use crate::dtype::DType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("invalid shape {0:?}: rank must be at least 1 with all extents positive")]
    InvalidShape(Vec<usize>),
    #[error("shape mismatch: expected {expected} elements, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("rank mismatch: expected {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },
    #[error("index {index} out of bounds for dim {dim} with extent {extent}")]
    IndexOutOfBounds {
        index: usize,
        dim: usize,
        extent: usize,
    },
    #[error("dim {dim} out of range for tensor with {ndim} dimensions")]
    DimOutOfRange { dim: usize, ndim: usize },
    #[error("{op} requires a contiguous tensor")]
    NonContiguous { op: &'static str },
    #[error("unsupported dtype {dtype} for {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },
    #[error("view out of bounds: needs {required} bytes, buffer holds {capacity}")]
    ViewOutOfBounds { required: usize, capacity: usize },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(usize),
    #[error("buffer overflow: offset {offset} + len {len} exceeds buffer size {size}")]
    BufferOverflow {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("buffer already released")]
    BufferReleased,
    #[error("allocation failed: {0}")]
    AllocationFailed(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
