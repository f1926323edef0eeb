//! Error types for the batch-knn-wgpu library.
//!
//! Input validation failures are detected before any distance work starts.
//! Device failures that happen after dispatch are reported when the pending
//! result is awaited.

use thiserror::Error;

/// Main error type for the batch-knn-wgpu library.
#[derive(Error, Debug)]
pub enum KnnError {
    /// Query and reference dimensionality disagree.
    #[error("Dimension mismatch: queries have {query_dim} coordinates, reference has {reference_dim}")]
    DimensionMismatch {
        /// Dimensionality of the query set
        query_dim: usize,
        /// Dimensionality of the reference set
        reference_dim: usize,
    },

    /// `k` is zero or larger than the reference set.
    #[error("Invalid k: {k} (reference set has {n_reference} points)")]
    InvalidK {
        /// Requested neighbour count
        k: usize,
        /// Number of reference points available
        n_reference: usize,
    },

    /// A query or reference set has no points.
    #[error("Empty input: {0} set has no points")]
    EmptyInput(&'static str),

    /// Invalid input data provided to the algorithm.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Error occurred during GPU device initialization or adapter selection.
    #[error("GPU initialization failed: {0}")]
    GpuInitError(String),

    /// Error occurred during shader compilation or pipeline creation.
    #[error("Shader compilation failed: {0}")]
    ShaderError(String),

    /// Error occurred during compute pass execution.
    #[error("Compute execution failed: {0}")]
    ComputeError(String),

    /// Error occurred during data transfer between CPU and GPU.
    #[error("Data transfer failed: {0}")]
    TransferError(String),

    /// The requested operation is not supported on the current hardware.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// One shard of a fan-out search failed.
    #[error("Shard {shard} failed: {source}")]
    ShardFailed {
        /// Position of the failing shard in query order
        shard: usize,
        /// The shard's own error
        #[source]
        source: Box<KnnError>,
    },

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing a JSON configuration failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic wgpu error wrapper.
    #[error("wgpu error: {0}")]
    WgpuError(#[from] wgpu::Error),

    /// Error occurred during buffer mapping operations.
    #[error("Buffer mapping failed: {0}")]
    BufferMapError(#[from] wgpu::BufferAsyncError),
}

/// Result type alias for operations that may fail with a KnnError.
pub type Result<T> = std::result::Result<T, KnnError>;

/// Validation error types for point data.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Flat buffer length is not a multiple of the dimensionality.
    #[error("Invalid points array: {0} values cannot be split into rows of {1}")]
    InvalidShape(usize, usize),

    /// Dimensionality must be positive.
    #[error("Points must have at least one coordinate")]
    ZeroDimension,

    /// Rows of a nested input have different lengths.
    #[error("Row {row} has {len} coordinates, expected {expected}")]
    RaggedRows {
        /// Offending row
        row: usize,
        /// Its length
        len: usize,
        /// Length of the first row
        expected: usize,
    },

    /// Points contain invalid values (NaN or infinity).
    #[error("Points contain invalid values at index {0}")]
    InvalidValues(usize),
}

impl From<ValidationError> for KnnError {
    fn from(err: ValidationError) -> Self {
        KnnError::InvalidInput(err.to_string())
    }
}
