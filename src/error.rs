//! Error types shared by the raster core.

use thiserror::Error;

/// Errors raised by buffers, the layer stack, and command application.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditorError {
    #[error("pixel ({x}, {y}) is outside the {width}x{height} buffer")]
    OutOfBounds { x: i64, y: i64, width: u32, height: u32 },
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("cannot remove the last layer")]
    LastLayer,
    #[error("layer {0} has no layer below it to merge into")]
    NoLayerBelow(usize),
    #[error("layer index {index} out of range (stack has {len} layers)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("sub-command {index} ({label}) failed: {source}")]
    CommandApplyFailure {
        index: usize,
        label: String,
        #[source]
        source: Box<EditorError>,
    },
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },
    #[error("layer name must not be empty")]
    InvalidLayerName,
    #[error("cannot undo '{0}': it was never applied")]
    CommandNotApplied(String),
}

/// Result type for core editing operations.
pub type Result<T> = std::result::Result<T, EditorError>;

impl EditorError {
    pub(crate) fn out_of_bounds(x: i64, y: i64, width: u32, height: u32) -> Self {
        EditorError::OutOfBounds { x, y, width, height }
    }

    pub(crate) fn index(index: usize, len: usize) -> Self {
        EditorError::IndexOutOfRange { index, len }
    }
}
