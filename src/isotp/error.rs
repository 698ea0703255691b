//! Error types for the segmentation layer.

use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Data Too Large")]
    DataTooLarge,
    #[error("Segmentation Error: expected index {expected}, got {got}")]
    Segmentation { expected: u8, got: u8 },
    #[error("Incomplete Message: {received} of {expected} bytes")]
    Incomplete { expected: usize, received: usize },
    #[error("Unknown Frame Type")]
    UnknownFrameType,
    #[error("Malformed Frame")]
    MalformedFrame,
}
