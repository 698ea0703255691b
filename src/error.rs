//! Contains the main error type for the library.
use thiserror::Error;

/// The main error type for the library. The protocol modules have their own error
/// types that are contained by this error.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Not Connected")]
    NotConnected,
    #[error("Timeout")]
    Timeout,
    #[error("Frame Too Large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("Malformed Frame")]
    MalformedFrame,
    #[error("Unknown Vehicle: {0}")]
    UnknownVehicle(String),
    #[error("Duplicate Vehicle: {0}")]
    DuplicateVehicle(String),
    #[error("Transport Error: {0}")]
    Transport(String),
    #[error("Export Failed: {0}")]
    Export(String),
    #[error(transparent)]
    IsoTp(#[from] crate::isotp::error::Error),
    #[error(transparent)]
    Uds(#[from] crate::uds::error::Error),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Error {
        Error::Timeout
    }
}
