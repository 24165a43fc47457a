pub mod buffer;
pub mod clock;
pub mod config;
pub mod location;
pub mod store;
mod controller;
mod restoration;

pub use controller::*;
pub use restoration::*;

use thiserror::Error;

use crate::location::LocationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("location access was denied")]
    PermissionDenied,
    #[error("no location fix within the timeout")]
    FixTimeout,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("server rejected the request ({status}): {message}")]
    ServerRejected { status: u16, message: String },
    #[error("in-progress activity cannot be resumed: {0}")]
    RestorationMismatch(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<LocationError> for TrackerError {
    fn from(error: LocationError) -> Self {
        match error {
            LocationError::PermissionDenied => TrackerError::PermissionDenied,
            // An unavailable position is indistinguishable from never getting one.
            LocationError::PositionUnavailable | LocationError::Timeout => TrackerError::FixTimeout,
        }
    }
}
