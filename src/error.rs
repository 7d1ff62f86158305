// ============================================================================
// ERRORS — one enum for every failure a filter request can hit
// ============================================================================

use thiserror::Error;

/// Failure of a filter request.  A request yields a complete output image or
/// one of these; there is no partial result.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Bad filter name, kernel size, colour mode or launch geometry.
    /// Always raised before any device resource is touched.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The uploaded bytes could not be parsed as an image.
    #[error("could not decode image: {0}")]
    DecodeFailure(String),

    /// Allocation, launch or readback failed on the compute device.
    #[error("device failure: {0}")]
    DeviceFailure(String),

    /// The output raster could not be encoded.
    #[error("could not encode image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilterError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        FilterError::InvalidParameter(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        FilterError::DeviceFailure(msg.into())
    }

    /// `true` for failures caused by the caller's input rather than the device.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FilterError::InvalidParameter(_) | FilterError::DecodeFailure(_)
        )
    }
}

pub type FilterResult<T> = Result<T, FilterError>;
