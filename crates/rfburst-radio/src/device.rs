//! Radio error types.

/// Result type for radio driver operations
pub type RadioResult<T> = Result<T, RadioError>;

/// Errors raised by the radio driver capability.
///
/// Stream transfer codes are not errors here; they travel as
/// [`StreamCode`](rfburst_core::StreamCode) inside a burst outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RadioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Driver returned a null {0} handle")]
    NullHandle(String),

    #[error("Hardware error: {0}")]
    HardwareError(String),

    #[error("Driver error in {operation}: {message}")]
    Driver { operation: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("libSoapySDR not found - install SoapySDR package")]
    LibraryNotFound,
}

impl RadioError {
    /// Driver call failure with the driver's own message.
    pub fn driver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RadioError::Driver {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<rfburst_core::ConfigError> for RadioError {
    fn from(e: rfburst_core::ConfigError) -> Self {
        RadioError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RadioError::driver("setGain", "out of range");
        assert_eq!(err.to_string(), "Driver error in setGain: out of range");
        assert_eq!(
            RadioError::NullHandle("stream".into()).to_string(),
            "Driver returned a null stream handle"
        );

        let cfg: RadioError = rfburst_core::ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(cfg, RadioError::ConfigError(_)));
    }
}
