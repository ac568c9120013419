//! Error types for the SYRK comparison harness
//!
//! Skips (unsupported precision, insufficient resources) and regressions are
//! not errors; they are reported through [`crate::harness::Outcome`]. Everything
//! here is fatal for the case that raised it.

use std::fmt;

use thiserror::Error;

/// Status code reported by a device backend call.
///
/// Values follow the OpenCL convention: zero is success, negative values are
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceStatus(pub i32);

impl DeviceStatus {
    /// Call completed
    pub const SUCCESS: Self = Self(0);
    /// Device could not back the allocation
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(-4);
    /// Host ran out of resources
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    /// Event or command failed while executing
    pub const EXEC_STATUS_ERROR: Self = Self(-14);
    /// Argument out of range
    pub const INVALID_VALUE: Self = Self(-30);
    /// Queue handle not known to the device
    pub const INVALID_COMMAND_QUEUE: Self = Self(-36);
    /// Buffer handle not usable for the requested access
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    /// Requested size is zero or above the allocation limit
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);

    /// Raw status value
    #[must_use]
    pub fn code(self) -> i32 {
        self.0
    }

    /// Whether this status means the call succeeded
    #[must_use]
    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SUCCESS => "SUCCESS",
            Self::MEM_OBJECT_ALLOCATION_FAILURE => "MEM_OBJECT_ALLOCATION_FAILURE",
            Self::OUT_OF_HOST_MEMORY => "OUT_OF_HOST_MEMORY",
            Self::EXEC_STATUS_ERROR => "EXEC_STATUS_ERROR",
            Self::INVALID_VALUE => "INVALID_VALUE",
            Self::INVALID_COMMAND_QUEUE => "INVALID_COMMAND_QUEUE",
            Self::INVALID_MEM_OBJECT => "INVALID_MEM_OBJECT",
            Self::INVALID_BUFFER_SIZE => "INVALID_BUFFER_SIZE",
            _ => return write!(f, "status {}", self.0),
        };
        write!(f, "{} ({})", name, self.0)
    }
}

/// Device-side step that can fail while timing a case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStep {
    /// Re-upload of the result matrix before timing
    WriteBuffer,
    /// Wait on the upload event
    WaitUpload,
    /// Kernel submission
    Enqueue,
    /// Queue flush
    Flush,
    /// Wait for kernel completion
    Finish,
}

impl fmt::Display for DeviceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WriteBuffer => "matrix C buffer write",
            Self::WaitUpload => "wait on upload event",
            Self::Enqueue => "SYRK enqueue",
            Self::Flush => "queue flush",
            Self::Finish => "wait for kernel completion",
        };
        f.write_str(s)
    }
}

/// Fatal harness errors
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Problem descriptor violates a shape invariant
    #[error("Invalid problem: {reason}")]
    InvalidProblem {
        /// What is wrong with the descriptor
        reason: String,
    },

    /// Device buffer creation failed after the resource check passed
    #[error("Setup failed creating {buffer} buffer ({bytes} bytes): {status}")]
    Setup {
        /// Which matrix the buffer mirrors
        buffer: &'static str,
        /// Requested size including the offset
        bytes: usize,
        /// Status returned by the device
        status: DeviceStatus,
    },

    /// A device call failed while timing
    #[error("Device {step} failed: {status}")]
    Device {
        /// Failing step
        step: DeviceStep,
        /// Status returned by the device
        status: DeviceStatus,
    },

    /// The device exposes no command queue
    #[error("Device exposes no command queue")]
    NoQueue,

    /// Timer called before device buffers exist
    #[error("Case not prepared: {0}")]
    NotPrepared(&'static str),

    /// Invalid harness configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error reading configuration or case files
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed JSON
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl HarnessError {
    /// Device status carried by this error, if any
    #[must_use]
    pub fn status(&self) -> Option<DeviceStatus> {
        match self {
            Self::Setup { status, .. } | Self::Device { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_display_known_and_unknown() {
        assert_eq!(
            DeviceStatus::INVALID_BUFFER_SIZE.to_string(),
            "INVALID_BUFFER_SIZE (-61)"
        );
        assert_eq!(DeviceStatus(-9999).to_string(), "status -9999");
        assert!(DeviceStatus::SUCCESS.is_success());
        assert!(!DeviceStatus::EXEC_STATUS_ERROR.is_success());
    }

    #[test]
    fn test_device_error_message_names_step_and_code() {
        let err = HarnessError::Device {
            step: DeviceStep::Flush,
            status: DeviceStatus::INVALID_COMMAND_QUEUE,
        };
        let msg = err.to_string();
        assert!(msg.contains("queue flush"));
        assert!(msg.contains("-36"));
        assert_eq!(err.status(), Some(DeviceStatus::INVALID_COMMAND_QUEUE));
    }

    #[test]
    fn test_status_absent_for_config_errors() {
        let err = HarnessError::InvalidConfiguration("repetitions".to_string());
        assert!(err.status().is_none());
    }
}
