//! Error types for mode negotiation and framebuffer lifecycle.

use thiserror::Error;

use crate::mailbox::MailboxError;

/// Errors surfaced by validation, commit and raster dispatch
#[derive(Debug, Error)]
pub enum FbError {
    /// Requested bits-per-pixel is outside {1, 2, 4, 8, 16, 32}
    #[error("unsupported color depth: {0} bits per pixel")]
    InvalidDepth(u32),

    /// Effective scanline count exceeds the platform maximum
    #[error("vertical total of {lines} lines exceeds maximum of {max}")]
    UnsupportedTiming { lines: u32, max: u32 },

    /// Shared descriptor or pixel memory could not be obtained
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// Firmware did not answer, answered with an error, or returned a
    /// buffer the host refuses to map
    #[error("coprocessor fault: {0}")]
    CoprocessorFault(#[from] CoprocessorFault),

    #[error("operation not supported: {0}")]
    UnsupportedOperation(&'static str),

    /// Color register index beyond the 256-entry register space
    #[error("color register {0} out of range")]
    ColorIndexOutOfRange(u32),

    /// Raster operation requested before a buffer was mapped
    #[error("no framebuffer is mapped")]
    NotMapped,

    /// Session has already been torn down
    #[error("framebuffer session is closed")]
    SessionClosed,
}

/// Ways a descriptor round-trip can fail after the request was sent
#[derive(Debug, Error)]
pub enum CoprocessorFault {
    #[error("mailbox transport: {0}")]
    Transport(#[from] MailboxError),

    /// Status word read back from the framebuffer channel was nonzero
    #[error("firmware returned status 0x{0:08x}")]
    Status(u32),

    /// Firmware response failed host-side sanity checks
    #[error("invalid firmware response: {0}")]
    InvalidResponse(String),

    /// Returned buffer could not be mapped into the host address space
    #[error("cannot map firmware buffer at 0x{base:08x} ({len} bytes)")]
    Unmappable { base: u32, len: usize },
}

impl FbError {
    /// Validation errors can be fixed by the caller and retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FbError::InvalidDepth(_)
                | FbError::UnsupportedTiming { .. }
                | FbError::CoprocessorFault(_)
                | FbError::ColorIndexOutOfRange(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, FbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_converts_to_coprocessor_fault() {
        let err: FbError = CoprocessorFault::from(MailboxError::Timeout).into();
        assert!(matches!(
            err,
            FbError::CoprocessorFault(CoprocessorFault::Transport(MailboxError::Timeout))
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_allocation_failure_is_fatal() {
        let err = FbError::AllocationFailure("descriptor".into());
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "allocation failed: descriptor");
    }
}
