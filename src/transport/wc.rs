use thiserror::Error;

/// Status of a work completion.
///
/// A subset of the ibverbs statuses that an emulated responder can produce.
/// The wire encoding is the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u8)]
pub enum WcStatus {
    /// **Operation completed successfully:** the WRITE was placed in remote
    /// memory and the local buffer may be reused.
    #[error("success")]
    Success = 0,

    /// **Local Length Error:** the message is larger than what the receiving
    /// side can take in one frame.
    #[error("local length error")]
    LocLenErr = 1,

    /// **Remote Access Error:** the rkey did not match or the span is outside
    /// the remote registered region.
    #[error("remote access error")]
    RemAccessErr = 2,

    /// **Work Request Flushed Error:** the request was outstanding when the
    /// connection went down. Raised locally, never sent in an ACK.
    #[error("WR flush error")]
    WrFlushErr = 3,

    /// **General Error:** other error which isn't one of the above errors.
    #[error("general error")]
    GeneralErr = 4,
}

impl WcStatus {
    /// Get the status as a `Result`.
    #[inline]
    pub fn ok(self) -> Result<(), WcStatus> {
        match self {
            WcStatus::Success => Ok(()),
            e => Err(e),
        }
    }
}

impl From<u8> for WcStatus {
    fn from(status: u8) -> Self {
        match status {
            0 => WcStatus::Success,
            1 => WcStatus::LocLenErr,
            2 => WcStatus::RemAccessErr,
            3 => WcStatus::WrFlushErr,
            _ => WcStatus::GeneralErr,
        }
    }
}
