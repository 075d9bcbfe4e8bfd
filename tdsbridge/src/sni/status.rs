//! Native status code classification.
//!
//! Every native call reports a raw `u32` status. The magic values the
//! receive path keys on live here and nowhere else.

/// The native call completed.
pub const SUCCESS: u32 = 0;

/// `ERROR_IO_PENDING`: the operation is still in flight.
pub const IO_PENDING: u32 = 997;

/// `WAIT_TIMEOUT`: no completion within the call's wait window.
pub const WAIT_TIMEOUT: u32 = 258;

/// Classified outcome of a native status code.
///
/// [`IO_PENDING`] and [`WAIT_TIMEOUT`] both mean "no complete packet was
/// available within this call's wait window", so they collapse into one
/// retryable bucket. The raw constants stay distinct above; splitting them
/// apart again is a one-arm change here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The call completed.
    Success,
    /// Retryable: call again later.
    NoDataYet,
    /// Any other code. The session is assumed unusable.
    Fatal(u32),
}

impl Status {
    /// Map a raw native status into exactly one bucket.
    pub fn classify(code: u32) -> Status {
        match code {
            SUCCESS => Status::Success,
            IO_PENDING | WAIT_TIMEOUT => Status::NoDataYet,
            other => Status::Fatal(other),
        }
    }
}
