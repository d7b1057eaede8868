use std::fmt;

use failure::Fail;

pub use failure::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Fail, PartialEq)]
pub enum AttackError {
    #[fail(display = "unable to detect the oracle's block size")]
    BlockSizeNotDetected,

    #[fail(display = "oracle does not encrypt in ECB mode")]
    ModeNotEcb,

    #[fail(display = "unable to align past the oracle's prefix")]
    PrefixAlignmentFailed,

    #[fail(display = "no candidate reproduced the target block at position {}", position)]
    ByteRecoveryFailed { position: usize },

    #[fail(display = "no candidate produced valid padding for byte {} of block {}", byte, block)]
    PaddingByteRecoveryFailed { block: usize, byte: usize },

    #[fail(display = "attack cancelled")]
    Cancelled,
}

/// A transport or I/O failure raised by the oracle itself. Oracle errors are
/// fatal for the attack in progress and are never retried.
#[derive(Debug)]
pub struct OracleQueryFailed {
    cause: Error,
}

impl OracleQueryFailed {
    pub fn new(cause: Error) -> Self {
        OracleQueryFailed { cause }
    }
}

impl Fail for OracleQueryFailed {
    fn cause(&self) -> Option<&dyn Fail> {
        Some(self.cause.as_fail())
    }
}

impl fmt::Display for OracleQueryFailed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "oracle query failed")
    }
}

pub fn oracle_query_failed(cause: Error) -> Error {
    OracleQueryFailed::new(cause).into()
}

/// A failed recovery still surfaces every byte recovered before the failure;
/// no byte is ever guessed to paper over a dead end.
#[derive(Debug)]
pub struct RecoveryError {
    pub recovered: Vec<u8>,
    pub error: Error,
}

impl Fail for RecoveryError {
    fn cause(&self) -> Option<&dyn Fail> {
        Some(self.error.as_fail())
    }
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} bytes recovered)", self.error, self.recovered.len())
    }
}

impl RecoveryError {
    /// The typed attack error underneath, if there is one.
    pub fn attack_error(&self) -> Option<&AttackError> {
        self.error.downcast_ref::<AttackError>()
    }
}
