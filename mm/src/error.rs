//! Error type for the user-region / pinning subsystem.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    #[error("region has no segment covering the requested offset")]
    OutOfRange,
    #[error("region is not pinned")]
    NotPinned,
    #[error("pinning failed and the region is now FAILED")]
    PinningFailed,
    #[error("segment length is zero")]
    EmptySegment,
    #[error("region already has the maximum number of segments")]
    TooManySegments,
    #[error("requested length exceeds the region's total length")]
    LengthExceedsRegion,
}

pub type MmResult<T = ()> = Result<T, MmError>;
