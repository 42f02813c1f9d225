//! Error taxonomy shared by every fallible operation in the crate.

use core::fmt::{self, Display, Formatter};

/// Why a mapping, unmapping or fault-resolution request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// address outside the user region, or targeting a reserved window
    BadAddress,
    /// zero length, arithmetic overflow, or a partial unmap of an area
    BadLength,
    /// no free gap large enough below the top of the user region
    NoSpace,
    /// a FIXED request could not be honored at exactly the given address
    FixedConflict,
    /// the physical frame source is exhausted
    OutOfFrames,
    /// a fault that cannot be resolved; fatal to the faulting process
    AccessViolation,
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            VmError::BadAddress => write!(f, "bad address"),
            VmError::BadLength => write!(f, "bad length"),
            VmError::NoSpace => write!(f, "address space exhausted"),
            VmError::FixedConflict => write!(f, "fixed placement conflict"),
            VmError::OutOfFrames => write!(f, "out of physical frames"),
            VmError::AccessViolation => write!(f, "access violation"),
        }
    }
}

/// Result type used across the crate.
pub type VmResult<T> = Result<T, VmError>;
