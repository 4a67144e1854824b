//! Errors raised by the memory membrane.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("address {address:#x} with length {len} lies outside linear memory of {size} bytes")]
    OutOfBounds {
        address: usize,
        len: usize,
        size: usize,
    },
    #[error("out of foreign memory while allocating {size} bytes")]
    OutOfMemory { size: usize },
    #[error("linear memory cannot grow beyond {max_pages} pages")]
    GrowthLimit { max_pages: usize },
    #[error("region at {address:#x} has been freed")]
    Freed { address: usize },
    #[error("invalid alignment {align}")]
    InvalidAlignment { align: usize },
    #[error("no allocation starts at {address:#x}")]
    UnknownAllocation { address: usize },
    #[error("window of {len} bytes cannot hold a sub-window at {offset}+{sub_len}")]
    WindowOverrun {
        offset: usize,
        sub_len: usize,
        len: usize,
    },
    #[error("call context {id} is not the innermost active context")]
    ContextMismatch { id: u64 },
}
