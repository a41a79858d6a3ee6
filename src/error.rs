use std::io;

use thiserror::Error;

/// Failures of the [`crate::VirtualMemory`] adapter.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("could not map {size} bytes of virtual memory: {source}")]
    MapFailed { size: u64, source: io::Error },
    #[error("chunk size {0} does not fit in the address space")]
    TooLarge(u64),
}
