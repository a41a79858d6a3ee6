//! Two Level Segregated Fit sub-allocator over chunks of externally created memory.
//!
//! The allocator never reads or writes the memory it manages. It hands out
//! `(chunk memory, offset, size)` triples and relies on a [`ChunkMemory`] adapter
//! to create and destroy the chunks, which makes it usable for GPU heaps, file
//! regions or plain OS pages alike.
//!
//! ```text
//!            ChunkedTlsf
//!                 |
//!     +-----------+------------+
//!     |           |            |
//! +-------+   +-------+    +-------+
//! | Chunk |   | Chunk |    | Chunk |     created and destroyed on demand
//! +-------+   +-------+    +-------+     through the ChunkMemory adapter
//!   |  |        |   |        |
//!  blocks     blocks       blocks        records taken from shared ObjectPools
//! ```
//!
//! Blocks and chunk records live in [`ObjectPool`]s owned by the caller, so
//! several allocators can share them:
//!
//! ```
//! use std::cell::RefCell;
//!
//! use chunked_tlsf::{BlockPool, ChunkPool, ChunkedTlsf, PageAccess, TlsfConfig, VirtualMemory};
//!
//! let blocks = RefCell::new(BlockPool::new(64));
//! let chunks = RefCell::new(ChunkPool::<VirtualMemory>::new(4));
//!
//! let mut tlsf = ChunkedTlsf::new(&blocks, &chunks, VirtualMemory::new());
//! tlsf.init(PageAccess::ReadWrite, TlsfConfig::new(1 << 20));
//!
//! let allocation = tlsf.allocate(1000, 64, &mut ()).unwrap();
//! assert_eq!(0, tlsf.offset(&allocation) % 64);
//!
//! tlsf.free(allocation, &mut ());
//! tlsf.destroy_free_chunks(&mut ());
//! ```

mod block;
mod chunk;
mod config;
mod error;
mod freelist;
mod kernel;
mod pool;
mod tlsf;
pub mod utils;

pub use block::{Block, BlockKey, BlockPool, BlockState};
pub use chunk::{Chunk, ChunkKey, ChunkMemory, ChunkPool, ChunkState};
pub use config::TlsfConfig;
pub use error::MemoryError;
pub use kernel::{page_size, PageAccess, VirtualMemory, VirtualRegion};
pub use pool::{Key, ObjectPool};
pub use tlsf::{Allocation, ChunkedTlsf, TlsfStatistics};
