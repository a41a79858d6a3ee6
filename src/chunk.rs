use std::fmt;

use crate::{block::BlockKey, pool::{Key, ObjectPool}};

/// Key of a [`Chunk`] record inside a [`ChunkPool`].
pub type ChunkKey<M> = Key<Chunk<M>>;

/// Type-erased chunk key, stored by blocks so they don't depend on the adapter type.
pub(crate) type ChunkId = Key<()>;

/// Pool the allocator takes its [`Chunk`] records from.
pub type ChunkPool<M> = ObjectPool<Chunk<M>>;

/// Connects the allocator to whatever resource actually backs a chunk: a GPU heap,
/// an OS mapping, a file...
///
/// The allocator never touches the memory itself, it only asks the adapter to
/// create a chunk of a given size and to destroy it once the chunk isn't needed
/// anymore. See [`crate::VirtualMemory`] for an adapter over OS pages.
pub trait ChunkMemory {
    /// Handle to one unit of backing memory.
    type Memory: Clone;
    /// Creation flags, forwarded verbatim from [`crate::ChunkedTlsf::init`].
    type Flags: Copy + fmt::Debug;
    /// Caller context forwarded verbatim from every allocator call that may
    /// create or destroy memory.
    type UserData: ?Sized;
    /// The adapter's own failure signal.
    type Error;

    /// Creates `size` bytes of backing memory.
    fn init_memory(
        &mut self,
        flags: Self::Flags,
        size: u64,
        user_data: &mut Self::UserData,
    ) -> Result<Self::Memory, Self::Error>;

    /// Releases memory previously returned by [`ChunkMemory::init_memory`].
    fn destroy_memory(&mut self, memory: Self::Memory, user_data: &mut Self::UserData);
}

/// Lifecycle of the backing memory of a chunk.
///
/// ```text
///              first use                 destroy
/// Unbacked ---------------> Backed ----------------> Destroyed
///                             ^                          |
///                             +--------------------------+
///                                       reuse
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState<Memory> {
    /// The chunk exists but no memory was created for it yet.
    Unbacked,
    Backed(Memory),
    /// The memory was released, the record only survives because it still
    /// carries the null block.
    Destroyed,
}

/// One unit of externally created backing memory plus the flags it was created
/// with. Every chunk has the size configured at init.
pub struct Chunk<M: ChunkMemory + ?Sized> {
    pub(crate) flags: M::Flags,
    pub(crate) size: u64,
    pub(crate) state: ChunkState<M::Memory>,
    /// The block at offset 0. Merges always keep the lower block alive, so this
    /// never changes once set.
    pub(crate) first_block: Option<BlockKey>,
}

impl<M: ChunkMemory + ?Sized> Chunk<M> {
    pub(crate) fn new(flags: M::Flags, size: u64) -> Self {
        Self {
            flags,
            size,
            state: ChunkState::Unbacked,
            first_block: None,
        }
    }

    #[inline]
    pub fn flags(&self) -> M::Flags {
        self.flags
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn state(&self) -> &ChunkState<M::Memory> {
        &self.state
    }

    #[inline]
    pub fn is_backed(&self) -> bool {
        matches!(self.state, ChunkState::Backed(_))
    }

    /// Returns the backing memory, if there's any.
    pub fn memory(&self) -> Option<&M::Memory> {
        match &self.state {
            ChunkState::Backed(memory) => Some(memory),
            ChunkState::Unbacked | ChunkState::Destroyed => None,
        }
    }

    /// Creates the backing memory if the chunk doesn't have it.
    pub(crate) fn materialize(
        &mut self,
        adapter: &mut M,
        user_data: &mut M::UserData,
    ) -> Result<(), M::Error> {
        match self.state {
            ChunkState::Backed(_) => {}
            ChunkState::Unbacked | ChunkState::Destroyed => {
                log::debug!("creating {} bytes of chunk memory with {:?}", self.size, self.flags);
                let memory = adapter.init_memory(self.flags, self.size, user_data)?;
                self.state = ChunkState::Backed(memory);
            }
        }

        Ok(())
    }

    /// Hands the backing memory back to the adapter, if the chunk has any.
    pub(crate) fn release(&mut self, adapter: &mut M, user_data: &mut M::UserData) {
        match std::mem::replace(&mut self.state, ChunkState::Destroyed) {
            ChunkState::Backed(memory) => {
                log::debug!("destroying {} bytes of chunk memory", self.size);
                adapter.destroy_memory(memory, user_data);
            }
            // Never backed, there is nothing to give back.
            ChunkState::Unbacked => self.state = ChunkState::Unbacked,
            ChunkState::Destroyed => {}
        }
    }
}

impl<M> fmt::Debug for Chunk<M>
where
    M: ChunkMemory + ?Sized,
    M::Memory: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("flags", &self.flags)
            .field("size", &self.size)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlsf::tests::MockMemory;

    #[test]
    fn lifecycle() {
        let mut adapter = MockMemory::default();
        let mut chunk: Chunk<MockMemory> = Chunk::new(7, 128);

        assert_eq!(&ChunkState::Unbacked, chunk.state());

        chunk.materialize(&mut adapter, &mut ()).unwrap();
        assert!(chunk.is_backed());
        assert_eq!(Some(&0), chunk.memory());
        assert_eq!(vec![(7, 128)], adapter.created);

        // Already backed, nothing to do.
        chunk.materialize(&mut adapter, &mut ()).unwrap();
        assert_eq!(1, adapter.created.len());

        chunk.release(&mut adapter, &mut ());
        assert_eq!(&ChunkState::Destroyed, chunk.state());
        assert_eq!(vec![0], adapter.destroyed);

        chunk.materialize(&mut adapter, &mut ()).unwrap();
        assert_eq!(Some(&1), chunk.memory());
    }

    #[test]
    fn releasing_unbacked_chunk_is_a_noop() {
        let mut adapter = MockMemory::default();
        let mut chunk: Chunk<MockMemory> = Chunk::new(0, 128);

        chunk.release(&mut adapter, &mut ());

        assert_eq!(&ChunkState::Unbacked, chunk.state());
        assert!(adapter.destroyed.is_empty());
    }

    #[test]
    fn failed_creation_keeps_chunk_unbacked() {
        let mut adapter = MockMemory { fail: true, ..Default::default() };
        let mut chunk: Chunk<MockMemory> = Chunk::new(0, 128);

        assert!(chunk.materialize(&mut adapter, &mut ()).is_err());
        assert_eq!(&ChunkState::Unbacked, chunk.state());
    }
}
