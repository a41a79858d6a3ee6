use crate::{chunk::ChunkId, pool::{Key, ObjectPool}};

/// Key of a [`Block`] record inside a [`BlockPool`].
pub type BlockKey = Key<Block>;

/// Pool the allocator takes its [`Block`] records from.
pub type BlockPool = ObjectPool<Block>;

/// Whether a block is handed out to the user or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Taken,
}

/// A contiguous range `[offset, offset + size)` of a single chunk.
///
/// Every block is part of the physical list of its chunk, which keeps the blocks
/// ordered by address. Free blocks (other than the null block) are also part of
/// exactly one free list bucket.
///
/// ```text
///              Chunk
/// +--------+--------+--------+----------------+
/// | Taken  |  Free  | Taken  |   Null block   |
/// +--------+---|----+--------+----------------+
///              |
///              +------> free list bucket for its size
/// ```
///
/// The links are keys into the [`BlockPool`] rather than pointers.
#[derive(Debug)]
pub struct Block {
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) state: BlockState,
    /// Chunk which the block belongs to
    pub(crate) chunk: ChunkId,

    pub(crate) prev_physical: Option<BlockKey>,
    pub(crate) next_physical: Option<BlockKey>,

    pub(crate) prev_free: Option<BlockKey>,
    pub(crate) next_free: Option<BlockKey>,
}

impl Block {
    /// New free block, not linked into any list yet.
    pub(crate) fn new(offset: u64, size: u64, chunk: ChunkId) -> Self {
        Self {
            offset,
            size,
            state: BlockState::Free,
            chunk,
            prev_physical: None,
            next_physical: None,
            prev_free: None,
            next_free: None,
        }
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn state(&self) -> BlockState {
        self.state
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// One past the last byte of the block.
    #[inline]
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Makes `inserted` the physical successor of `block`.
pub(crate) fn link_physical_after(blocks: &mut BlockPool, block: BlockKey, inserted: BlockKey) {
    let next = blocks[block].next_physical;

    blocks[inserted].prev_physical = Some(block);
    blocks[inserted].next_physical = next;
    if let Some(next) = next {
        blocks[next].prev_physical = Some(inserted);
    }
    blocks[block].next_physical = Some(inserted);
}

/// Makes `inserted` the physical predecessor of `block`.
pub(crate) fn link_physical_before(blocks: &mut BlockPool, block: BlockKey, inserted: BlockKey) {
    let prev = blocks[block].prev_physical;

    blocks[inserted].next_physical = Some(block);
    blocks[inserted].prev_physical = prev;
    if let Some(prev) = prev {
        blocks[prev].next_physical = Some(inserted);
    }
    blocks[block].prev_physical = Some(inserted);
}

/// Merges the physical successor of `block` into it and gives its record back to
/// the pool. Neither of them may be in a free list.
pub(crate) fn absorb_next(blocks: &mut BlockPool, block: BlockKey) {
    let Some(next) = blocks[block].next_physical else {
        panic!("{block:?} has no physical successor to merge with");
    };

    let absorbed = blocks.free(next);
    debug_assert_eq!(blocks[block].chunk, absorbed.chunk);
    debug_assert_eq!(blocks[block].end(), absorbed.offset);

    blocks[block].size += absorbed.size;
    blocks[block].next_physical = absorbed.next_physical;
    if let Some(next) = absorbed.next_physical {
        blocks[next].prev_physical = Some(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkPool};
    use crate::tlsf::tests::MockMemory;

    fn chunk_key() -> ChunkId {
        let mut chunks: ChunkPool<MockMemory> = ChunkPool::new(1);
        chunks.allocate(Chunk::new(0, 64)).cast()
    }

    #[test]
    fn physical_links_and_merge() {
        let chunk = chunk_key();
        let mut blocks = BlockPool::new(4);

        let a = blocks.allocate(Block::new(0, 16, chunk));
        let c = blocks.allocate(Block::new(32, 32, chunk));
        link_physical_after(&mut blocks, a, c);

        let b = blocks.allocate(Block::new(16, 16, chunk));
        link_physical_before(&mut blocks, c, b);

        assert_eq!(Some(b), blocks[a].next_physical);
        assert_eq!(Some(a), blocks[b].prev_physical);
        assert_eq!(Some(c), blocks[b].next_physical);
        assert_eq!(Some(b), blocks[c].prev_physical);

        absorb_next(&mut blocks, a);

        assert_eq!(32, blocks[a].size());
        assert_eq!(Some(c), blocks[a].next_physical);
        assert_eq!(Some(a), blocks[c].prev_physical);
        assert!(!blocks.contains(b));
        assert_eq!(2, blocks.len());
    }
}
