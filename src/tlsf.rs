use std::{cell::RefCell, fmt, mem, thread};

use crate::{
    block::{
        absorb_next, link_physical_after, link_physical_before, Block, BlockKey, BlockPool,
        BlockState,
    },
    chunk::{Chunk, ChunkKey, ChunkMemory, ChunkPool},
    config::TlsfConfig,
    freelist::{BucketIndexer, FreeLists},
    utils::{align_up, round_up},
};

/// Handle to a live allocation. Only [`ChunkedTlsf::allocate`] creates them and
/// [`ChunkedTlsf::free`] consumes them.
pub struct Allocation {
    block: BlockKey,
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Allocation").field(&self.block).finish()
    }
}

/// Snapshot of the allocator usage, see [`ChunkedTlsf::statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TlsfStatistics {
    /// Chunk records held, with or without memory.
    pub chunk_count: usize,
    /// Chunks currently owning backing memory.
    pub backed_chunk_count: usize,
    pub allocation_count: usize,
    pub allocated_bytes: u64,
    /// Non-empty free blocks, the null block included.
    pub free_block_count: usize,
    pub free_bytes: u64,
    pub largest_free_block: u64,
    pub has_spare_chunk: bool,
}

/// Everything an operation needs besides the allocator state.
struct Env<'a, M: ChunkMemory> {
    blocks: &'a mut BlockPool,
    chunks: &'a mut ChunkPool<M>,
    adapter: &'a mut M,
    user_data: &'a mut M::UserData,
}

/// Allocator state, created by [`ChunkedTlsf::init`].
struct State<M: ChunkMemory> {
    flags: M::Flags,
    chunk_size: u64,
    granularity: u64,
    lists: FreeLists,
    /// Tail of the chunk being filled. Always free and never binned.
    null_block: BlockKey,
    chunks: Vec<ChunkKey<M>>,
    /// The only fully empty chunk allowed to keep its memory.
    spare_chunk: Option<ChunkKey<M>>,
    allocation_count: usize,
}

/// Two Level Segregated Fit allocator spanning several discontinuous chunks of
/// backing memory.
///
/// Chunks are requested from the [`ChunkMemory`] adapter when the allocations don't
/// fit in the existing ones, and given back when they become empty. A single empty
/// chunk is kept around to avoid creating and destroying memory over and over;
/// [`ChunkedTlsf::destroy_free_chunks`] releases it and must be called before
/// the allocator is dropped.
///
/// Block and chunk records come from two [`crate::ObjectPool`]s owned by the caller,
/// which may be shared between several allocators on the same thread.
pub struct ChunkedTlsf<'p, M: ChunkMemory> {
    block_pool: &'p RefCell<BlockPool>,
    chunk_pool: &'p RefCell<ChunkPool<M>>,
    adapter: M,
    state: Option<State<M>>,
}

impl<'p, M: ChunkMemory> ChunkedTlsf<'p, M> {
    /// Creates an allocator that needs [`ChunkedTlsf::init`] before use.
    pub fn new(
        block_pool: &'p RefCell<BlockPool>,
        chunk_pool: &'p RefCell<ChunkPool<M>>,
        adapter: M,
    ) -> Self {
        Self {
            block_pool,
            chunk_pool,
            adapter,
            state: None,
        }
    }

    /// Sets up the free lists and the first chunk. The chunk gets its memory on the
    /// first allocation.
    pub fn init(&mut self, flags: M::Flags, config: TlsfConfig) {
        assert!(self.state.is_none(), "allocator is already initialized");
        config.validate();

        let (block_pool, chunk_pool) = (self.block_pool, self.chunk_pool);
        let mut blocks = block_pool.borrow_mut();
        let mut chunks = chunk_pool.borrow_mut();

        let chunk = chunks.allocate(Chunk::new(flags, config.chunk_size));
        let null_block = blocks.allocate(Block::new(0, config.chunk_size, chunk.cast()));
        chunks[chunk].first_block = Some(null_block);

        let indexer = BucketIndexer::new(config.chunk_size, config.first_bucket_power);
        log::debug!(
            "tlsf init: {} byte chunks, granularity {}, {} buckets",
            config.chunk_size,
            config.size_granularity,
            indexer.bucket_count()
        );

        self.state = Some(State {
            flags,
            chunk_size: config.chunk_size,
            granularity: config.size_granularity,
            lists: FreeLists::new(indexer),
            null_block,
            chunks: vec![chunk],
            spare_chunk: None,
            allocation_count: 0,
        });
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Allocates `size` bytes aligned to `alignment` inside one of the chunks.
    ///
    /// # Panics
    ///
    /// If the allocator isn't initialized, `size` is zero or bigger than a chunk, or
    /// `alignment` isn't a power of two.
    ///
    /// # Errors
    ///
    /// Whatever the adapter returns when it fails to create a chunk. The allocator
    /// is left untouched in that case.
    pub fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        user_data: &mut M::UserData,
    ) -> Result<Allocation, M::Error> {
        let (block_pool, chunk_pool) = (self.block_pool, self.chunk_pool);
        let mut blocks = block_pool.borrow_mut();
        let mut chunks = chunk_pool.borrow_mut();

        let state = initialized_mut(&mut self.state);
        let mut env = Env {
            blocks: &mut *blocks,
            chunks: &mut *chunks,
            adapter: &mut self.adapter,
            user_data,
        };

        let block = state.allocate(&mut env, size, alignment)?;

        Ok(Allocation { block })
    }

    /// Gives an allocation back, merging it with its free neighbours.
    ///
    /// # Panics
    ///
    /// If the handle doesn't belong to this allocator.
    pub fn free(&mut self, allocation: Allocation, user_data: &mut M::UserData) {
        let (block_pool, chunk_pool) = (self.block_pool, self.chunk_pool);
        let mut blocks = block_pool.borrow_mut();
        let mut chunks = chunk_pool.borrow_mut();

        let state = initialized_mut(&mut self.state);
        let mut env = Env {
            blocks: &mut *blocks,
            chunks: &mut *chunks,
            adapter: &mut self.adapter,
            user_data,
        };

        state.free(&mut env, allocation.block);
    }

    /// Releases the memory of the spare chunk, if one is retained.
    pub fn destroy_free_chunks(&mut self, user_data: &mut M::UserData) {
        let (block_pool, chunk_pool) = (self.block_pool, self.chunk_pool);
        let mut blocks = block_pool.borrow_mut();
        let mut chunks = chunk_pool.borrow_mut();

        let state = initialized_mut(&mut self.state);
        let mut env = Env {
            blocks: &mut *blocks,
            chunks: &mut *chunks,
            adapter: &mut self.adapter,
            user_data,
        };

        state.destroy_free_chunks(&mut env);
    }

    /// Offset of the allocation inside its chunk.
    pub fn offset(&self, allocation: &Allocation) -> u64 {
        self.block_pool.borrow()[allocation.block].offset
    }

    /// Size of the allocation, after rounding to the size granularity.
    pub fn size(&self, allocation: &Allocation) -> u64 {
        self.block_pool.borrow()[allocation.block].size
    }

    /// Backing memory of the chunk the allocation lives in.
    pub fn memory(&self, allocation: &Allocation) -> M::Memory {
        let chunk: ChunkKey<M> = self.block_pool.borrow()[allocation.block].chunk.cast();

        match self.chunk_pool.borrow()[chunk].memory() {
            Some(memory) => memory.clone(),
            None => panic!("{allocation:?} lives in a chunk without memory"),
        }
    }

    /// Free bytes over all chunks, null block included.
    pub fn sum_free_memory(&self) -> u64 {
        initialized(&self.state).sum_free_size(&self.block_pool.borrow())
    }

    #[inline]
    pub fn chunk_size(&self) -> u64 {
        initialized(&self.state).chunk_size
    }

    #[inline]
    pub fn size_granularity(&self) -> u64 {
        initialized(&self.state).granularity
    }

    #[inline]
    pub fn adapter(&self) -> &M {
        &self.adapter
    }

    #[inline]
    pub fn adapter_mut(&mut self) -> &mut M {
        &mut self.adapter
    }

    /// Walks every chunk and gathers usage numbers.
    pub fn statistics(&self) -> TlsfStatistics {
        let state = initialized(&self.state);
        let blocks = self.block_pool.borrow();
        let chunks = self.chunk_pool.borrow();

        let mut stats = TlsfStatistics {
            chunk_count: state.chunks.len(),
            allocation_count: state.allocation_count,
            free_bytes: state.sum_free_size(&blocks),
            has_spare_chunk: state.spare_chunk.is_some(),
            ..Default::default()
        };

        for chunk in &state.chunks {
            let record = &chunks[*chunk];
            if record.is_backed() {
                stats.backed_chunk_count += 1;
            }

            let mut current = record.first_block;
            while let Some(key) = current {
                let block = &blocks[key];
                match block.state {
                    BlockState::Taken => stats.allocated_bytes += block.size,
                    BlockState::Free if block.size > 0 => {
                        stats.free_block_count += 1;
                        stats.largest_free_block = stats.largest_free_block.max(block.size);
                    }
                    BlockState::Free => {}
                }
                current = block.next_physical;
            }
        }

        stats
    }

    /// Checks every invariant of the allocator, panicking on the first broken one.
    pub fn validate(&self) {
        let state = initialized(&self.state);
        state.validate(&self.block_pool.borrow(), &self.chunk_pool.borrow());
    }
}

impl<M: ChunkMemory> Drop for ChunkedTlsf<'_, M> {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        if thread::panicking() {
            return;
        }

        let mut blocks = self.block_pool.borrow_mut();
        let mut chunks = self.chunk_pool.borrow_mut();

        if state.allocation_count > 0 {
            log::error!("tlsf dropped with {} live allocations", state.allocation_count);
            panic!("memory leak: {} allocations are still alive", state.allocation_count);
        }

        let backed = state.chunks.iter().filter(|chunk| chunks[**chunk].is_backed()).count();
        if backed > 0 {
            log::error!("tlsf dropped with {backed} chunks still owning memory");
            panic!("memory leak: {backed} chunks still own memory, call destroy_free_chunks first");
        }

        let null = &blocks[state.null_block];
        assert!(
            state.chunks.len() == 1 && null.offset == 0 && null.size == state.chunk_size,
            "memory leak: expected a single empty chunk, found {} chunks",
            state.chunks.len()
        );

        blocks.free(state.null_block);
        chunks.free(state.chunks[0]);
    }
}

impl<M: ChunkMemory> State<M> {
    fn sum_free_size(&self, blocks: &BlockPool) -> u64 {
        self.lists.size() + blocks[self.null_block].size
    }

    #[inline]
    fn chunk_of(blocks: &BlockPool, block: BlockKey) -> ChunkKey<M> {
        blocks[block].chunk.cast::<Chunk<M>>()
    }

    fn first_block(chunks: &ChunkPool<M>, chunk: ChunkKey<M>) -> BlockKey {
        match chunks[chunk].first_block {
            Some(block) => block,
            None => unreachable!("{chunk:?} has no blocks"),
        }
    }

    fn allocate(
        &mut self,
        env: &mut Env<'_, M>,
        size: u64,
        alignment: u64,
    ) -> Result<BlockKey, M::Error> {
        assert!(size > 0, "allocation size can't be zero");
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
        assert!(
            size <= self.chunk_size,
            "allocation of {size} bytes doesn't fit in {} byte chunks",
            self.chunk_size
        );

        let size = round_up(size, self.granularity);
        assert!(
            size <= self.chunk_size,
            "allocation of {size} bytes doesn't fit in {} byte chunks",
            self.chunk_size
        );

        // Not enough free bytes anywhere, don't bother searching.
        let candidate = if size > self.sum_free_size(env.blocks) {
            None
        } else {
            self.find_free_block(env.blocks, size, alignment)
        };

        let block = match candidate {
            Some(block) => {
                let chunk = Self::chunk_of(env.blocks, block);
                env.chunks[chunk].materialize(env.adapter, env.user_data)?;
                block
            }
            None => self.open_chunk(env)?,
        };

        self.take(env, block, size, alignment);
        self.allocation_count += 1;

        log::trace!(
            "allocated {size} bytes at offset {} of {:?}",
            env.blocks[block].offset,
            env.blocks[block].chunk
        );

        Ok(block)
    }

    /// Tells whether `block` can hold `size` bytes once aligned.
    fn fits(blocks: &BlockPool, block: BlockKey, size: u64, alignment: u64) -> bool {
        let block = &blocks[block];
        let padding = align_up(block.offset, alignment) - block.offset;

        block.size >= size + padding
    }

    /// First fit inside a single bucket.
    fn search_bucket(
        &self,
        blocks: &BlockPool,
        bucket: usize,
        size: u64,
        alignment: u64,
    ) -> Option<BlockKey> {
        let mut current = self.lists.head(bucket);

        while let Some(block) = current {
            if Self::fits(blocks, block, size, alignment) {
                return Some(block);
            }
            current = blocks[block].next_free;
        }

        None
    }

    fn find_free_block(&self, blocks: &BlockPool, size: u64, alignment: u64) -> Option<BlockKey> {
        let null_fits = || Self::fits(blocks, self.null_block, size, alignment);

        if self.lists.count() == 0 {
            return null_fits().then_some(self.null_block);
        }

        // Every block one bucket up is big enough, only the alignment can fail.
        let next_size = self.lists.indexer().next_bucket_size(size);
        if let Some(bucket) = self.lists.find_first(next_size) {
            if let Some(block) = self.search_bucket(blocks, bucket, size, alignment) {
                return Some(block);
            }
        }

        if null_fits() {
            return Some(self.null_block);
        }

        // The exact bucket may still hold something big enough.
        if let Some(bucket) = self.lists.find_first(size) {
            if let Some(block) = self.search_bucket(blocks, bucket, size, alignment) {
                return Some(block);
            }
        }

        // Worst case, look at everything.
        let first = self.lists.indexer().bucket_of(size);
        (first..self.lists.indexer().bucket_count())
            .find_map(|bucket| self.search_bucket(blocks, bucket, size, alignment))
    }

    /// Creates a new chunk and makes its single block the null block.
    fn open_chunk(&mut self, env: &mut Env<'_, M>) -> Result<BlockKey, M::Error> {
        // Memory first, a failing adapter must leave everything untouched.
        let mut record = Chunk::new(self.flags, self.chunk_size);
        record.materialize(env.adapter, env.user_data)?;

        let chunk = env.chunks.allocate(record);
        let block = env.blocks.allocate(Block::new(0, self.chunk_size, chunk.cast()));
        env.chunks[chunk].first_block = Some(block);
        self.chunks.push(chunk);

        log::debug!("opened chunk {chunk:?}, {} chunks in use", self.chunks.len());

        let previous = mem::replace(&mut self.null_block, block);
        self.retire_null_block(env, previous);

        Ok(block)
    }

    /// Turns the null block of a chunk that is no longer being filled into a
    /// regular block.
    fn retire_null_block(&mut self, env: &mut Env<'_, M>, null: BlockKey) {
        let size = env.blocks[null].size;
        // A whole chunk null block fits every request, no new chunk is opened then.
        debug_assert_ne!(self.chunk_size, size, "retiring the null block of an empty chunk");

        if size > 0 {
            self.lists.insert(env.blocks, null);
        } else {
            let retired = env.blocks.free(null);
            if let Some(prev) = retired.prev_physical {
                env.blocks[prev].next_physical = None;
            }
        }
    }

    /// Marks `size` bytes of `block` as taken, splitting off the alignment padding
    /// before it and the unused bytes after it.
    fn take(&mut self, env: &mut Env<'_, M>, block: BlockKey, size: u64, alignment: u64) {
        let is_null = block == self.null_block;
        if !is_null {
            self.lists.remove(env.blocks, block);
        }

        let (offset, chunk) = (env.blocks[block].offset, env.blocks[block].chunk);
        let padding = align_up(offset, alignment) - offset;

        if padding > 0 {
            // Offset 0 is always aligned and free neighbours are always merged,
            // so the block before us exists and is taken.
            debug_assert!(
                env.blocks[block].prev_physical.is_some_and(|prev| !env.blocks[prev].is_free()),
                "padding of {block:?} next to a free block"
            );

            let gap = env.blocks.allocate(Block::new(offset, padding, chunk));
            link_physical_before(env.blocks, block, gap);
            self.lists.insert(env.blocks, gap);

            let current = &mut env.blocks[block];
            current.offset += padding;
            current.size -= padding;
        }

        let (offset, available) = (env.blocks[block].offset, env.blocks[block].size);

        if available == size {
            if is_null {
                // The chunk is full, its null block becomes an empty tail.
                let tail = env.blocks.allocate(Block::new(offset + size, 0, chunk));
                link_physical_after(env.blocks, block, tail);
                self.null_block = tail;
            }
        } else {
            let rest = env.blocks.allocate(Block::new(offset + size, available - size, chunk));
            link_physical_after(env.blocks, block, rest);
            env.blocks[block].size = size;

            if is_null {
                self.null_block = rest;
            } else {
                self.lists.insert(env.blocks, rest);
            }
        }

        env.blocks[block].state = BlockState::Taken;

        if self.spare_chunk == Some(chunk.cast::<Chunk<M>>()) {
            log::debug!("spare chunk {chunk:?} is back in use");
            self.spare_chunk = None;
        }
    }

    fn free(&mut self, env: &mut Env<'_, M>, block: BlockKey) {
        // Pools may be shared, the block must also sit in one of our chunks.
        let owned = env
            .blocks
            .get(block)
            .is_some_and(|record| self.chunks.contains(&record.chunk.cast::<Chunk<M>>()));
        assert!(owned, "{block:?} is not a live allocation of this allocator");

        let record = &mut env.blocks[block];
        assert_eq!(BlockState::Taken, record.state, "double free of {block:?}");

        record.state = BlockState::Free;
        self.allocation_count -= 1;

        log::trace!(
            "freeing {} bytes at offset {} of {:?}",
            record.size,
            record.offset,
            record.chunk
        );

        let mut block = block;

        if let Some(prev) = env.blocks[block].prev_physical {
            if env.blocks[prev].is_free() {
                self.lists.remove(env.blocks, prev);
                absorb_next(env.blocks, prev);
                block = prev;
            }
        }

        match env.blocks[block].next_physical {
            Some(next) if next == self.null_block => {
                absorb_next(env.blocks, block);
                self.null_block = block;
            }
            Some(next) if env.blocks[next].is_free() => {
                self.lists.remove(env.blocks, next);
                absorb_next(env.blocks, block);
                self.lists.insert(env.blocks, block);
            }
            _ => self.lists.insert(env.blocks, block),
        }

        if env.blocks[block].size == self.chunk_size {
            self.chunk_emptied(env, block);
        }
    }

    /// `block` spans its whole chunk: keep the chunk as the spare or destroy it.
    fn chunk_emptied(&mut self, env: &mut Env<'_, M>, block: BlockKey) {
        let chunk = Self::chunk_of(env.blocks, block);

        let null_chunk = Self::chunk_of(env.blocks, self.null_block);
        if block != self.null_block
            && env.blocks[self.null_block].size == self.chunk_size
            && !env.chunks[null_chunk].is_backed()
        {
            // The null chunk has no memory left, this one takes over its role.
            log::debug!("{chunk:?} replaces the empty null chunk {null_chunk:?}");
            self.lists.remove(env.blocks, block);
            let stale = mem::replace(&mut self.null_block, block);
            self.release_chunk(env, null_chunk, stale);
        }

        let Some(spare) = self.spare_chunk else {
            log::debug!("keeping empty chunk {chunk:?} as spare");
            self.spare_chunk = Some(chunk);
            return;
        };

        debug_assert_ne!(spare, chunk);

        if block == self.null_block {
            // The null block moves to the spare, which is as empty as this one.
            let spare_block = Self::first_block(env.chunks, spare);
            self.lists.remove(env.blocks, spare_block);
            self.null_block = spare_block;
        } else {
            self.lists.remove(env.blocks, block);
        }

        self.release_chunk(env, chunk, block);
    }

    /// Destroys the memory of `chunk` and gives back its records. `block` must be
    /// its only block, already out of the free lists.
    fn release_chunk(&mut self, env: &mut Env<'_, M>, chunk: ChunkKey<M>, block: BlockKey) {
        debug_assert_eq!(Some(block), env.chunks[chunk].first_block);
        debug_assert_ne!(block, self.null_block);

        env.blocks.free(block);
        let mut record = env.chunks.free(chunk);
        record.release(env.adapter, env.user_data);

        self.chunks.retain(|other| *other != chunk);
        if self.spare_chunk == Some(chunk) {
            self.spare_chunk = None;
        }

        log::debug!("released chunk {chunk:?}, {} chunks left", self.chunks.len());
    }

    fn destroy_free_chunks(&mut self, env: &mut Env<'_, M>) {
        let Some(spare) = self.spare_chunk.take() else {
            return;
        };

        let block = Self::first_block(env.chunks, spare);

        if block == self.null_block {
            // The record stays, it still holds the null block.
            env.chunks[spare].release(env.adapter, env.user_data);
        } else {
            self.lists.remove(env.blocks, block);
            self.release_chunk(env, spare, block);
        }
    }

    fn validate(&self, blocks: &BlockPool, chunks: &ChunkPool<M>) {
        let mut null_blocks = 0;
        let mut binned_count = 0;
        let mut binned_size = 0;
        let mut taken_count = 0;
        let mut empty_chunks = 0;

        for chunk in &self.chunks {
            let record = &chunks[*chunk];
            assert_eq!(self.chunk_size, record.size, "{chunk:?} has the wrong size");

            let mut expected_offset = 0;
            let mut prev: Option<BlockKey> = None;
            let mut current = record.first_block;
            let mut taken_in_chunk = 0;

            while let Some(key) = current {
                let block = &blocks[key];

                assert_eq!(
                    block.chunk,
                    chunk.cast::<()>(),
                    "{key:?} is linked into a foreign chunk"
                );
                assert_eq!(block.prev_physical, prev, "{key:?} has a broken physical link");
                assert_eq!(block.offset, expected_offset, "{key:?} is not contiguous");

                if key == self.null_block {
                    null_blocks += 1;
                    assert!(block.is_free(), "null block is taken");
                    assert!(
                        block.next_physical.is_none(),
                        "null block is not the tail of its chunk"
                    );
                    assert!(
                        block.prev_free.is_none() && block.next_free.is_none(),
                        "null block is binned"
                    );
                } else {
                    assert!(block.size > 0, "{key:?} is empty");

                    match block.state {
                        BlockState::Free => {
                            binned_count += 1;
                            binned_size += block.size;
                        }
                        BlockState::Taken => taken_in_chunk += 1,
                    }
                }

                if let Some(prev) = prev {
                    assert!(
                        !(blocks[prev].is_free() && block.is_free() && block.size > 0),
                        "{prev:?} and {key:?} are free neighbours"
                    );
                }

                expected_offset += block.size;
                prev = Some(key);
                current = block.next_physical;
            }

            assert_eq!(self.chunk_size, expected_offset, "{chunk:?} blocks don't cover it");

            if taken_in_chunk > 0 {
                assert!(record.is_backed(), "{chunk:?} holds allocations without memory");
            } else {
                empty_chunks += 1;
            }
            taken_count += taken_in_chunk;
        }

        assert_eq!(1, null_blocks, "there must be exactly one null block");
        assert_eq!(self.allocation_count, taken_count, "allocation count is off");
        assert!(empty_chunks <= 1, "{empty_chunks} chunks are empty");

        if let Some(spare) = self.spare_chunk {
            assert!(self.chunks.contains(&spare), "spare chunk is not in use");
            let block = &blocks[Self::first_block(chunks, spare)];
            assert!(block.is_free() && block.size == self.chunk_size, "spare chunk is not empty");
        }

        // Walk the buckets themselves.
        let indexer = self.lists.indexer();
        let mut listed = 0;
        for bucket in 0..indexer.bucket_count() {
            let mut prev = None;
            let mut current = self.lists.head(bucket);

            while let Some(key) = current {
                let block = &blocks[key];

                assert!(block.is_free(), "{key:?} is taken but binned");
                assert_ne!(key, self.null_block, "null block is binned");
                assert_eq!(bucket, indexer.bucket_of(block.size), "{key:?} is in the wrong bucket");
                assert_eq!(prev, block.prev_free, "{key:?} has a broken free link");

                listed += 1;
                prev = Some(key);
                current = block.next_free;
            }
        }

        assert_eq!(binned_count, listed, "free blocks missing from the buckets");
        assert_eq!(binned_count, self.lists.count(), "free block count is off");
        assert_eq!(binned_size, self.lists.size(), "free byte counter is off");
        self.lists.validate_bitmaps();
    }
}

fn initialized<M: ChunkMemory>(state: &Option<State<M>>) -> &State<M> {
    match state {
        Some(state) => state,
        None => panic!("allocator used before init"),
    }
}

fn initialized_mut<M: ChunkMemory>(state: &mut Option<State<M>>) -> &mut State<M> {
    match state {
        Some(state) => state,
        None => panic!("allocator used before init"),
    }
}
