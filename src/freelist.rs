use crate::{
    block::{BlockKey, BlockPool},
    utils::bit_scan_msb,
};

/// log2 of the number of second level buckets in every memory class.
pub(crate) const SECOND_LEVEL_INDEX: u32 = 5;

/// Sizes up to this one are binned linearly into the small buckets.
pub(crate) const SMALL_BUFFER_SIZE: u64 = 256;

/// Sizes above [`SMALL_BUFFER_SIZE`] start at this power of two minus one.
const MEMORY_CLASS_SHIFT: u32 = 7;

/// Upper bound on memory classes for 64 bit sizes.
const MAX_MEMORY_CLASSES: u32 = 65 - MEMORY_CLASS_SHIFT;

/// Largest accepted `first_bucket_power`, the small buckets share a 32 bit
/// second level bitmap.
pub(crate) const MAX_FIRST_BUCKET_POWER: u32 = 5;

/// Maps sizes to free list buckets.
///
/// Small sizes go into `1 << first_bucket_power` linear buckets. Bigger sizes are
/// grouped by power of two (the memory class) and every class is split again into
/// `1 << SECOND_LEVEL_INDEX` buckets.
///
/// ```text
///               first_bucket_power = 2
///
///                  1..=64     65..=128   129..=192  193..=256
///              +----------+----------+----------+----------+
/// Class 0      |    0     |    1     |    2     |    3     |
///              +----------+----------+----------+----------+
///
///                257..263   264..271       ...      504..511
///              +----------+----------+----------+----------+
/// Class 1      |    4     |    5     |   ...    |    35    |     32 buckets
///              +----------+----------+----------+----------+
///
///                512..527   528..543       ...     1008..1023
///              +----------+----------+----------+----------+
/// Class 2      |    36    |    37    |   ...    |    67    |
///              +----------+----------+----------+----------+
/// ```
#[derive(Debug, Clone, Copy)]
pub(crate) struct BucketIndexer {
    small_buckets: u32,
    small_step: u64,
    memory_classes: u32,
    buckets: usize,
}

impl BucketIndexer {
    /// Builds the indexer able to bin every size up to `max_size`.
    pub fn new(max_size: u64, first_bucket_power: u32) -> Self {
        assert!(
            first_bucket_power <= MAX_FIRST_BUCKET_POWER,
            "first bucket power {first_bucket_power} is above {MAX_FIRST_BUCKET_POWER}"
        );

        let small_buckets = 1 << first_bucket_power;
        let small_step = SMALL_BUFFER_SIZE >> first_bucket_power;

        // One spare class for the round up done by `next_bucket_size`.
        let memory_classes = (Self::memory_class(max_size) + 2).min(MAX_MEMORY_CLASSES);
        let buckets =
            (memory_classes as usize - 1) * (1 << SECOND_LEVEL_INDEX) + 1 + small_buckets as usize;

        Self {
            small_buckets,
            small_step,
            memory_classes,
            buckets,
        }
    }

    #[inline]
    pub fn memory_classes(&self) -> usize {
        self.memory_classes as usize
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    #[inline]
    pub fn memory_class(size: u64) -> u32 {
        if size > SMALL_BUFFER_SIZE {
            bit_scan_msb(size) - MEMORY_CLASS_SHIFT
        } else {
            0
        }
    }

    #[inline]
    pub fn second_index(&self, size: u64, memory_class: u32) -> u32 {
        if memory_class == 0 {
            ((size - 1) / self.small_step) as u32
        } else {
            let shift = memory_class + MEMORY_CLASS_SHIFT - SECOND_LEVEL_INDEX;
            ((size >> shift) ^ (1 << SECOND_LEVEL_INDEX)) as u32
        }
    }

    #[inline]
    pub fn bucket(&self, memory_class: u32, second_index: u32) -> usize {
        if memory_class == 0 {
            second_index as usize
        } else {
            let class_base = (memory_class as usize - 1) * (1 << SECOND_LEVEL_INDEX);
            class_base + second_index as usize + self.small_buckets as usize
        }
    }

    /// Bucket a free block of `size` bytes lives in.
    #[inline]
    pub fn bucket_of(&self, size: u64) -> usize {
        debug_assert!(size > 0, "zero sized blocks are never binned");
        let memory_class = Self::memory_class(size);
        self.bucket(memory_class, self.second_index(size, memory_class))
    }

    /// Smallest size whose bucket only holds blocks of at least `size` bytes.
    pub fn next_bucket_size(&self, size: u64) -> u64 {
        if size > SMALL_BUFFER_SIZE {
            size + (1 << (bit_scan_msb(size) - SECOND_LEVEL_INDEX))
        } else if size > SMALL_BUFFER_SIZE - self.small_step {
            SMALL_BUFFER_SIZE + 1
        } else {
            size + self.small_step
        }
    }
}

/// Segregated free lists with the two level bitmap on top of them.
///
/// The first level has one bit per memory class, set when any bucket of the class
/// is non-empty. The second level has, for every class, one bit per bucket.
///
/// ```text
///               +---+---+---+---+
/// Level 0:      | 1 | 0 | 0 | 1 |
///               +-+-+---+---+-+-+
///                 |           |
///                 |           |      +---+---+---+---+
/// Level 1:        |           +----->| 0 | 1 | 0 | 0 |   class 3
///                 |                  +---+---+---+---+
///                 |                  +---+---+---+---+
///                 +----------------->| 0 | 0 | 0 | 1 |   class 0
///                                    +---+---+---+---+
/// ```
///
/// Every bucket is a doubly linked list threaded through the `prev_free` and
/// `next_free` links of the blocks. New blocks are pushed at the head.
pub(crate) struct FreeLists {
    indexer: BucketIndexer,
    heads: Vec<Option<BlockKey>>,
    is_free_bitmap: u64,
    inner_is_free_bitmap: Vec<u32>,
    /// Number of blocks in all the buckets.
    count: usize,
    /// Sum of the sizes of all the blocks in the buckets.
    size: u64,
}

impl FreeLists {
    pub fn new(indexer: BucketIndexer) -> Self {
        Self {
            heads: vec![None; indexer.bucket_count()],
            inner_is_free_bitmap: vec![0; indexer.memory_classes()],
            is_free_bitmap: 0,
            count: 0,
            size: 0,
            indexer,
        }
    }

    #[inline]
    pub fn indexer(&self) -> &BucketIndexer {
        &self.indexer
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn head(&self, bucket: usize) -> Option<BlockKey> {
        self.heads[bucket]
    }

    /// Pushes a free `block` at the head of the bucket for its size.
    pub fn insert(&mut self, blocks: &mut BlockPool, block: BlockKey) {
        debug_assert!(blocks[block].is_free());

        let size = blocks[block].size;
        let memory_class = BucketIndexer::memory_class(size);
        let second_index = self.indexer.second_index(size, memory_class);
        let bucket = self.indexer.bucket(memory_class, second_index);

        let head = self.heads[bucket];
        blocks[block].prev_free = None;
        blocks[block].next_free = head;
        self.heads[bucket] = Some(block);

        match head {
            Some(head) => blocks[head].prev_free = Some(block),
            None => {
                self.inner_is_free_bitmap[memory_class as usize] |= 1 << second_index;
                self.is_free_bitmap |= 1 << memory_class;
            }
        }

        self.count += 1;
        self.size += size;
    }

    /// Unlinks `block` from its bucket. The block must be in one.
    pub fn remove(&mut self, blocks: &mut BlockPool, block: BlockKey) {
        let (prev, next, size) = {
            let block = &blocks[block];
            (block.prev_free, block.next_free, block.size)
        };

        if let Some(next) = next {
            blocks[next].prev_free = prev;
        }

        match prev {
            Some(prev) => blocks[prev].next_free = next,
            None => {
                let memory_class = BucketIndexer::memory_class(size);
                let second_index = self.indexer.second_index(size, memory_class);
                let bucket = self.indexer.bucket(memory_class, second_index);

                assert_eq!(Some(block), self.heads[bucket], "{block:?} is not in its free list");
                self.heads[bucket] = next;

                if next.is_none() {
                    let inner = &mut self.inner_is_free_bitmap[memory_class as usize];
                    *inner &= !(1 << second_index);
                    if *inner == 0 {
                        self.is_free_bitmap &= !(1 << memory_class);
                    }
                }
            }
        }

        blocks[block].prev_free = None;
        blocks[block].next_free = None;

        self.count -= 1;
        self.size -= size;
    }

    /// Finds the first non-empty bucket at or above the bucket of `size`.
    pub fn find_first(&self, size: u64) -> Option<usize> {
        let mut memory_class = BucketIndexer::memory_class(size);
        if memory_class as usize >= self.inner_is_free_bitmap.len() {
            return None;
        }

        let second_index = self.indexer.second_index(size, memory_class);
        let mut inner = self.inner_is_free_bitmap[memory_class as usize] & (!0u32 << second_index);

        if inner == 0 {
            // Nothing left in this class, look at the bigger ones.
            let outer = self.is_free_bitmap & (!0u64 << (memory_class + 1));
            if outer == 0 {
                return None;
            }

            memory_class = outer.trailing_zeros();
            inner = self.inner_is_free_bitmap[memory_class as usize];
        }

        Some(self.indexer.bucket(memory_class, inner.trailing_zeros()))
    }

    /// Asserts the bitmaps agree with the bucket heads.
    pub fn validate_bitmaps(&self) {
        for (memory_class, inner) in self.inner_is_free_bitmap.iter().enumerate() {
            let class_bit = self.is_free_bitmap & (1 << memory_class) != 0;
            assert_eq!(*inner != 0, class_bit, "memory class {memory_class} bit out of sync");

            let second_level = if memory_class == 0 {
                self.indexer.small_buckets
            } else {
                1 << SECOND_LEVEL_INDEX
            };

            for second_index in 0..second_level {
                let bucket = self.indexer.bucket(memory_class as u32, second_index);
                let bit = inner & (1 << second_index) != 0;
                assert_eq!(self.heads[bucket].is_some(), bit, "bucket {bucket} bit out of sync");
            }
        }
    }
}
