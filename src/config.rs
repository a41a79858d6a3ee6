use crate::freelist::MAX_FIRST_BUCKET_POWER;

/// Initialization parameters of a [`crate::ChunkedTlsf`].
///
/// ```
/// use chunked_tlsf::TlsfConfig;
///
/// let config = TlsfConfig::new(64 * 1024 * 1024)
///     .with_size_granularity(256)
///     .with_first_bucket_power(3);
///
/// assert_eq!(256, config.size_granularity);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TlsfConfig {
    /// Size in bytes of every chunk requested from the memory adapter. No single
    /// allocation can be bigger than this.
    pub chunk_size: u64,
    /// Every requested size is rounded up to a multiple of this.
    pub size_granularity: u64,
    /// Sizes up to 256 bytes are split into `1 << first_bucket_power` linear
    /// buckets.
    pub first_bucket_power: u32,
}

impl TlsfConfig {
    pub const DEFAULT_SIZE_GRANULARITY: u64 = 1;
    pub const DEFAULT_FIRST_BUCKET_POWER: u32 = 2;

    pub const fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            size_granularity: Self::DEFAULT_SIZE_GRANULARITY,
            first_bucket_power: Self::DEFAULT_FIRST_BUCKET_POWER,
        }
    }

    pub const fn with_size_granularity(mut self, size_granularity: u64) -> Self {
        self.size_granularity = size_granularity;
        self
    }

    pub const fn with_first_bucket_power(mut self, first_bucket_power: u32) -> Self {
        self.first_bucket_power = first_bucket_power;
        self
    }

    /// Panics if the parameters can't describe a working allocator.
    pub(crate) fn validate(&self) {
        assert!(self.chunk_size > 0, "chunk size can't be zero");
        assert!(self.size_granularity > 0, "size granularity can't be zero");
        assert!(
            self.size_granularity <= self.chunk_size,
            "size granularity {} is bigger than the chunk size {}",
            self.size_granularity,
            self.chunk_size
        );
        assert!(
            self.first_bucket_power <= MAX_FIRST_BUCKET_POWER,
            "first bucket power {} is above {MAX_FIRST_BUCKET_POWER}",
            self.first_bucket_power
        );
    }
}
