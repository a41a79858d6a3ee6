//! Sub-allocates OS pages: every chunk is a fresh anonymous mapping and the
//! allocations are written through the returned regions.

use std::cell::RefCell;

use chunked_tlsf::{
    BlockPool, ChunkPool, ChunkedTlsf, MemoryError, PageAccess, TlsfConfig, VirtualMemory,
    page_size,
};

fn main() -> Result<(), MemoryError> {
    let chunk_size = page_size() as u64 * 16;

    let blocks = RefCell::new(BlockPool::new(64));
    let chunks = RefCell::new(ChunkPool::<VirtualMemory>::new(4));

    let mut tlsf = ChunkedTlsf::new(&blocks, &chunks, VirtualMemory::new());
    tlsf.init(PageAccess::ReadWrite, TlsfConfig::new(chunk_size).with_size_granularity(16));

    let mut allocations = Vec::new();
    for (i, size) in [100u64, 5000, 30000, 64, 40000, 12].into_iter().enumerate() {
        let allocation = tlsf.allocate(size, 64, &mut ())?;
        let region = tlsf.memory(&allocation);
        let offset = tlsf.offset(&allocation);

        // SAFETY: the allocation is inside the mapping and nobody else uses it.
        unsafe {
            let ptr = region.as_ptr().add(offset as usize);
            std::ptr::write_bytes(ptr, i as u8, size as usize);
            assert_eq!(i as u8, *ptr.add(size as usize - 1));
        }

        println!("{size:>6} bytes at offset {offset:>6} of the mapping at {:p}", region.as_ptr());
        allocations.push(allocation);
    }

    let stats = tlsf.statistics();
    println!(
        "{} chunks, {} bytes mapped, {} bytes allocated, {} bytes free",
        stats.chunk_count,
        tlsf.adapter().mapped_bytes(),
        stats.allocated_bytes,
        stats.free_bytes
    );

    for allocation in allocations {
        tlsf.free(allocation, &mut ());
    }
    tlsf.destroy_free_chunks(&mut ());

    println!("{} bytes still mapped", tlsf.adapter().mapped_bytes());

    Ok(())
}
