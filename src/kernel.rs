use std::{ptr::NonNull, sync::OnceLock};

use crate::{chunk::ChunkMemory, error::MemoryError};

/// Virtual memory page size of the computer. This is usually 4096.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Access rights of the pages backing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageAccess {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// A mapping returned by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl VirtualRegion {
    /// First byte of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize, access: PageAccess) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// [`ChunkMemory`] adapter backing every chunk with fresh anonymous pages from the
/// operating system (`mmap` on unix, `VirtualAlloc` on Windows).
///
/// The OS gives us regions aligned to the page size and we can't assume they are
/// adjacent, which is exactly the discontinuous chunk model of the allocator.
#[derive(Debug, Default)]
pub struct VirtualMemory {
    /// Bytes currently mapped through this adapter.
    mapped: u64,
    /// Number of live mappings.
    regions: usize,
}

impl VirtualMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently mapped through this adapter.
    #[inline]
    pub fn mapped_bytes(&self) -> u64 {
        self.mapped
    }

    /// Number of live mappings.
    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions
    }
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { VirtualMemory::page_size() })
}

impl ChunkMemory for VirtualMemory {
    type Memory = VirtualRegion;
    type Flags = PageAccess;
    type UserData = ();
    type Error = MemoryError;

    fn init_memory(
        &mut self,
        flags: PageAccess,
        size: u64,
        _: &mut (),
    ) -> Result<VirtualRegion, MemoryError> {
        let len = usize::try_from(size).map_err(|_| MemoryError::TooLarge(size))?;

        // SAFETY: a fresh private mapping doesn't alias anything.
        let ptr = unsafe { Self::request_memory(len, flags) }.ok_or_else(|| MemoryError::MapFailed {
            size,
            source: std::io::Error::last_os_error(),
        })?;

        self.mapped += size;
        self.regions += 1;
        log::trace!("mapped {len} bytes at {ptr:p}");

        Ok(VirtualRegion { ptr, len })
    }

    fn destroy_memory(&mut self, memory: VirtualRegion, _: &mut ()) {
        log::trace!("unmapping {} bytes at {:p}", memory.len, memory.ptr);

        // SAFETY: the region came from `init_memory` and the allocator destroys it once.
        unsafe { Self::return_memory(memory.as_ptr(), memory.len) };

        self.mapped -= memory.len as u64;
        self.regions -= 1;
    }
}

#[cfg(unix)]
mod unix {
    use super::{PageAccess, PlatformMemory, VirtualMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for VirtualMemory {
        unsafe fn request_memory(len: usize, access: PageAccess) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let prot = match access {
                PageAccess::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
                PageAccess::ReadOnly => libc::PROT_READ,
            };

            unsafe {
                let addr = mmap(ADDR, len as size_t, prot, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{PageAccess, PlatformMemory, VirtualMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for VirtualMemory {
        unsafe fn request_memory(len: usize, access: PageAccess) -> Option<NonNull<u8>> {
            let protection = match access {
                PageAccess::ReadWrite => Memory::PAGE_READWRITE,
                PageAccess::ReadOnly => Memory::PAGE_READONLY,
            };

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn map_write_unmap() {
        let mut memory = VirtualMemory::new();
        let size = page_size() as u64 * 2;

        let region = memory.init_memory(PageAccess::ReadWrite, size, &mut ()).unwrap();
        assert_eq!(size, memory.mapped_bytes());
        assert_eq!(0, region.as_ptr() as usize % page_size());

        unsafe {
            *region.as_ptr() = 23;
            *region.as_ptr().add(region.len() - 1) = 42;
            assert_eq!(23, *region.as_ptr());
            assert_eq!(42, *region.as_ptr().add(region.len() - 1));
        }

        memory.destroy_memory(region, &mut ());
        assert_eq!(0, memory.mapped_bytes());
        assert_eq!(0, memory.region_count());
    }

    #[test]
    fn allocations_are_writable() {
        use std::cell::RefCell;

        use crate::{BlockPool, ChunkPool, ChunkedTlsf, TlsfConfig};

        let chunk_size = page_size() as u64 * 4;
        let blocks = RefCell::new(BlockPool::new(16));
        let chunks = RefCell::new(ChunkPool::<VirtualMemory>::new(2));
        let mut tlsf = ChunkedTlsf::new(&blocks, &chunks, VirtualMemory::new());
        tlsf.init(PageAccess::ReadWrite, TlsfConfig::new(chunk_size));

        let allocations: Vec<_> = (1..=6u8)
            .map(|i| {
                let allocation = tlsf.allocate(chunk_size / 3, 16, &mut ()).unwrap();
                let region = tlsf.memory(&allocation);
                let offset = tlsf.offset(&allocation) as usize;
                unsafe { *region.as_ptr().add(offset) = i };
                (allocation, i)
            })
            .collect();

        assert_eq!(3, tlsf.adapter().region_count());
        tlsf.validate();

        for (allocation, i) in allocations {
            let region = tlsf.memory(&allocation);
            let offset = tlsf.offset(&allocation) as usize;
            assert_eq!(i, unsafe { *region.as_ptr().add(offset) });
            tlsf.free(allocation, &mut ());
        }

        tlsf.destroy_free_chunks(&mut ());
        assert_eq!(0, tlsf.adapter().mapped_bytes());
    }
}
