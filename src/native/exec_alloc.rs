//! Executable-memory allocator (spec §4.5 "allocator"), grounded on the
//! donor's own `region`-backed virtual memory wrapper (`core/src/vmem.rs`):
//! same crate, same alloc-once-hold-until-teardown shape, but with `EXECUTE`
//! added to the protection flags since this buffer holds machine code rather
//! than linear-memory bytes.
//!
//! `region::alloc` rounds up to the platform's page size and calls
//! `mmap`/`VirtualAlloc` under the hood, so there is no separate "minimum
//! page size" constant to track here — the crate already enforces it.

use alloc::vec::Vec;
use region::{Allocation, Protection};

#[derive(Debug)]
pub enum AllocError {
    Region(region::Error),
}

impl From<region::Error> for AllocError {
    fn from(e: region::Error) -> Self {
        AllocError::Region(e)
    }
}

/// One page (or run of pages) of RWX memory holding the concatenated machine
/// code of every compiled unit for one VM. Held until the VM (or its native
/// backend) is torn down.
pub struct ExecPage {
    allocation: Allocation,
    len: usize,
}

impl ExecPage {
    /// Copies `code` into a fresh executable allocation.
    pub fn new(code: &[u8]) -> Result<Self, AllocError> {
        let len = code.len().max(1);
        let mut allocation = region::alloc(len, Protection::READ_WRITE_EXECUTE)?;
        // Safety: `allocation` was just created with this exact length and
        // RWX protection; writing machine code into it before it is ever
        // jumped into is the allocator's whole purpose.
        unsafe {
            core::ptr::copy_nonoverlapping(code.as_ptr(), allocation.as_mut_ptr::<u8>(), code.len());
        }
        Ok(ExecPage { allocation, len: code.len() })
    }

    pub fn base_ptr(&self) -> *const u8 {
        self.allocation.as_ptr::<u8>()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// Lays out every function's compiled units back-to-back into one
/// allocation and hands back each unit's byte offset, so the backend can
/// compute a function pointer per unit without a separate allocation each.
pub fn layout(blobs: &[Vec<u8>]) -> (Vec<usize>, Vec<u8>) {
    let mut offsets = Vec::with_capacity(blobs.len());
    let mut combined = Vec::new();
    for blob in blobs {
        offsets.push(combined.len());
        combined.extend_from_slice(blob);
    }
    (offsets, combined)
}
