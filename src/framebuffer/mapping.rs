//! Owned view of framebuffer memory

use std::ffi::c_void;
use std::io;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, warn};

/// Pixel memory exclusively owned by one framebuffer handle.
///
/// Either a shared `mmap` of the device or, for simulated controllers, a heap
/// buffer. Dereferences to a byte slice so every access is bounds-checked.
pub struct FrameMapping {
    inner: Backing,
}

enum Backing {
    Device { ptr: NonNull<c_void>, len: usize },
    Heap {
        buf: Vec<u8>,
        lease: Option<Arc<()>>,
    },
    Released,
}

// The mapping is only reachable through `&`/`&mut` borrows of its owner.
unsafe impl Send for FrameMapping {}

impl FrameMapping {
    /// Take ownership of a region returned by `mmap`.
    ///
    /// # Safety
    /// `ptr` must point to a live, readable and writable mapping of exactly
    /// `len` bytes that nothing else will unmap.
    pub unsafe fn from_raw(ptr: NonNull<c_void>, len: usize) -> Self {
        Self {
            inner: Backing::Device { ptr, len },
        }
    }

    /// Zero-filled heap memory standing in for device memory.
    pub fn heap(len: usize) -> Self {
        Self {
            inner: Backing::Heap {
                buf: vec![0; len],
                lease: None,
            },
        }
    }

    /// Heap memory holding a clone of `lease` until released, so the lender
    /// can count live mappings with `Arc::strong_count`.
    pub fn heap_leased(len: usize, lease: Arc<()>) -> Self {
        Self {
            inner: Backing::Heap {
                buf: vec![0; len],
                lease: Some(lease),
            },
        }
    }

    /// Unmap now, reporting failure instead of logging it on drop.
    pub fn unmap(mut self) -> io::Result<()> {
        self.release()
    }

    fn release(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.inner, Backing::Released) {
            Backing::Device { ptr, len } => {
                debug!("Unmapping {} bytes of framebuffer memory", len);
                unsafe { nix::sys::mman::munmap(ptr, len) }.map_err(io::Error::from)
            }
            Backing::Heap { .. } | Backing::Released => Ok(()),
        }
    }
}

impl Deref for FrameMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            Backing::Device { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr() as *const u8, *len)
            },
            Backing::Heap { buf, .. } => buf,
            Backing::Released => &[],
        }
    }
}

impl DerefMut for FrameMapping {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.inner {
            Backing::Device { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr() as *mut u8, *len)
            },
            Backing::Heap { buf, .. } => buf,
            Backing::Released => &mut [],
        }
    }
}

impl Drop for FrameMapping {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to unmap framebuffer memory: {}", e);
        }
    }
}

impl std::fmt::Debug for FrameMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            Backing::Device { .. } => "device",
            Backing::Heap { .. } => "heap",
            Backing::Released => "released",
        };
        f.debug_struct("FrameMapping")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_mapping_is_zeroed_and_writable() {
        let mut frame = FrameMapping::heap(16);
        assert_eq!(frame.len(), 16);
        assert!(frame.iter().all(|&b| b == 0));

        frame[15] = 0xAB;
        assert_eq!(frame[15], 0xAB);
        assert!(frame.unmap().is_ok());
    }

    #[test]
    fn test_lease_returned_on_release() {
        let lease = Arc::new(());
        let frame = FrameMapping::heap_leased(4, lease.clone());
        assert_eq!(Arc::strong_count(&lease), 2);

        drop(frame);
        assert_eq!(Arc::strong_count(&lease), 1);

        let frame = FrameMapping::heap_leased(4, lease.clone());
        frame.unmap().unwrap();
        assert_eq!(Arc::strong_count(&lease), 1);
    }
}
