// =============================================================================
// PagerOS — Physical / Virtual Memory Layout
// =============================================================================
//
// All of the fixed address-space constants live here as one configuration
// value, so tests and the demo binary can bring up scaled-down machines
// while the default matches the reference layout:
//
//   0x00000000 - 0x02000000  (32 MB)  : Kernel (code, data, heap, PT pool)
//   0x02000000 - 0x06000000  (64 MB)  : FFS frames (16 K frames * 4 KB)
//   0x06000000 - 0x0E000000  (128 MB) : Swap store (32 K slots * 4 KB)
//
//   0x10000000 - 0x20000000  (256 MB) : User virtual heap (demand-paged,
//                                       per process; virtual only)
//
// Everything below PHYS_MEM_END is identity-mapped by the system page
// directory; the user heap window exists only through per-process page
// tables.
//
// =============================================================================

use super::address::{PhysAddr, VirtAddr, PAGE_SHIFT, PAGE_SIZE};

/// The complete address-space configuration of one machine.
///
/// Constructed via `Default` (reference layout) or [`MemoryLayout::custom`]
/// (scaled-down machines for tests). Every field is page-granular.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLayout {
    /// End of the kernel image region `[0, kernel_end)`. Its page count is
    /// the `KERNEL_PREALLOC` term of `allocated_virtual_pages`.
    pub kernel_end: u32,

    /// Base of the page-table pool (inside the kernel region).
    pub pt_base: u32,

    /// Number of frames in the page-table pool.
    pub pt_frames: u32,

    /// Base of the FFS frame pool.
    pub ffs_base: u32,

    /// Number of frames in the FFS pool.
    pub ffs_frames: u32,

    /// Base of the swap store.
    pub swap_base: u32,

    /// Number of slots in the swap store. Zero disables swapping entirely:
    /// the fault resolver then reports out-of-memory instead of evicting.
    pub swap_slots: u32,

    /// First address of the user virtual heap window.
    pub vheap_base: u32,

    /// One past the last address of the user virtual heap window.
    pub vheap_end: u32,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            kernel_end: 0x0200_0000,
            pt_base: 0x0100_0000,
            pt_frames: 1024,
            ffs_base: 0x0200_0000,
            ffs_frames: 16 * 1024,
            swap_base: 0x0600_0000,
            swap_slots: 32 * 1024,
            vheap_base: 0x1000_0000,
            vheap_end: 0x2000_0000,
        }
        .validated()
    }
}

impl MemoryLayout {
    /// A small machine for tests and demos: the same shape as the reference
    /// layout, with pool sizes chosen by the caller. The kernel region is
    /// 1 MB (256 preallocated pages) and the heap window holds
    /// `vheap_pages` pages.
    pub fn custom(ffs_frames: u32, swap_slots: u32, pt_frames: u32, vheap_pages: u32) -> Self {
        let kernel_end = 0x0010_0000;
        let ffs_base = kernel_end;
        let swap_base = ffs_base + ffs_frames * PAGE_SIZE;
        Self {
            kernel_end,
            pt_base: 0x0008_0000,
            pt_frames,
            ffs_base,
            ffs_frames,
            swap_base,
            swap_slots,
            vheap_base: 0x1000_0000,
            vheap_end: 0x1000_0000 + vheap_pages * PAGE_SIZE,
        }
        .validated()
    }

    /// Checks the layout's structural requirements, panicking on violation.
    /// Runs on every construction path so a bad configuration fails at
    /// bring-up, not deep inside the fault path.
    pub fn validated(self) -> Self {
        assert!(self.kernel_end % PAGE_SIZE == 0, "layout: kernel_end not page-aligned");
        assert!(self.pt_base % PAGE_SIZE == 0, "layout: pt_base not page-aligned");
        assert!(self.ffs_base % PAGE_SIZE == 0, "layout: ffs_base not page-aligned");
        assert!(self.swap_base % PAGE_SIZE == 0, "layout: swap_base not page-aligned");
        assert!(self.vheap_base % PAGE_SIZE == 0, "layout: vheap_base not page-aligned");
        assert!(self.vheap_end % PAGE_SIZE == 0, "layout: vheap_end not page-aligned");

        // PT pool must sit inside the kernel image region so it is covered
        // by the identity mapping shared with every process.
        assert!(
            self.pt_base + self.pt_frames * PAGE_SIZE <= self.kernel_end,
            "layout: PT pool must lie inside the kernel region"
        );
        assert!(self.ffs_base >= self.kernel_end, "layout: FFS pool overlaps the kernel");
        assert!(
            self.swap_base >= self.ffs_base + self.ffs_frames * PAGE_SIZE,
            "layout: swap store overlaps the FFS pool"
        );
        assert!(self.ffs_frames > 0, "layout: FFS pool is empty");
        assert!(self.pt_frames > 0, "layout: PT pool is empty");

        // The heap window must be disjoint from the identity-mapped physical
        // region, and above it, so heap page directory entries never collide
        // with the inherited kernel entries.
        assert!(
            self.vheap_base >= self.phys_end().as_u32(),
            "layout: heap window overlaps identity-mapped memory"
        );
        assert!(self.vheap_end > self.vheap_base, "layout: empty heap window");

        // Swap slot indices are stored in the 20-bit frame-number field of a
        // page-table entry, which caps the store at 2^20 slots.
        assert!(self.swap_slots <= 1 << 20, "layout: swap store exceeds 2^20 slots");

        self
    }

    /// One past the highest physical address: the size of simulated
    /// physical memory and the end of the identity-mapped region.
    pub fn phys_end(&self) -> PhysAddr {
        PhysAddr::new(self.swap_base + self.swap_slots * PAGE_SIZE)
    }

    pub fn pt_base(&self) -> PhysAddr {
        PhysAddr::new(self.pt_base)
    }

    pub fn ffs_base(&self) -> PhysAddr {
        PhysAddr::new(self.ffs_base)
    }

    pub fn swap_base(&self) -> PhysAddr {
        PhysAddr::new(self.swap_base)
    }

    pub fn vheap_base(&self) -> VirtAddr {
        VirtAddr::new(self.vheap_base)
    }

    pub fn vheap_end(&self) -> VirtAddr {
        VirtAddr::new(self.vheap_end)
    }

    /// Number of kernel pages every process is deemed to own virtually
    /// (the mappings inherited from the system directory).
    pub fn kernel_prealloc_pages(&self) -> u32 {
        self.kernel_end >> PAGE_SHIFT
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_layout() {
        let l = MemoryLayout::default();
        assert_eq!(l.ffs_frames, 16384);
        assert_eq!(l.swap_slots, 32768);
        assert_eq!(l.phys_end().as_u32(), 0x0E00_0000);
        assert_eq!(l.kernel_prealloc_pages(), 8192);
        // 256 MB heap window
        assert_eq!(l.vheap_end - l.vheap_base, 0x1000_0000);
    }

    #[test]
    fn custom_layout_is_compact() {
        let l = MemoryLayout::custom(16, 32, 8, 64);
        assert_eq!(l.phys_end().as_u32(), l.swap_base + 32 * PAGE_SIZE);
        assert_eq!(l.kernel_prealloc_pages(), 256);
    }

    #[test]
    #[should_panic(expected = "swap store overlaps")]
    fn overlapping_pools_rejected() {
        MemoryLayout {
            swap_base: 0x0200_0000,
            ..MemoryLayout::default()
        }
        .validated();
    }
}
