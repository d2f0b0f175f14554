// =============================================================================
// PagerOS — Page Tables and the Walker
// =============================================================================
//
// Two-level 32-bit paging, hardware format:
//
//   Virtual address:  PD index (10) | PT index (10) | offset (12)
//
//   Each entry is 32 bits:
//
//   ```text
//   31           12 11  9   8   7   6   5   4   3   2   1   0
//   ┌──────────────┬─────┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//   │ Frame number │Avail│ G │PS │ D │ A │PCD│PWT│U/S│R/W│ P │
//   └──────────────┴─────┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//   ```
//
//   Bit 0 (P):   Present — entry is valid
//   Bit 1 (R/W): Read/Write — if 0, writes fault
//   Bit 2 (U/S): User/Supervisor — if 0, user-mode access faults
//   Bit 5 (A):   Accessed — set when the translation is loaded; this is
//                what the clock victim selector samples and clears
//   Bit 6 (D):   Dirty — set on write (leaf entries only)
//   Bit 9:       First software-available bit. The kernel uses it as the
//                SWAPPED marker: a non-present entry with SWAPPED set
//                stores a swap-slot index in its frame-number field.
//
// Page tables live at identity-mapped physical addresses, so the walker
// reads and writes entries directly through physical memory — no
// recursive-mapping tricks needed.
//
// =============================================================================

use bitflags::bitflags;

use super::address::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE};
use super::phys::PhysMemory;
use super::ptpool::PtPool;

// =============================================================================
// Entry flags
// =============================================================================

bitflags! {
    /// Flag bits shared by page-directory and page-table entries.
    ///
    /// The effective permission of a mapping is the intersection of the
    /// directory entry's and the table entry's flags, so intermediate
    /// entries are kept permissive and restrictions applied at the leaf.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry is valid. If clear, every other bit is software's to use.
        const PRESENT       = 1 << 0;

        /// Writes are allowed through this entry.
        const WRITABLE      = 1 << 1;

        /// User-mode accesses are allowed through this entry.
        const USER          = 1 << 2;

        /// Write-through caching for the mapped page or table.
        const WRITE_THROUGH = 1 << 3;

        /// Caching disabled for the mapped page or table.
        const NO_CACHE      = 1 << 4;

        /// Set by the processor when the translation is used.
        /// The clock victim selector samples and clears this bit.
        const ACCESSED      = 1 << 5;

        /// Set by the processor on a write (leaf entries only).
        const DIRTY         = 1 << 6;

        /// In directory entries this selects a 4 MB page. The kernel never
        /// sets it; it must be zero.
        const LARGE         = 1 << 7;

        /// Global translation (ignored by this machine).
        const GLOBAL        = 1 << 8;

        /// Software: the entry's frame field holds a swap-slot index, not a
        /// frame number. Only meaningful while PRESENT is clear.
        const SWAPPED       = 1 << 9;

        /// Software-available, unused.
        const AVAIL1        = 1 << 10;

        /// Software-available, unused.
        const AVAIL2        = 1 << 11;
    }
}

impl PageFlags {
    /// An intermediate (directory) entry for kernel-only page tables.
    pub const INTERMEDIATE: Self = Self::PRESENT.union(Self::WRITABLE);

    /// An intermediate (directory) entry whose leaves may be user pages.
    pub const INTERMEDIATE_USER: Self =
        Self::PRESENT.union(Self::WRITABLE).union(Self::USER);

    /// A kernel identity mapping: present + writable, supervisor only.
    pub const KERNEL_RW: Self = Self::PRESENT.union(Self::WRITABLE);

    /// A resident user heap page. The resolver installs these with
    /// ACCESSED already set, matching what the hardware does when the
    /// retried access loads the translation.
    pub const USER_PAGE: Self = Self::PRESENT
        .union(Self::WRITABLE)
        .union(Self::USER)
        .union(Self::ACCESSED);
}

// =============================================================================
// Entries
// =============================================================================

/// One 32-bit page-directory or page-table entry.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

/// Mask for the 20-bit frame-number field.
const FRAME_MASK: u32 = 0xFFFF_F000;

impl PageTableEntry {
    /// A non-present, all-zero entry.
    pub const EMPTY: Self = Self(0);

    /// Builds an entry from a 20-bit frame number (or swap-slot index)
    /// and flags.
    #[inline]
    pub const fn new(frame_number: u32, flags: PageFlags) -> Self {
        Self((frame_number << 12) | flags.bits())
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    /// The 20-bit frame-number field. For a SWAPPED entry this is the
    /// swap-slot index instead.
    #[inline]
    pub const fn frame_number(self) -> u32 {
        (self.0 & FRAME_MASK) >> 12
    }

    /// Physical address of the mapped frame (or next-level table).
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 & FRAME_MASK)
    }

    #[inline]
    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    /// True for an evicted page: not present, with the frame field holding
    /// a swap-slot index.
    #[inline]
    pub fn is_swapped(self) -> bool {
        !self.is_present() && self.flags().contains(PageFlags::SWAPPED)
    }

    #[inline]
    pub fn is_accessed(self) -> bool {
        self.flags().contains(PageFlags::ACCESSED)
    }

    /// Returns the entry with the given flags added.
    #[inline]
    pub fn with(self, flags: PageFlags) -> Self {
        Self(self.0 | flags.bits())
    }

    /// Returns the entry with the given flags removed.
    #[inline]
    pub fn without(self, flags: PageFlags) -> Self {
        Self(self.0 & !flags.bits())
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PTE({} {:?})", self.addr(), self.flags())
        } else if self.is_swapped() {
            write!(f, "PTE(swap slot {:#x})", self.frame_number())
        } else {
            write!(f, "PTE(empty)")
        }
    }
}

// =============================================================================
// Raw entry access
// =============================================================================
//
// Entries are always read and written through physical memory by address,
// never through references into the tables: the walker may reach the same
// table twice in one operation (e.g. identity mapping a region that
// contains its own page tables).

/// Physical address of entry `index` in the table at `table`.
#[inline]
fn entry_addr(table: PhysAddr, index: usize) -> PhysAddr {
    debug_assert!(index < ENTRIES_PER_TABLE);
    table + (index as u32) * 4
}

/// Reads entry `index` of the table at `table`.
#[inline]
pub fn entry_at(mem: &PhysMemory, table: PhysAddr, index: usize) -> PageTableEntry {
    PageTableEntry(mem.read_u32(entry_addr(table, index)))
}

/// Writes entry `index` of the table at `table`.
#[inline]
pub fn set_entry_at(mem: &PhysMemory, table: PhysAddr, index: usize, e: PageTableEntry) {
    mem.write_u32(entry_addr(table, index), e.raw());
}

/// Reads the entry at a physical entry address (as returned by `pte_of`).
#[inline]
pub fn read_entry(mem: &PhysMemory, entry: PhysAddr) -> PageTableEntry {
    PageTableEntry(mem.read_u32(entry))
}

/// Writes the entry at a physical entry address.
#[inline]
pub fn write_entry(mem: &PhysMemory, entry: PhysAddr, e: PageTableEntry) {
    mem.write_u32(entry, e.raw());
}

// =============================================================================
// The walker
// =============================================================================

/// Returns the physical address of the PTE slot for `va` in directory `pd`,
/// allocating the intermediate page table from the PT pool if the directory
/// entry is absent.
///
/// `inter` selects the flags for a newly installed directory entry —
/// [`PageFlags::INTERMEDIATE`] for kernel tables, or
/// [`PageFlags::INTERMEDIATE_USER`] when the leaves will be user pages.
pub fn pte_of(
    mem: &PhysMemory,
    pt_pool: &mut PtPool,
    pd: PhysAddr,
    va: VirtAddr,
    inter: PageFlags,
) -> PhysAddr {
    let pde = entry_at(mem, pd, va.pd_index());
    let table = if pde.is_present() {
        pde.addr()
    } else {
        let table = pt_pool.alloc(mem);
        set_entry_at(
            mem,
            pd,
            va.pd_index(),
            PageTableEntry::new(table.frame_number(), inter),
        );
        table
    };
    entry_addr(table, va.pt_index())
}

/// Non-allocating variant of [`pte_of`]: the PTE slot address if the
/// intermediate table exists, `None` otherwise. Used by teardown and the
/// eviction path, which must never grow the tables.
pub fn pte_lookup(mem: &PhysMemory, pd: PhysAddr, va: VirtAddr) -> Option<PhysAddr> {
    let pde = entry_at(mem, pd, va.pd_index());
    if !pde.is_present() {
        return None;
    }
    Some(entry_addr(pde.addr(), va.pt_index()))
}

/// Walks `pd` for `va` and returns the physical address it maps to, or
/// `None` if any level is absent. Does not touch accessed/dirty bits;
/// that is the processor model's job.
pub fn translate(mem: &PhysMemory, pd: PhysAddr, va: VirtAddr) -> Option<PhysAddr> {
    let pte_pa = pte_lookup(mem, pd, va)?;
    let pte = read_entry(mem, pte_pa);
    if !pte.is_present() {
        return None;
    }
    Some(pte.addr() + va.page_offset())
}

/// Identity-maps `[start, end)` into `pd` with present/writable,
/// supervisor-only entries whose frame number equals the page number.
///
/// Used once at bring-up to map the kernel, FFS, and swap regions into the
/// system directory, which every process then inherits.
pub fn identity_map(
    mem: &PhysMemory,
    pt_pool: &mut PtPool,
    pd: PhysAddr,
    start: PhysAddr,
    end: PhysAddr,
) {
    let mut addr = start.as_u32() & FRAME_MASK;
    while addr < end.as_u32() {
        let va = VirtAddr::new(addr);
        let slot = pte_of(mem, pt_pool, pd, va, PageFlags::INTERMEDIATE);
        write_entry(mem, slot, PageTableEntry::new(addr >> 12, PageFlags::KERNEL_RW));
        addr += super::address::PAGE_SIZE;
    }
}

// =============================================================================
// Tests
// =============================================================================
