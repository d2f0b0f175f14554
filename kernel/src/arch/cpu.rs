// =============================================================================
// PagerOS — Simulated CPU (control registers, TLB, interrupt flag)
// =============================================================================
//
// The core consumes a small processor surface: read CR2 (fault address),
// read/write CR3 (page-directory base), invalidate one TLB entry, and mask
// or restore interrupts. On real hardware these are single privileged
// instructions; here they are fields of a `Cpu` value so the whole kernel
// runs and tests in user space.
//
// The TLB is modelled faithfully enough to punish missing invalidations:
//   - a direct-mapped array of translations, filled on a successful walk
//   - `invlpg` drops exactly one entry
//   - writing CR3 flushes everything
//   - the ACCESSED bit of a PTE is set when its translation is loaded,
//     which is precisely the signal the clock victim selector samples
//
// A stale entry that was not invalidated will keep translating — exactly
// the bug class the real instruction exists to prevent.
//
// =============================================================================

use crate::memory::address::{PhysAddr, VirtAddr};

/// Number of TLB entries. Direct-mapped by page number.
const TLB_ENTRIES: usize = 64;

/// One cached translation: virtual page → physical frame.
#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    vpage: VirtAddr,
    frame: PhysAddr,
}

/// The processor state the kernel manipulates.
pub struct Cpu {
    /// Faulting linear address, latched when a page fault is raised.
    cr2: VirtAddr,
    /// Physical address of the active page directory.
    cr3: PhysAddr,
    /// Interrupt-enable flag (IF). The fault path and the heap syscalls
    /// run with this clear.
    interrupts_enabled: bool,
    tlb: [Option<TlbEntry>; TLB_ENTRIES],
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            cr2: VirtAddr::zero(),
            cr3: PhysAddr::zero(),
            interrupts_enabled: true,
            tlb: [None; TLB_ENTRIES],
        }
    }

    #[inline]
    fn slot(vpage: VirtAddr) -> usize {
        (vpage.as_u32() >> 12) as usize % TLB_ENTRIES
    }

    // ── Control registers ───────────────────────────────────────────

    /// CR2: the address that caused the most recent page fault. Only
    /// meaningful inside the fault handler.
    #[inline]
    pub fn read_cr2(&self) -> VirtAddr {
        self.cr2
    }

    /// Latches the faulting address, as the processor does when raising
    /// a page fault.
    #[inline]
    pub fn set_cr2(&mut self, addr: VirtAddr) {
        self.cr2 = addr;
    }

    #[inline]
    pub fn read_cr3(&self) -> PhysAddr {
        self.cr3
    }

    /// Switches the active page directory. Flushes the entire TLB, as a
    /// CR3 load does.
    pub fn write_cr3(&mut self, pd: PhysAddr) {
        self.cr3 = pd;
        self.tlb = [None; TLB_ENTRIES];
    }

    // ── TLB ─────────────────────────────────────────────────────────

    /// Cached translation for `vpage`, if any.
    #[inline]
    pub fn tlb_lookup(&self, vpage: VirtAddr) -> Option<PhysAddr> {
        match self.tlb[Self::slot(vpage)] {
            Some(e) if e.vpage == vpage => Some(e.frame),
            _ => None,
        }
    }

    /// Caches a translation after a successful page-table walk.
    #[inline]
    pub fn tlb_fill(&mut self, vpage: VirtAddr, frame: PhysAddr) {
        debug_assert!(vpage.is_page_aligned() && frame.is_page_aligned());
        self.tlb[Self::slot(vpage)] = Some(TlbEntry { vpage, frame });
    }

    /// Invalidates the TLB entry for one page. Addresses anywhere inside
    /// the page invalidate it, as `invlpg` does.
    pub fn invlpg(&mut self, addr: VirtAddr) {
        let vpage = addr.page_align_down();
        let slot = Self::slot(vpage);
        if let Some(e) = self.tlb[slot] {
            if e.vpage == vpage {
                self.tlb[slot] = None;
            }
        }
    }

    // ── Interrupt flag ──────────────────────────────────────────────

    /// Masks interrupts, returning the previous state for `restore`.
    /// The kernel brackets every atomic section with these, mirroring
    /// the disable/restore discipline of the fault path.
    #[inline]
    pub fn disable(&mut self) -> bool {
        let was = self.interrupts_enabled;
        self.interrupts_enabled = false;
        was
    }

    /// Restores the interrupt state saved by `disable`.
    #[inline]
    pub fn restore(&mut self, mask: bool) {
        self.interrupts_enabled = mask;
    }

    #[inline]
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::PAGE_SIZE;

    #[test]
    fn tlb_fill_and_invalidate() {
        let mut cpu = Cpu::new();
        let vpage = VirtAddr::new(0x1000_2000);
        let frame = PhysAddr::new(0x0200_0000);

        assert!(cpu.tlb_lookup(vpage).is_none());
        cpu.tlb_fill(vpage, frame);
        assert_eq!(cpu.tlb_lookup(vpage), Some(frame));

        // invlpg with a mid-page address drops the entry.
        cpu.invlpg(vpage + 123);
        assert!(cpu.tlb_lookup(vpage).is_none());
    }

    #[test]
    fn invlpg_leaves_other_pages_alone() {
        let mut cpu = Cpu::new();
        let a = VirtAddr::new(0x1000_0000);
        let b = a + PAGE_SIZE;
        cpu.tlb_fill(a, PhysAddr::new(0x1000));
        cpu.tlb_fill(b, PhysAddr::new(0x2000));
        cpu.invlpg(a);
        assert!(cpu.tlb_lookup(a).is_none());
        assert_eq!(cpu.tlb_lookup(b), Some(PhysAddr::new(0x2000)));
    }

    #[test]
    fn cr3_write_flushes_everything() {
        let mut cpu = Cpu::new();
        let a = VirtAddr::new(0x1000_0000);
        cpu.tlb_fill(a, PhysAddr::new(0x1000));
        cpu.write_cr3(PhysAddr::new(0x5000));
        assert!(cpu.tlb_lookup(a).is_none());
        assert_eq!(cpu.read_cr3(), PhysAddr::new(0x5000));
    }

    #[test]
    fn interrupt_mask_nests() {
        let mut cpu = Cpu::new();
        assert!(cpu.interrupts_enabled());
        let outer = cpu.disable();
        let inner = cpu.disable();
        assert!(!cpu.interrupts_enabled());
        cpu.restore(inner);
        assert!(!cpu.interrupts_enabled());
        cpu.restore(outer);
        assert!(cpu.interrupts_enabled());
    }
}
