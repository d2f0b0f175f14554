// =============================================================================
// PagerOS — Swap Store, Clock Victim Selector, Swap Engine
// =============================================================================
//
// Three tightly-coupled pieces:
//
//   SwapStore  — fixed slots of backing bytes; slot `i` holds one page at
//                SWAP_BASE + i * PAGE_SIZE, plus {used, owner} metadata.
//                A store with zero slots means swapping is disabled and
//                memory pressure becomes out-of-memory instead of eviction.
//
//   ClockHand  — the persistent cursor of the approximate-LRU scan. It
//                lives on the machine, not in any call frame: persistence
//                across evictions is what makes successive victims walk
//                the pool in near-FIFO order.
//
//   swap_out / swap_in — pure data movement between FFS frames and swap
//                slots. The PTE rewriting each one performs is exactly the
//                part that must not be left to the caller (swap_out) or
//                must be (swap_in): see the ordering rules on each.
//
// =============================================================================

use alloc::vec;
use alloc::vec::Vec;

use super::address::{PhysAddr, VirtAddr, PAGE_SIZE};
use super::ffs::FfsPool;
use super::paging::{self, PageFlags, PageTableEntry};
use super::phys::PhysMemory;
use crate::arch::cpu::Cpu;
use crate::kprintln;
use crate::task::Pid;
use crate::util::console::Console;

// =============================================================================
// Swap store
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct SwapSlot {
    used: bool,
    owner: Pid,
}

/// The backing store for evicted pages.
pub struct SwapStore {
    base: PhysAddr,
    slots: Vec<SwapSlot>,
    free_count: u32,
    /// Remaining rate-limit budget for debug output. Each eviction or
    /// swap-in line spends one; at zero the engine is silent.
    debug_budget: u32,
}

impl SwapStore {
    pub fn new(base: PhysAddr, slots: u32) -> Self {
        assert!(base.is_page_aligned());
        Self {
            base,
            slots: vec![SwapSlot { used: false, owner: 0 }; slots as usize],
            free_count: slots,
            debug_budget: 0,
        }
    }

    /// False when the store has no slots; the fault resolver then never
    /// attempts eviction.
    pub fn is_enabled(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Address of a slot's page bytes.
    #[inline]
    pub fn slot_addr(&self, index: u32) -> PhysAddr {
        debug_assert!((index as usize) < self.slots.len());
        self.base + index * PAGE_SIZE
    }

    /// Claims the first free slot for `owner`.
    pub fn alloc_slot(&mut self, owner: Pid) -> Option<u32> {
        if self.free_count == 0 {
            return None;
        }
        let index = self.slots.iter().position(|s| !s.used)?;
        self.slots[index] = SwapSlot { used: true, owner };
        self.free_count -= 1;
        Some(index as u32)
    }

    /// Releases a slot back to the store.
    pub fn free_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.used, "swap: slot {:#x} freed twice", index);
        if slot.used {
            slot.used = false;
            self.free_count += 1;
        }
    }

    /// The owner of a used slot, `None` for a free one.
    pub fn owner_of(&self, index: u32) -> Option<Pid> {
        match self.slots.get(index as usize) {
            Some(s) if s.used => Some(s.owner),
            _ => None,
        }
    }

    pub fn is_used(&self, index: u32) -> bool {
        self.owner_of(index).is_some()
    }

    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Releases every slot owned by `pid`; returns how many. Process
    /// teardown.
    pub fn release_owned(&mut self, pid: Pid) -> u32 {
        let mut released = 0;
        for slot in self.slots.iter_mut() {
            if slot.used && slot.owner == pid {
                slot.used = false;
                released += 1;
            }
        }
        self.free_count += released;
        released
    }

    /// Arms the debug rate limiter for the next `budget` lines.
    pub fn set_debug_budget(&mut self, budget: u32) {
        self.debug_budget = budget;
    }

    fn debug_take(&mut self) -> bool {
        if self.debug_budget > 0 {
            self.debug_budget -= 1;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Clock victim selector
// =============================================================================

/// The persistent cursor of the clock scan.
pub struct ClockHand {
    pos: usize,
}

impl ClockHand {
    pub fn new() -> Self {
        Self { pos: 0 }
    }

    /// Picks an eviction victim from the FFS pool, approximate-LRU.
    ///
    /// Starting at the hand, walks the pool at most twice. Candidates are
    /// used slots carrying `(pd, vaddr)` metadata; everything else (free
    /// slots, frames allocated but not yet mapped, frames mid-eviction)
    /// is skipped. A candidate whose PTE has the accessed bit set gets
    /// the bit cleared and is passed over; the first candidate found with
    /// the bit clear is the victim. The first full pass clears every
    /// accessed bit, so the second pass is guaranteed to choose — `None`
    /// only when no frame carries mapping metadata at all.
    ///
    /// The hand advances past the victim, so consecutive evictions sweep
    /// the pool in near-FIFO order.
    pub fn select_victim(&mut self, ffs: &FfsPool, mem: &PhysMemory) -> Option<PhysAddr> {
        let n = ffs.capacity();
        if n == 0 {
            return None;
        }

        let mut scanned = 0;
        while scanned < 2 * n {
            let index = self.pos;
            self.pos = (self.pos + 1) % n;
            scanned += 1;

            let frame = ffs.frame(index);
            if !frame.has_mapping() {
                continue;
            }
            let pd = frame.pd.expect("checked by has_mapping");

            let pte_pa = match paging::pte_lookup(mem, pd, frame.vaddr) {
                Some(pa) => pa,
                None => panic!(
                    "clock: FFS frame {:#x} metadata names {} with no page table",
                    index, frame.vaddr
                ),
            };
            let pte = paging::read_entry(mem, pte_pa);
            if !pte.is_present() {
                panic!(
                    "clock: FFS frame {:#x} metadata names unmapped page {}",
                    index, frame.vaddr
                );
            }

            if pte.is_accessed() {
                paging::write_entry(mem, pte_pa, pte.without(PageFlags::ACCESSED));
            } else {
                return Some(ffs.frame_addr(index));
            }
        }

        None
    }
}

impl Default for ClockHand {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Swap engine
// =============================================================================

/// Evicts the page held in `frame` to the swap store.
///
/// After this returns, the victim's PTE is already rewritten — not
/// present, SWAPPED set, swap-slot index in the frame field — and its TLB
/// entry is gone, so there is no window in which a stale translation can
/// reach the frame. The frame's metadata is cleared but it stays bound;
/// the caller transfers it with `FfsPool::claim`.
///
/// # Panics
/// If the frame carries no mapping metadata (contract: only selector
/// output is evicted), or the swap store is exhausted (contract: sized so
/// this cannot happen).
pub fn swap_out(
    mem: &PhysMemory,
    ffs: &mut FfsPool,
    swap: &mut SwapStore,
    cpu: &mut Cpu,
    con: &mut Console,
    frame: PhysAddr,
) {
    let index = ffs.index_of(frame);
    let meta = ffs.frame(index);
    if !meta.has_mapping() || meta.vaddr == VirtAddr::zero() {
        panic!("swap: eviction of FFS frame {:#x} with no mapping", index);
    }
    let pd = meta.pd.expect("checked by has_mapping");

    let slot = swap
        .alloc_slot(meta.owner)
        .unwrap_or_else(|| panic!("swap: store exhausted evicting FFS frame {:#x}", index));

    mem.copy_page(frame, swap.slot_addr(slot));

    // Rewrite the owning PTE before anything can retry the access: slot
    // index in the frame field, SWAPPED set, everything else cleared.
    let pte_pa = paging::pte_lookup(mem, pd, meta.vaddr)
        .unwrap_or_else(|| panic!("swap: victim {} lost its page table", meta.vaddr));
    paging::write_entry(mem, pte_pa, PageTableEntry::new(slot, PageFlags::SWAPPED));
    cpu.invlpg(meta.vaddr);

    ffs.clear_mapping(frame);

    if swap.debug_take() {
        kprintln!(con, "eviction:: FFS frame {:#x}, swap frame {:#x} copy", index, slot);
    }
    log::trace!("[swap] evicted FFS frame {:#x} to slot {:#x}", index, slot);
}

/// Brings the page in swap slot `slot` back into an FFS frame, evicting a
/// victim if the pool is full. Returns the frame, now holding the restored
/// bytes and owned by the slot's owner, or `None` when no frame can be
/// produced (invalid slot, or a full pool with nothing evictable).
///
/// Pure data movement: the caller records `(vaddr, pd)` on the returned
/// frame and rewrites the faulting PTE.
pub fn swap_in(
    mem: &PhysMemory,
    ffs: &mut FfsPool,
    swap: &mut SwapStore,
    cpu: &mut Cpu,
    hand: &mut ClockHand,
    con: &mut Console,
    slot: u32,
) -> Option<PhysAddr> {
    let owner = swap.owner_of(slot)?;

    let frame = match ffs.alloc(mem, owner) {
        Some(frame) => frame,
        None => {
            let victim = hand.select_victim(ffs, mem)?;
            swap_out(mem, ffs, swap, cpu, con, victim);
            ffs.claim(victim, owner);
            victim
        }
    };

    mem.copy_page(swap.slot_addr(slot), frame);
    swap.free_slot(slot);

    if swap.debug_take() {
        kprintln!(
            con,
            "swapping:: swap frame {:#x}, FFS frame {:#x}",
            slot,
            ffs.index_of(frame)
        );
    }
    log::trace!("[swap] restored slot {:#x} into FFS frame {:#x}", slot, ffs.index_of(frame));

    Some(frame)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::address::VirtAddr;
    use crate::memory::paging::{pte_of, read_entry, write_entry};
    use crate::memory::ptpool::PtPool;

    /// A bare machine: memory, a PT pool, an FFS pool, swap, CPU, console.
    struct Rig {
        mem: PhysMemory,
        pts: PtPool,
        ffs: FfsPool,
        swap: SwapStore,
        cpu: Cpu,
        con: Console,
        hand: ClockHand,
        pd: PhysAddr,
    }

    fn rig(ffs_frames: u32, swap_slots: u32) -> Rig {
        let mem = PhysMemory::new((64 + ffs_frames as usize + swap_slots as usize) * PAGE_SIZE as usize);
        let mut pts = PtPool::new(PhysAddr::new(0), 16);
        let ffs = FfsPool::new(PhysAddr::new(64 * PAGE_SIZE), ffs_frames);
        let swap = SwapStore::new(
            PhysAddr::new((64 + ffs_frames) * PAGE_SIZE),
            swap_slots,
        );
        let pd = pts.alloc(&mem);
        Rig {
            mem,
            pts,
            ffs,
            swap,
            cpu: Cpu::new(),
            con: Console::new(),
            hand: ClockHand::new(),
            pd,
        }
    }

    /// Maps a fresh frame for `owner` at `va` the way the fault resolver
    /// does: allocate, record, write the PTE with ACCESSED set.
    fn map_page(r: &mut Rig, owner: Pid, va: VirtAddr) -> PhysAddr {
        let frame = r.ffs.alloc(&r.mem, owner).expect("ffs full");
        r.ffs.set_mapping(frame, va, r.pd);
        let slot = pte_of(&r.mem, &mut r.pts, r.pd, va, PageFlags::INTERMEDIATE_USER);
        write_entry(
            &r.mem,
            slot,
            PageTableEntry::new(frame.frame_number(), PageFlags::USER_PAGE),
        );
        frame
    }

    const VA: u32 = 0x1000_0000;

    #[test]
    fn clock_clears_accessed_then_selects() {
        let mut r = rig(4, 8);
        let frames: alloc::vec::Vec<PhysAddr> = (0..4)
            .map(|i| map_page(&mut r, 1, VirtAddr::new(VA + i * PAGE_SIZE)))
            .collect();

        // All four pages look recently used, so the first selection must
        // sweep once clearing bits and come back to slot 0.
        let victim = r.hand.select_victim(&r.ffs, &r.mem).unwrap();
        assert_eq!(victim, frames[0]);

        // The sweep cleared everyone else's accessed bit; the hand is past
        // slot 0, so the next pick is slot 1 without another full pass.
        let victim = r.hand.select_victim(&r.ffs, &r.mem).unwrap();
        assert_eq!(victim, frames[1]);
    }

    #[test]
    fn clock_skips_reaccessed_pages() {
        let mut r = rig(3, 8);
        let frames: alloc::vec::Vec<PhysAddr> = (0..3)
            .map(|i| map_page(&mut r, 1, VirtAddr::new(VA + i * PAGE_SIZE)))
            .collect();

        let first = r.hand.select_victim(&r.ffs, &r.mem).unwrap();
        assert_eq!(first, frames[0]);

        // Page 1 gets touched again (accessed bit re-set by the walk);
        // the clock passes over it in favour of page 2.
        let pte_pa = paging::pte_lookup(&r.mem, r.pd, VirtAddr::new(VA + PAGE_SIZE)).unwrap();
        let pte = read_entry(&r.mem, pte_pa);
        write_entry(&r.mem, pte_pa, pte.with(PageFlags::ACCESSED));

        let second = r.hand.select_victim(&r.ffs, &r.mem).unwrap();
        assert_eq!(second, frames[2]);
    }

    #[test]
    fn clock_with_no_mapped_frames() {
        let mut r = rig(4, 8);
        // An allocated-but-unmapped frame is not a candidate.
        r.ffs.alloc(&r.mem, 1).unwrap();
        assert!(r.hand.select_victim(&r.ffs, &r.mem).is_none());
    }

    #[test]
    fn swap_round_trip_preserves_bytes() {
        let mut r = rig(2, 4);
        let va = VirtAddr::new(VA);
        let frame = map_page(&mut r, 1, va);
        r.mem.write_u8(frame + 100, 0x7E);
        r.mem.write_u8(frame + PAGE_SIZE - 1, 0x55);

        swap_out(&r.mem, &mut r.ffs, &mut r.swap, &mut r.cpu, &mut r.con, frame);
        r.ffs.claim(frame, 1);

        // The PTE now names the slot and the frame metadata is gone.
        let pte = read_entry(&r.mem, paging::pte_lookup(&r.mem, r.pd, va).unwrap());
        assert!(pte.is_swapped());
        let slot = pte.frame_number();
        assert_eq!(r.swap.owner_of(slot), Some(1));
        assert!(!r.ffs.frame(r.ffs.index_of(frame)).has_mapping());

        // Scribble over the frame, then restore: bytes must come back.
        r.mem.zero_page(frame);
        r.ffs.free(1, frame);
        let restored = swap_in(
            &r.mem, &mut r.ffs, &mut r.swap, &mut r.cpu, &mut r.hand, &mut r.con, slot,
        )
        .unwrap();
        assert_eq!(r.mem.read_u8(restored + 100), 0x7E);
        assert_eq!(r.mem.read_u8(restored + PAGE_SIZE - 1), 0x55);
        assert_eq!(r.swap.free_count(), 4);
    }

    #[test]
    fn swap_in_evicts_when_pool_is_full() {
        let mut r = rig(1, 4);
        let va_a = VirtAddr::new(VA);
        let va_b = VirtAddr::new(VA + PAGE_SIZE);

        let frame = map_page(&mut r, 1, va_a);
        r.mem.write_u8(frame, 0xA1);

        // Evict page A, then map page B into the single frame.
        swap_out(&r.mem, &mut r.ffs, &mut r.swap, &mut r.cpu, &mut r.con, frame);
        let slot_a = read_entry(&r.mem, paging::pte_lookup(&r.mem, r.pd, va_a).unwrap())
            .frame_number();
        r.ffs.claim(frame, 1);
        r.mem.zero_page(frame);
        r.ffs.set_mapping(frame, va_b, r.pd);
        let pte_b = pte_of(&r.mem, &mut r.pts, r.pd, va_b, PageFlags::INTERMEDIATE_USER);
        write_entry(
            &r.mem,
            pte_b,
            PageTableEntry::new(frame.frame_number(), PageFlags::USER_PAGE),
        );
        r.mem.write_u8(frame, 0xB2);

        // Swapping A back in has no free frame: B must be evicted.
        let restored = swap_in(
            &r.mem, &mut r.ffs, &mut r.swap, &mut r.cpu, &mut r.hand, &mut r.con, slot_a,
        )
        .unwrap();
        assert_eq!(restored, frame);
        assert_eq!(r.mem.read_u8(restored), 0xA1);
        let pte = read_entry(&r.mem, paging::pte_lookup(&r.mem, r.pd, va_b).unwrap());
        assert!(pte.is_swapped());
    }

    #[test]
    fn debug_lines_are_rate_limited() {
        let mut r = rig(2, 4);
        r.con.start_capture();
        r.swap.set_debug_budget(1);

        let frame = map_page(&mut r, 1, VirtAddr::new(VA));
        swap_out(&r.mem, &mut r.ffs, &mut r.swap, &mut r.cpu, &mut r.con, frame);
        r.ffs.claim(frame, 1);

        let other = map_page(&mut r, 1, VirtAddr::new(VA + PAGE_SIZE));
        swap_out(&r.mem, &mut r.ffs, &mut r.swap, &mut r.cpu, &mut r.con, other);
        r.ffs.claim(other, 1);

        // Budget of one: exactly one line, in the contract format, naming
        // pool-relative indices.
        let lines = r.con.take_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], "eviction:: FFS frame 0x0, swap frame 0x0 copy");
    }

    #[test]
    fn release_owned_slots() {
        let mut r = rig(4, 4);
        r.swap.alloc_slot(5).unwrap();
        r.swap.alloc_slot(5).unwrap();
        r.swap.alloc_slot(6).unwrap();
        assert_eq!(r.swap.release_owned(5), 2);
        assert_eq!(r.swap.free_count(), 3);
        assert!(r.swap.is_used(2));
    }
}
