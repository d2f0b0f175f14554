// =============================================================================
// PagerOS — The Machine
// =============================================================================
//
// `System` ties the subsystems together: simulated memory and CPU, the two
// frame pools, the swap store, the clock hand, the process table, and the
// console. It exposes
//
//   - bring-up        (System::new — the system directory, identity maps)
//   - the syscalls    (vmalloc, vfree, vcreate, kill, switch_to)
//   - the user access path (read_byte/write_byte — TLB, walk, fault, retry)
//   - observability   (free_ffs_pages, used_ffs_frames, …, audit)
//
// One `System` is one machine. Tests build as many as they like; nothing
// here is global state except the console sink registration.
//
// =============================================================================

use alloc::string::ToString;
use alloc::vec;

use crate::arch::cpu::Cpu;
use crate::memory::address::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, PAGE_SIZE};
use crate::memory::fault::{self, FaultResult};
use crate::memory::ffs::FfsPool;
use crate::memory::layout::MemoryLayout;
use crate::memory::paging::{self, PageFlags};
use crate::memory::phys::PhysMemory;
use crate::memory::ptpool::PtPool;
use crate::memory::swap::{ClockHand, SwapStore};
use crate::memory::vheap::{Region, RegionList};
use crate::task::process::{Pid, Process, ProcessState, ProcessTable, KERNEL_PID};
use crate::util::console::Console;

// =============================================================================
// Errors
// =============================================================================

/// Failures returned to callers of the system calls. Nothing in here
/// terminates a process; fault-path failures are `FaultResult`'s business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// `vmalloc`: zero bytes requested, or no free region large enough.
    NoRegion,
    /// `vfree`: the range does not exactly cover prior allocations.
    BadFree,
    /// The calling process has no demand-paged heap (kernel process),
    /// or is dead.
    NotUser,
    /// `vcreate`: the process table is full.
    TableFull,
    /// A pid that names no live process.
    NoSuchProcess,
}

/// Failures surfaced by the simulated memory access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The access faulted and the fault terminated the process.
    Fault(FaultResult),
    /// The current process is already dead.
    DeadProcess,
}

// =============================================================================
// Observability snapshot
// =============================================================================

/// Pool usage counters, for boot-time reporting and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    pub ffs_frames: u32,
    pub ffs_free: u32,
    pub swap_slots: u32,
    pub swap_free: u32,
    pub pt_frames: u32,
    pub pt_free: u32,
}

// =============================================================================
// The machine
// =============================================================================

pub struct System {
    layout: MemoryLayout,
    pub(crate) mem: PhysMemory,
    pub(crate) cpu: Cpu,
    pub(crate) pt_pool: PtPool,
    pub(crate) ffs: FfsPool,
    pub(crate) swap: SwapStore,
    pub(crate) clock: ClockHand,
    pub(crate) procs: ProcessTable,
    pub(crate) console: Console,
    sys_pd: PhysAddr,
}

impl System {
    /// Brings the machine up: reserves physical memory, builds the system
    /// page directory with identity mappings for the kernel, FFS, and
    /// swap regions, and installs the kernel boot process as current.
    pub fn new(layout: MemoryLayout) -> Self {
        let layout = layout.validated();
        let mem = PhysMemory::new(layout.phys_end().as_u32() as usize);
        let mut pt_pool = PtPool::new(layout.pt_base(), layout.pt_frames);
        let ffs = FfsPool::new(layout.ffs_base(), layout.ffs_frames);
        let swap = SwapStore::new(layout.swap_base(), layout.swap_slots);

        let sys_pd = pt_pool.alloc(&mem);
        paging::identity_map(&mem, &mut pt_pool, sys_pd, PhysAddr::new(0), layout.phys_end());

        let mut cpu = Cpu::new();
        cpu.write_cr3(sys_pd);

        let mut procs = ProcessTable::new();
        procs.install(Process {
            pid: KERNEL_PID,
            name: "kernel".to_string(),
            priority: 0,
            state: ProcessState::Current,
            is_kernel: true,
            pd: sys_pd,
            regions: RegionList::empty(),
            entry: VirtAddr::zero(),
            stack_size: 0,
        });

        log::info!(
            "[vm] paging up: sys_pd={}, identity-mapped {:#x} bytes",
            sys_pd,
            layout.phys_end().as_u32()
        );
        log::info!(
            "[vm] FFS {} frames at {}, swap {} slots at {}, PT pool {} frames",
            layout.ffs_frames,
            layout.ffs_base(),
            layout.swap_slots,
            layout.swap_base(),
            layout.pt_frames
        );

        Self {
            layout,
            mem,
            cpu,
            pt_pool,
            ffs,
            swap,
            clock: ClockHand::new(),
            procs,
            console: Console::new(),
            sys_pd,
        }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn current_pid(&self) -> Pid {
        self.procs.current_pid()
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcessState> {
        self.procs.get(pid).map(|p| p.state)
    }

    // =========================================================================
    // System calls
    // =========================================================================

    /// Creates a user process with a demand-paged heap.
    ///
    /// Allocates a page directory from the PT pool, copies every directory
    /// entry from the system directory (the new process inherits the
    /// kernel identity mappings), and installs a heap map with one free
    /// region spanning the whole window. `entry`, `stack_size`, and
    /// `priority` are recorded on the process; running it is the
    /// harness's job.
    pub fn vcreate(
        &mut self,
        entry: VirtAddr,
        stack_size: u32,
        priority: u16,
        name: &str,
    ) -> Result<Pid, SyscallError> {
        let mask = self.cpu.disable();
        let result = self.vcreate_masked(entry, stack_size, priority, name);
        self.cpu.restore(mask);
        result
    }

    fn vcreate_masked(
        &mut self,
        entry: VirtAddr,
        stack_size: u32,
        priority: u16,
        name: &str,
    ) -> Result<Pid, SyscallError> {
        let pid = self.procs.alloc_pid().ok_or(SyscallError::TableFull)?;

        let pd = self.pt_pool.alloc(&self.mem);
        for i in 0..ENTRIES_PER_TABLE {
            paging::set_entry_at(&self.mem, pd, i, paging::entry_at(&self.mem, self.sys_pd, i));
        }

        self.procs.install(Process {
            pid,
            name: name.to_string(),
            priority,
            state: ProcessState::Ready,
            is_kernel: false,
            pd,
            regions: RegionList::new(self.layout.vheap_base(), self.layout.vheap_end()),
            entry,
            stack_size,
        });

        log::info!("[vm] created P{} \"{}\" pd={}", pid, name, pd);
        Ok(pid)
    }

    /// Reserves `n_bytes` (rounded up to pages) of the current process's
    /// virtual heap. Pure bookkeeping: no page is mapped until touched.
    pub fn vmalloc(&mut self, n_bytes: u32) -> Result<VirtAddr, SyscallError> {
        let mask = self.cpu.disable();
        let result = {
            let proc = self.procs.current_mut();
            if proc.is_kernel || !proc.is_live() {
                Err(SyscallError::NotUser)
            } else {
                proc.regions.alloc(n_bytes).ok_or(SyscallError::NoRegion)
            }
        };
        self.cpu.restore(mask);
        result
    }

    /// Releases a previously allocated heap range of the current process.
    ///
    /// `addr` must be page-aligned (a region start is always a page
    /// boundary) and the page-rounded range must exactly cover a run of
    /// allocated regions, or nothing changes and `BadFree` comes back.
    /// Every page of the range still resident loses its frame to the pool
    /// and its TLB entry; evicted pages give their swap slot back.
    pub fn vfree(&mut self, addr: VirtAddr, n_bytes: u32) -> Result<(), SyscallError> {
        let mask = self.cpu.disable();
        let result = self.vfree_masked(addr, n_bytes);
        self.cpu.restore(mask);
        result
    }

    fn vfree_masked(&mut self, addr: VirtAddr, n_bytes: u32) -> Result<(), SyscallError> {
        let (pid, pd) = {
            let proc = self.procs.current();
            if proc.is_kernel || !proc.is_live() {
                return Err(SyscallError::NotUser);
            }
            (proc.pid, proc.pd)
        };

        if n_bytes == 0 {
            return Err(SyscallError::BadFree);
        }
        // An unaligned address can never name a region start, so aligning
        // it down here would quietly free a range the caller never
        // allocated from.
        if !addr.is_page_aligned() {
            return Err(SyscallError::BadFree);
        }
        let start = addr.page_align_down();
        let end = (addr.as_u32() as u64 + n_bytes as u64 + (PAGE_SIZE as u64 - 1))
            & !(PAGE_SIZE as u64 - 1);
        if end > u32::MAX as u64 {
            return Err(SyscallError::BadFree);
        }
        let end = VirtAddr::new(end as u32);

        if !self.procs.current().regions.covers_exactly(start, end) {
            return Err(SyscallError::BadFree);
        }

        // Unmap before the bookkeeping flips: resident pages return their
        // frames, evicted pages their swap slots.
        let mut page = start;
        while page < end {
            if let Some(pte_pa) = paging::pte_lookup(&self.mem, pd, page) {
                let pte = paging::read_entry(&self.mem, pte_pa);
                if pte.is_present() {
                    self.ffs.free(pid, pte.addr());
                    paging::write_entry(&self.mem, pte_pa, paging::PageTableEntry::EMPTY);
                    self.cpu.invlpg(page);
                } else if pte.is_swapped() {
                    self.swap.free_slot(pte.frame_number());
                    paging::write_entry(&self.mem, pte_pa, paging::PageTableEntry::EMPTY);
                }
            }
            page = page + PAGE_SIZE;
        }

        self.procs.current_mut().regions.release(start, end);
        Ok(())
    }

    /// Terminates a process and releases its VM resources. Must tolerate
    /// being called from fault context — it only marks and sweeps, never
    /// reschedules.
    pub fn kill(&mut self, pid: Pid) -> Result<(), SyscallError> {
        match self.procs.get(pid) {
            Some(p) if p.is_live() && !p.is_kernel => {}
            _ => return Err(SyscallError::NoSuchProcess),
        }
        self.terminate(pid);
        Ok(())
    }

    /// The termination primitive the fault resolver calls directly.
    pub(crate) fn terminate(&mut self, pid: Pid) {
        let freed_frames = self.ffs.release_owned(pid);
        let freed_slots = self.swap.release_owned(pid);
        let proc = self.procs.get_mut(pid).expect("terminate: no such process");
        proc.state = ProcessState::Dead;
        proc.regions.clear();
        // The page directory and tables stay in the PT pool; the pool
        // does not reclaim frames (see ptpool.rs).
        log::info!(
            "[vm] P{} terminated: {} frames, {} swap slots released",
            pid,
            freed_frames,
            freed_slots
        );
    }

    /// Makes `pid` the running process and loads its page directory
    /// (flushing the TLB, as the CR3 load does on hardware).
    pub fn switch_to(&mut self, pid: Pid) -> Result<(), SyscallError> {
        let pd = match self.procs.get(pid) {
            Some(p) if p.is_live() => p.pd,
            _ => return Err(SyscallError::NoSuchProcess),
        };
        self.procs.set_current(pid);
        self.cpu.write_cr3(pd);
        Ok(())
    }

    // =========================================================================
    // The user memory access path
    // =========================================================================

    /// Reads one byte at a virtual address of the current process,
    /// demand-paging it in if needed.
    pub fn read_byte(&mut self, addr: VirtAddr) -> Result<u8, AccessError> {
        let pa = self.translate_or_fault(addr, false)?;
        Ok(self.mem.read_u8(pa))
    }

    /// Writes one byte at a virtual address of the current process,
    /// demand-paging it in if needed.
    pub fn write_byte(&mut self, addr: VirtAddr, value: u8) -> Result<(), AccessError> {
        let pa = self.translate_or_fault(addr, true)?;
        self.mem.write_u8(pa, value);
        Ok(())
    }

    /// What the processor does on a memory access: TLB, then the page
    /// tables (filling the TLB and setting accessed/dirty), and on a
    /// missing or forbidden translation a page fault — after which the
    /// access retries, exactly once per resolution.
    fn translate_or_fault(&mut self, addr: VirtAddr, is_write: bool) -> Result<PhysAddr, AccessError> {
        let vpage = addr.page_align_down();
        loop {
            if !self.procs.current().is_live() {
                return Err(AccessError::DeadProcess);
            }
            if let Some(frame) = self.cpu.tlb_lookup(vpage) {
                return Ok(frame + addr.page_offset());
            }

            let user_mode = !self.procs.current().is_kernel;
            if let Some(pte_pa) = paging::pte_lookup(&self.mem, self.cpu.read_cr3(), vpage) {
                let pte = paging::read_entry(&self.mem, pte_pa);
                let user_ok = !user_mode || pte.flags().contains(PageFlags::USER);
                let write_ok = !is_write || pte.flags().contains(PageFlags::WRITABLE);
                if pte.is_present() && user_ok && write_ok {
                    // Loading the translation sets the accessed bit; a
                    // write fill sets dirty too.
                    let mut loaded = pte.with(PageFlags::ACCESSED);
                    if is_write {
                        loaded = loaded.with(PageFlags::DIRTY);
                    }
                    if loaded != pte {
                        paging::write_entry(&self.mem, pte_pa, loaded);
                    }
                    self.cpu.tlb_fill(vpage, pte.addr());
                    return Ok(pte.addr() + addr.page_offset());
                }
            }

            self.cpu.set_cr2(addr);
            let mask = self.cpu.disable();
            let outcome = fault::resolve(self);
            self.cpu.restore(mask);
            if outcome != FaultResult::Resolved {
                return Err(AccessError::Fault(outcome));
            }
        }
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Number of free FFS frames.
    pub fn free_ffs_pages(&self) -> u32 {
        self.ffs.free_count()
    }

    /// Number of free swap slots.
    pub fn free_swap_pages(&self) -> u32 {
        self.swap.free_count()
    }

    /// Kernel-preallocated pages plus the process's allocated heap pages.
    /// Zero for a pid that names no process.
    pub fn allocated_virtual_pages(&self, pid: Pid) -> u32 {
        match self.procs.get(pid) {
            Some(p) => self.layout.kernel_prealloc_pages() + p.regions.total_allocated(),
            None => 0,
        }
    }

    /// FFS frames currently owned by `pid`.
    pub fn used_ffs_frames(&self, pid: Pid) -> u32 {
        self.ffs.used_frames(pid)
    }

    /// Pool usage snapshot.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            ffs_frames: self.layout.ffs_frames,
            ffs_free: self.ffs.free_count(),
            swap_slots: self.layout.swap_slots,
            swap_free: self.swap.free_count(),
            pt_frames: self.layout.pt_frames,
            pt_free: self.pt_pool.free_count(),
        }
    }

    /// Arms the swap engine's rate-limited debug output for the next
    /// `budget` lines.
    pub fn set_swap_debug_budget(&mut self, budget: u32) {
        self.swap.set_debug_budget(budget);
    }

    /// The current process's heap map, for diagnostics.
    pub fn regions_of(&self, pid: Pid) -> Option<&[Region]> {
        self.procs.get(pid).map(|p| p.regions.regions())
    }

    // =========================================================================
    // Self-check
    // =========================================================================

    /// Cross-checks every piece of VM state against every other and
    /// panics on the first disagreement. Cheap enough to run after every
    /// step of a test scenario.
    pub fn audit(&self) {
        // Frame accounting: free + Σ owned = pool size.
        let owned: u32 = self.procs.iter().map(|p| self.ffs.used_frames(p.pid)).sum();
        assert_eq!(
            self.ffs.free_count() + owned,
            self.layout.ffs_frames,
            "audit: FFS accounting broken"
        );

        let vheap_base = self.layout.vheap_base();
        let vheap_end = self.layout.vheap_end();
        let mut slot_refs = vec![0u32; self.swap.capacity() as usize];

        for proc in self.procs.iter().filter(|p| !p.is_kernel && p.is_live()) {
            // Region list partitions the heap window without gaps,
            // overlaps, or adjacent free regions.
            let regions = proc.regions.regions();
            assert!(!regions.is_empty(), "audit: P{} has no heap map", proc.pid);
            assert_eq!(regions[0].start, vheap_base, "audit: P{} heap map low edge", proc.pid);
            assert_eq!(
                regions[regions.len() - 1].end(),
                vheap_end,
                "audit: P{} heap map high edge",
                proc.pid
            );
            let mut allocated_pages = 0;
            for w in regions.windows(2) {
                assert_eq!(w[0].end(), w[1].start, "audit: P{} heap map gap", proc.pid);
                assert!(
                    w[0].allocated || w[1].allocated,
                    "audit: P{} adjacent free regions",
                    proc.pid
                );
            }
            for r in regions.iter().filter(|r| r.allocated) {
                allocated_pages += r.size / PAGE_SIZE;
            }
            assert_eq!(
                allocated_pages,
                proc.regions.total_allocated(),
                "audit: P{} allocated-page counter drifted",
                proc.pid
            );

            // Every mapping in the heap window agrees with the frame
            // table; every evicted page names a used swap slot.
            let mut page = vheap_base;
            while page < vheap_end {
                match paging::pte_lookup(&self.mem, proc.pd, page) {
                    None => {
                        // Whole directory entry absent: skip its 4 MB span.
                        page = VirtAddr::new(
                            (page.as_u32() & 0xFFC0_0000).wrapping_add(0x40_0000),
                        );
                        if page.as_u32() == 0 {
                            break;
                        }
                        continue;
                    }
                    Some(pte_pa) => {
                        let pte = paging::read_entry(&self.mem, pte_pa);
                        if pte.is_present() {
                            let frame = pte.addr();
                            let meta = self.ffs.frame(self.ffs.index_of(frame));
                            assert!(meta.used, "audit: P{} maps free frame", proc.pid);
                            assert_eq!(meta.owner, proc.pid, "audit: frame owner mismatch");
                            assert_eq!(meta.vaddr, page, "audit: frame vaddr mismatch");
                            assert_eq!(meta.pd, Some(proc.pd), "audit: frame pd mismatch");
                        } else if pte.is_swapped() {
                            let slot = pte.frame_number();
                            assert_eq!(
                                self.swap.owner_of(slot),
                                Some(proc.pid),
                                "audit: swap slot owner mismatch"
                            );
                            slot_refs[slot as usize] += 1;
                        }
                    }
                }
                page = page + PAGE_SIZE;
            }
        }

        // Swap bijection: every used slot of a live process is named by
        // exactly one PTE.
        for (slot, refs) in slot_refs.iter().enumerate() {
            let owner = self.swap.owner_of(slot as u32);
            let live_owner = owner
                .and_then(|pid| self.procs.get(pid))
                .map(|p| p.is_live() && !p.is_kernel)
                .unwrap_or(false);
            if live_owner {
                assert_eq!(*refs, 1, "audit: swap slot {:#x} named {} times", slot, refs);
            } else {
                assert_eq!(*refs, 0, "audit: dangling reference to swap slot {:#x}", slot);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A small machine with one user process switched in.
    fn boot(ffs: u32, swap: u32) -> (System, Pid) {
        let mut sys = System::new(MemoryLayout::custom(ffs, swap, 16, 128));
        let pid = sys.vcreate(VirtAddr::zero(), 4096, 20, "test").unwrap();
        sys.switch_to(pid).unwrap();
        (sys, pid)
    }

    #[test]
    fn bring_up_state() {
        let sys = System::new(MemoryLayout::custom(8, 16, 8, 64));
        assert_eq!(sys.current_pid(), KERNEL_PID);
        assert_eq!(sys.free_ffs_pages(), 8);
        assert_eq!(sys.free_swap_pages(), 16);
        sys.audit();
    }

    #[test]
    fn kernel_process_has_no_heap() {
        let mut sys = System::new(MemoryLayout::custom(8, 16, 8, 64));
        assert_eq!(sys.vmalloc(4096), Err(SyscallError::NotUser));
        assert_eq!(sys.vfree(VirtAddr::new(0x1000_0000), 4096), Err(SyscallError::NotUser));
    }

    #[test]
    fn pages_materialize_on_touch_only() {
        let (mut sys, pid) = boot(8, 0);
        let base = sys.vmalloc(4 * PAGE_SIZE).unwrap();
        assert_eq!(sys.used_ffs_frames(pid), 0);

        sys.write_byte(base, 1).unwrap();
        sys.write_byte(base + PAGE_SIZE, 2).unwrap();
        assert_eq!(sys.used_ffs_frames(pid), 2);
        assert_eq!(sys.free_ffs_pages(), 6);

        // Repeated touches of the same page allocate nothing new.
        sys.write_byte(base + 7, 3).unwrap();
        assert_eq!(sys.used_ffs_frames(pid), 2);

        // Fresh pages read zero.
        assert_eq!(sys.read_byte(base + 2 * PAGE_SIZE + 99).unwrap(), 0);
        sys.audit();
    }

    #[test]
    fn segfault_kills_only_the_offender() {
        let (mut sys, pid) = boot(8, 0);
        let other = sys.vcreate(VirtAddr::zero(), 4096, 20, "bystander").unwrap();
        sys.console_mut().start_capture();

        let base = sys.vmalloc(2 * PAGE_SIZE).unwrap();
        sys.write_byte(base, 1).unwrap();

        // One past the allocation: illegal.
        let err = sys.write_byte(base + 2 * PAGE_SIZE, 9).unwrap_err();
        assert_eq!(err, AccessError::Fault(FaultResult::Segfault));
        assert_eq!(sys.process_state(pid), Some(ProcessState::Dead));

        let expected = alloc::format!(
            "P{}:: SEGMENTATION_FAULT at {:#x}",
            pid,
            (base + 2 * PAGE_SIZE).as_u32()
        );
        assert_eq!(sys.console_mut().take_lines(), [expected]);

        // The offender's frames are gone; the bystander still runs.
        assert_eq!(sys.used_ffs_frames(pid), 0);
        assert_eq!(sys.free_ffs_pages(), 8);
        sys.switch_to(other).unwrap();
        let b = sys.vmalloc(PAGE_SIZE).unwrap();
        sys.write_byte(b, 5).unwrap();
        assert_eq!(sys.read_byte(b).unwrap(), 5);
        sys.audit();
    }

    #[test]
    fn heap_addresses_below_the_window_fault() {
        let (mut sys, pid) = boot(8, 0);
        sys.vmalloc(PAGE_SIZE).unwrap();
        let err = sys.read_byte(VirtAddr::new(0x0F00_0000)).unwrap_err();
        assert_eq!(err, AccessError::Fault(FaultResult::Segfault));
        assert_eq!(sys.process_state(pid), Some(ProcessState::Dead));
    }

    #[test]
    fn exhaustion_without_swap_is_oom() {
        let (mut sys, pid) = boot(4, 0);
        sys.console_mut().start_capture();
        let base = sys.vmalloc(5 * PAGE_SIZE).unwrap();
        for i in 0..4 {
            sys.write_byte(base + i * PAGE_SIZE, 1).unwrap();
        }
        assert_eq!(sys.free_ffs_pages(), 0);

        let fatal = base + 4 * PAGE_SIZE;
        let err = sys.write_byte(fatal, 1).unwrap_err();
        assert_eq!(err, AccessError::Fault(FaultResult::OutOfMemory));
        assert_eq!(sys.process_state(pid), Some(ProcessState::Dead));
        assert_eq!(
            sys.console_mut().take_lines(),
            [alloc::format!("P{}:: OUT_OF_MEMORY (addr={:#x})", pid, fatal.as_u32())]
        );
        // Death released everything.
        assert_eq!(sys.free_ffs_pages(), 4);
        sys.audit();
    }

    #[test]
    fn pressure_evicts_and_preserves_bytes() {
        let (mut sys, pid) = boot(4, 16);
        let base = sys.vmalloc(8 * PAGE_SIZE).unwrap();
        for i in 0..8 {
            sys.write_byte(base + i * PAGE_SIZE, 0x10 + i as u8).unwrap();
            // FFS never exceeds the pool; swap picks up the overflow.
            assert!(sys.free_ffs_pages() == 0 || sys.used_ffs_frames(pid) <= 4);
        }
        assert_eq!(sys.used_ffs_frames(pid), 4);
        assert_eq!(sys.free_swap_pages(), 16 - 4);
        sys.audit();

        // Reading everything back round-trips through swap.
        for i in 0..8 {
            assert_eq!(sys.read_byte(base + i * PAGE_SIZE).unwrap(), 0x10 + i as u8);
        }
        assert_eq!(sys.used_ffs_frames(pid), 4);
        sys.audit();
    }

    #[test]
    fn vfree_round_trip_restores_counters() {
        let (mut sys, pid) = boot(8, 0);
        let before_regions = sys.regions_of(pid).unwrap().len();
        let before_vpages = sys.allocated_virtual_pages(pid);

        let base = sys.vmalloc(8 * PAGE_SIZE).unwrap();
        for i in 0..4 {
            sys.write_byte(base + i * PAGE_SIZE, 1).unwrap();
        }
        assert_eq!(sys.used_ffs_frames(pid), 4);
        assert_eq!(sys.allocated_virtual_pages(pid), before_vpages + 8);

        sys.vfree(base, 8 * PAGE_SIZE).unwrap();
        assert_eq!(sys.used_ffs_frames(pid), 0);
        assert_eq!(sys.free_ffs_pages(), 8);
        assert_eq!(sys.allocated_virtual_pages(pid), before_vpages);
        assert_eq!(sys.regions_of(pid).unwrap().len(), before_regions);

        // Double free fails without touching anything.
        assert_eq!(sys.vfree(base, 8 * PAGE_SIZE), Err(SyscallError::BadFree));
        sys.audit();
    }

    #[test]
    fn vfree_rejects_partial_ranges() {
        let (mut sys, _) = boot(8, 0);
        let base = sys.vmalloc(4 * PAGE_SIZE).unwrap();
        assert_eq!(sys.vfree(base + PAGE_SIZE, PAGE_SIZE), Err(SyscallError::BadFree));
        assert_eq!(sys.vfree(base, 3 * PAGE_SIZE), Err(SyscallError::BadFree));
        assert_eq!(sys.vfree(base, 0), Err(SyscallError::BadFree));
        // An unaligned address is never a region start, even when the
        // page-rounded range would cover the allocation exactly.
        assert_eq!(sys.vfree(base + 1, 4 * PAGE_SIZE - 1), Err(SyscallError::BadFree));
        assert_eq!(sys.vfree(base + 7, 4 * PAGE_SIZE), Err(SyscallError::BadFree));
        // The failed attempts changed nothing.
        assert_eq!(sys.vfree(base, 4 * PAGE_SIZE), Ok(()));
        sys.audit();
    }

    #[test]
    fn vfree_invalidates_stale_translations() {
        let (mut sys, _) = boot(8, 0);
        let base = sys.vmalloc(PAGE_SIZE).unwrap();
        sys.write_byte(base, 0xEE).unwrap();
        sys.vfree(base, PAGE_SIZE).unwrap();

        // Same address, new allocation: the touch must fault and get a
        // zeroed frame, not ride a stale TLB entry to the old one.
        let again = sys.vmalloc(PAGE_SIZE).unwrap();
        assert_eq!(again, base);
        assert_eq!(sys.read_byte(again).unwrap(), 0);
        sys.audit();
    }

    #[test]
    fn vfree_releases_swap_slots_of_evicted_pages() {
        let (mut sys, pid) = boot(2, 8);
        let base = sys.vmalloc(4 * PAGE_SIZE).unwrap();
        for i in 0..4 {
            sys.write_byte(base + i * PAGE_SIZE, 1).unwrap();
        }
        assert_eq!(sys.free_swap_pages(), 8 - 2);

        sys.vfree(base, 4 * PAGE_SIZE).unwrap();
        assert_eq!(sys.free_swap_pages(), 8);
        assert_eq!(sys.used_ffs_frames(pid), 0);
        sys.audit();
    }

    #[test]
    fn kill_releases_frames_and_slots() {
        let (mut sys, pid) = boot(4, 16);
        let base = sys.vmalloc(6 * PAGE_SIZE).unwrap();
        for i in 0..6 {
            sys.write_byte(base + i * PAGE_SIZE, 1).unwrap();
        }
        assert!(sys.free_swap_pages() < 16);

        sys.kill(pid).unwrap();
        assert_eq!(sys.free_ffs_pages(), 4);
        assert_eq!(sys.free_swap_pages(), 16);
        assert_eq!(sys.process_state(pid), Some(ProcessState::Dead));

        // Dead processes are unschedulable and untouchable.
        assert_eq!(sys.switch_to(pid), Err(SyscallError::NoSuchProcess));
        assert_eq!(sys.kill(pid), Err(SyscallError::NoSuchProcess));
        assert_eq!(sys.read_byte(base), Err(AccessError::DeadProcess));
        sys.audit();
    }

    #[test]
    fn observability_counts_kernel_prealloc() {
        let (sys, pid) = boot(8, 0);
        let prealloc = sys.layout().kernel_prealloc_pages();
        assert_eq!(sys.allocated_virtual_pages(pid), prealloc);
        // Unknown pid reports zero.
        assert_eq!(sys.allocated_virtual_pages(42), 0);
    }

    #[test]
    fn process_table_fills_up() {
        let mut sys = System::new(MemoryLayout::custom(8, 0, 80, 64));
        for i in 1..crate::task::process::NPROC {
            let name = alloc::format!("p{}", i);
            sys.vcreate(VirtAddr::zero(), 4096, 20, &name).unwrap();
        }
        assert_eq!(
            sys.vcreate(VirtAddr::zero(), 4096, 20, "straw"),
            Err(SyscallError::TableFull)
        );
    }
}
