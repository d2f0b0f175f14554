// =============================================================================
// PagerOS — Page-Fault Resolver
// =============================================================================
//
// Entered with interrupts masked, the faulting linear address in CR2, and
// the faulting process's directory in CR3. Classifies the fault into one
// of four outcomes and mutates exactly one PTE (plus the frame/swap
// metadata behind it) before returning, so the interrupted access can
// retry:
//
//   segfault   — address outside every allocated region: kill the process
//   swap-in    — non-present PTE carrying the SWAPPED marker: restore the
//                page from the swap store
//   lazy       — first touch of an allocated page: hand it a zeroed frame
//   pressure   — no free frame: evict a clock victim and take its frame,
//                or die out-of-memory when nothing is evictable
//
// A fault in a kernel process is a bring-up bug, not a recoverable event:
// the kernel's mappings are built once at boot and never paged.
//
// =============================================================================

use super::paging::{self, PageFlags, PageTableEntry};
use super::swap;
use crate::kprintln;
use crate::system::System;

/// Outcome of one fault resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResult {
    /// The mapping is in place; retry the access.
    Resolved,
    /// Illegal address; the process was terminated.
    Segfault,
    /// No frame and no victim; the process was terminated.
    OutOfMemory,
    /// The evicted page could not be restored; the process was terminated.
    SwapInFailed,
}

/// Resolves the fault latched in CR2 for the current process.
pub(crate) fn resolve(sys: &mut System) -> FaultResult {
    let addr = sys.cpu.read_cr2();
    let vpage = addr.page_align_down();
    let pid = sys.procs.current_pid();

    let (is_kernel, pd) = {
        let proc = sys.procs.current();
        (proc.is_kernel, proc.pd)
    };

    if is_kernel {
        log::error!("[fault] kernel process P{} faulted at {}", pid, addr);
        panic!("page fault in kernel process P{} at {}", pid, addr);
    }

    if !sys.procs.current().regions.contains_allocated(vpage) {
        kprintln!(sys.console, "P{}:: SEGMENTATION_FAULT at {:#x}", pid, addr.as_u32());
        sys.terminate(pid);
        return FaultResult::Segfault;
    }

    let pte_pa = paging::pte_of(&sys.mem, &mut sys.pt_pool, pd, vpage, PageFlags::INTERMEDIATE_USER);
    let pte = paging::read_entry(&sys.mem, pte_pa);

    if pte.is_present() {
        // The page is resident yet the access faulted: a protection
        // violation. Heap pages are always user/writable, so this cannot
        // arise from the legal access paths; treat it as a segfault.
        kprintln!(sys.console, "P{}:: SEGMENTATION_FAULT at {:#x}", pid, addr.as_u32());
        sys.terminate(pid);
        return FaultResult::Segfault;
    }

    // ── Swap-in ─────────────────────────────────────────────────────
    if pte.is_swapped() {
        let slot = pte.frame_number();
        return match swap::swap_in(
            &sys.mem,
            &mut sys.ffs,
            &mut sys.swap,
            &mut sys.cpu,
            &mut sys.clock,
            &mut sys.console,
            slot,
        ) {
            Some(frame) => {
                sys.ffs.set_mapping(frame, vpage, pd);
                paging::write_entry(
                    &sys.mem,
                    pte_pa,
                    PageTableEntry::new(frame.frame_number(), PageFlags::USER_PAGE),
                );
                sys.cpu.invlpg(vpage);
                FaultResult::Resolved
            }
            None => {
                kprintln!(sys.console, "P{}:: SWAP_IN_FAILED (addr={:#x})", pid, addr.as_u32());
                sys.terminate(pid);
                FaultResult::SwapInFailed
            }
        };
    }

    // ── Lazy allocation ─────────────────────────────────────────────
    if let Some(frame) = sys.ffs.alloc(&sys.mem, pid) {
        sys.ffs.set_mapping(frame, vpage, pd);
        paging::write_entry(
            &sys.mem,
            pte_pa,
            PageTableEntry::new(frame.frame_number(), PageFlags::USER_PAGE),
        );
        sys.cpu.invlpg(vpage);
        return FaultResult::Resolved;
    }

    // ── Pressure ────────────────────────────────────────────────────
    if sys.swap.is_enabled() {
        if let Some(victim) = sys.clock.select_victim(&sys.ffs, &sys.mem) {
            // The victim backs some *other* mapped page; the faulting
            // page has no frame, so it can never be its own victim.
            debug_assert!(
                sys.ffs.frame(sys.ffs.index_of(victim)).vaddr != vpage
                    || sys.ffs.frame(sys.ffs.index_of(victim)).pd != Some(pd)
            );
            swap::swap_out(&sys.mem, &mut sys.ffs, &mut sys.swap, &mut sys.cpu, &mut sys.console, victim);
            sys.ffs.claim(victim, pid);
            sys.mem.zero_page(victim);
            sys.ffs.set_mapping(victim, vpage, pd);
            paging::write_entry(
                &sys.mem,
                pte_pa,
                PageTableEntry::new(victim.frame_number(), PageFlags::USER_PAGE),
            );
            sys.cpu.invlpg(vpage);
            return FaultResult::Resolved;
        }
    }

    kprintln!(sys.console, "P{}:: OUT_OF_MEMORY (addr={:#x})", pid, addr.as_u32());
    sys.terminate(pid);
    FaultResult::OutOfMemory
}
