// =============================================================================
// PagerOS — Kernel Crate Root
// =============================================================================
//
// The demand-paged virtual-memory core: per-process virtual heaps over a
// fixed pool of FFS frames, with clock-driven eviction to a swap store.
//
// Subsystem map:
//
//   arch/    — the processor surface (CR2/CR3, TLB, interrupt flag)
//   memory/  — frame pools, page tables, region lists, swap, fault path
//   task/    — the process table and per-process VM state
//   util/    — the kernel console
//   system   — the machine: bring-up, syscalls, the user access path
//
// The crate is `no_std` + `alloc`; the test harness and the demo binary
// supply std. One `System` value is one machine — build as many as you
// like, nothing is shared between them but the console sink.
//
// =============================================================================

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod memory;
pub mod system;
pub mod task;
pub mod util;

pub use memory::address::{PhysAddr, VirtAddr, PAGE_SIZE};
pub use memory::fault::FaultResult;
pub use memory::layout::MemoryLayout;
pub use system::{AccessError, MemoryStats, SyscallError, System};
pub use task::process::{Pid, ProcessState};
