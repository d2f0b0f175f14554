//! Process management — the process table and per-process VM state.
//!
//! There is no scheduler here: the machine runs one process at a time and
//! the harness switches between them explicitly. What the VM core needs
//! from a process is exactly its record: kernel-vs-user flag, the page
//! directory, and the heap region list.

use alloc::string::String;

use crate::memory::address::{PhysAddr, VirtAddr};
use crate::memory::vheap::RegionList;

// ── Process identifiers ─────────────────────────────────────────

/// Process id: an index into the process table.
pub type Pid = u32;

/// Size of the process table.
pub const NPROC: usize = 64;

/// The boot kernel process. It owns the system page directory and can
/// never be killed.
pub const KERNEL_PID: Pid = 0;

// ── Process state ───────────────────────────────────────────────

/// The possible states of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Ready to be switched to.
    Ready,
    /// The process the machine is currently executing.
    Current,
    /// Terminated. The record remains for post-mortem queries; its
    /// resources were released at kill time.
    Dead,
}

// ── Process record ──────────────────────────────────────────────

/// Everything the kernel keeps per process.
pub struct Process {
    pub pid: Pid,
    /// Human-readable name (e.g. "init", "writer").
    pub name: String,
    pub priority: u16,
    pub state: ProcessState,
    /// Kernel processes never demand-page; a fault in one is a setup bug.
    pub is_kernel: bool,
    /// Physical address of this process's page directory.
    pub pd: PhysAddr,
    /// The heap map: which virtual ranges are legal to touch.
    pub regions: RegionList,
    /// User entry point, recorded at creation. Execution is the
    /// harness's business, not the VM core's.
    pub entry: VirtAddr,
    /// Requested stack size in bytes, recorded at creation.
    pub stack_size: u32,
}

impl Process {
    pub fn is_live(&self) -> bool {
        self.state != ProcessState::Dead
    }
}

// ── Process table ───────────────────────────────────────────────

/// The fixed-size process table plus the current-process cursor.
pub struct ProcessTable {
    slots: [Option<Process>; NPROC],
    current: Pid,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NPROC],
            current: KERNEL_PID,
        }
    }

    /// Lowest free pid, or `None` when the table is full.
    pub fn alloc_pid(&self) -> Option<Pid> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .map(|i| i as Pid)
    }

    /// Installs a process record in its slot.
    pub fn install(&mut self, process: Process) {
        let pid = process.pid as usize;
        assert!(pid < NPROC, "process table: pid {} out of range", process.pid);
        assert!(self.slots[pid].is_none(), "process table: pid {} in use", process.pid);
        self.slots[pid] = Some(process);
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid as usize)?.as_mut()
    }

    pub fn current_pid(&self) -> Pid {
        self.current
    }

    pub fn current(&self) -> &Process {
        self.get(self.current).expect("process table: no current process")
    }

    pub fn current_mut(&mut self) -> &mut Process {
        let pid = self.current;
        self.get_mut(pid).expect("process table: no current process")
    }

    /// Makes `pid` the current process. The caller has already checked
    /// it is live and loaded its directory.
    pub fn set_current(&mut self, pid: Pid) {
        if let Some(old) = self.get_mut(self.current) {
            if old.state == ProcessState::Current {
                old.state = ProcessState::Ready;
            }
        }
        self.current = pid;
        self.current_mut().state = ProcessState::Current;
    }

    /// Iterates over all live and dead process records.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
