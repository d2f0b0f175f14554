// =============================================================================
// PagerOS — Architecture Abstraction
// =============================================================================
//
// The processor surface the VM core consumes: control registers (CR2/CR3),
// per-page TLB invalidation, and the interrupt-enable flag. The rest of
// the kernel uses `crate::arch::cpu` and never cares that the processor
// behind it is simulated.
// =============================================================================

pub mod cpu;
