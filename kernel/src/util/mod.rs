// =============================================================================
// PagerOS — Kernel Utilities
// =============================================================================
//
// Shared utilities used across the entire kernel.
// These are deliberately minimal — just the essentials.
//
//   console.rs — kprint!/kprintln! macros and the console sink
// =============================================================================

pub mod console;
