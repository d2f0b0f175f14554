//! Process management.

pub mod process;

pub use process::Pid;
