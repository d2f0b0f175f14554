// =============================================================================
// PagerOS — Kernel Console (kprint! / kprintln!)
// =============================================================================
//
// Formatted text output for the kernel, similar to Linux's printk(). The
// user-visible lines emitted here (segmentation faults, out-of-memory
// deaths, swap traffic) are a stable byte-level contract — harnesses match
// them literally — so they bypass the `log` facade and its configurable
// formatting entirely.
//
// WHERE OUTPUT GOES:
//   1. A process-wide sink function, registered once (the demo binary
//      points it at stdout). Static flag + function pointer pattern: no
//      allocation, works before anything else is initialized.
//   2. Optionally, a per-machine capture buffer, so tests can assert on
//      the exact lines one machine produced without seeing another's.
//
// =============================================================================

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use spin::Once;

/// The process-wide sink, registered at most once.
static SINK: Once<fn(&str)> = Once::new();

/// Registers the console sink. Later calls are ignored — the first
/// registration wins for the life of the process.
pub fn set_global_sink(sink: fn(&str)) {
    SINK.call_once(|| sink);
}

/// One machine's console: buffers partial writes into lines and hands
/// complete lines to the sink and/or the capture buffer.
pub struct Console {
    pending: String,
    capture: Option<Vec<String>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            capture: None,
        }
    }

    /// Starts capturing complete lines. Used by tests.
    pub fn start_capture(&mut self) {
        if self.capture.is_none() {
            self.capture = Some(Vec::new());
        }
    }

    /// Takes every line captured so far.
    pub fn take_lines(&mut self) -> Vec<String> {
        match self.capture.as_mut() {
            Some(lines) => core::mem::take(lines),
            None => Vec::new(),
        }
    }

    fn emit_line(&mut self, line: String) {
        if let Some(sink) = SINK.get() {
            sink(&line);
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.push(line);
        }
    }

    /// Backing function for the `kprint!`/`kprintln!` macros.
    #[doc(hidden)]
    pub fn _kprint(&mut self, args: fmt::Arguments) {
        // String's fmt::Write never fails.
        let _ = self.write_fmt(args);
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for part in s.split_inclusive('\n') {
            if let Some(stripped) = part.strip_suffix('\n') {
                self.pending.push_str(stripped);
                let line = core::mem::take(&mut self.pending);
                self.emit_line(line);
            } else {
                self.pending.push_str(part);
            }
        }
        Ok(())
    }
}

/// Prints formatted text to a machine's console.
///
/// Works like `print!()`, but the first argument names the console:
/// ```ignore
/// kprint!(console, "P{} faulted", pid);
/// ```
#[macro_export]
macro_rules! kprint {
    ($console:expr, $($arg:tt)*) => {
        $console._kprint(format_args!($($arg)*))
    };
}

/// Prints formatted text followed by a newline to a machine's console.
#[macro_export]
macro_rules! kprintln {
    ($console:expr) => {
        $crate::kprint!($console, "\n")
    };
    ($console:expr, $($arg:tt)*) => {
        $crate::kprint!($console, "{}\n", format_args!($($arg)*))
    };
}

// =============================================================================
// Tests
// =============================================================================
