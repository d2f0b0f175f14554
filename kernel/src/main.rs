// =============================================================================
// PagerOS — Demo Entry Point
// =============================================================================
//
// Boots a scaled-down machine and replays the classic pressure workload:
// one process allocates twice as many heap pages as the FFS pool holds,
// initializes them all (driving the pool to capacity and the clock into
// evicting), then reads everything back and verifies the bytes survived
// the trip through swap.
//
// Run with `cargo run -p pageros-kernel`. Console lines go to stdout,
// subsystem diagnostics to stderr (RUST_LOG-style filtering not needed —
// the logger prints info and up).
//
// =============================================================================

use pageros_kernel::{util, MemoryLayout, System, VirtAddr, PAGE_SIZE};

/// Minimal `log` backend: info and up, straight to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn stdout_sink(line: &str) {
    println!("{}", line);
}

fn report(sys: &System, pid: u32) {
    println!("[P{}] virtual pages allocated = {}", pid, sys.allocated_virtual_pages(pid));
    println!("[P{}] FFS frames used         = {}", pid, sys.used_ffs_frames(pid));
    let stats = sys.stats();
    println!(
        "[P{}] # FFS  frames in use:: {}/{}",
        pid,
        stats.ffs_frames - stats.ffs_free,
        stats.ffs_frames
    );
    println!(
        "[P{}] # SWAP frames in use:: {}/{}",
        pid,
        stats.swap_slots - stats.swap_free,
        stats.swap_slots
    );
}

fn main() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Info);
    util::console::set_global_sink(stdout_sink);

    // 64 FFS frames, 160 swap slots, 32 PT frames, 256-page heap window.
    let layout = MemoryLayout::custom(64, 160, 32, 256);
    let ffs_frames = layout.ffs_frames;
    let mut sys = System::new(layout);
    sys.set_swap_debug_budget(20);

    let pid = sys
        .vcreate(VirtAddr::zero(), 8192, 50, "writer")
        .expect("vcreate failed");
    sys.switch_to(pid).expect("switch failed");

    let pages = 2 * ffs_frames;
    println!("\n===> [P{}] allocating {} pages ...", pid, pages);
    let base = sys.vmalloc(pages * PAGE_SIZE).expect("vmalloc failed");
    report(&sys, pid);

    println!("\n===> [P{}] initializing {} pages ...", pid, pages);
    for i in 0..pages {
        sys.write_byte(base + i * PAGE_SIZE, (i % 251) as u8)
            .expect("write faulted fatally");
    }
    report(&sys, pid);

    println!("\n===> [P{}] reading {} pages back ...", pid, pages);
    let mut bad = 0;
    for i in 0..pages {
        let value = sys.read_byte(base + i * PAGE_SIZE).expect("read faulted fatally");
        if value != (i % 251) as u8 {
            bad += 1;
        }
    }
    println!(
        "[P{}] verification: {}",
        pid,
        if bad == 0 { "all pages intact".to_string() } else { format!("{} pages corrupt", bad) }
    );
    report(&sys, pid);

    sys.audit();
    println!("\n===> [P{}] returning ...", pid);
}
