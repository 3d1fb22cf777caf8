//! Cycle-counter timestamp source.
//!
//! `log_service` and the benchmark harness both need a monotonic
//! timestamp and neither wants to depend on a programmable timer (out of
//! scope per `SPEC_FULL.md` §1 — PIC/IDT programming is the only
//! hardware-timing surface this crate owns, and that drives IRQ0 fan-in,
//! not wall-clock). `rdtsc` is available on any x86_64 Lily runs on and
//! needs no setup.

/// Current TSC value. Not wall-clock time — a relative cycle count used
/// to order log entries and measure elapsed cycles in benchmarks.
#[cfg(target_os = "none")]
pub fn read_cycles() -> u64 {
    // SAFETY: RDTSC is unprivileged and has no side effects beyond
    // reading the counter into edx:eax.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_os = "none"))]
pub fn read_cycles() -> u64 {
    0
}

/// Assumed TSC frequency used to convert cycles to milliseconds for log
/// timestamps. Good enough for relative ordering in test/QEMU runs;
/// nothing here depends on the conversion being exact.
const ASSUMED_TSC_HZ: u64 = 2_000_000_000;

/// Milliseconds since the counter started, approximated from `ASSUMED_TSC_HZ`.
pub fn get_timestamp_ms() -> u64 {
    read_cycles() / (ASSUMED_TSC_HZ / 1000)
}
