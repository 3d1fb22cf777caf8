//! Common test utilities shared by the bare-metal integration suites
//! under `tests/`.

#![allow(dead_code)]

use lily_kernel::serial_println;

/// Announce a test suite's start on the serial console.
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);
}

/// Helpers for tests that need a physical frame without going through
/// the full automaton/address-space machinery.
pub mod memory_helpers {
    use lily_kernel::mm::frame;
    use lily_kernel::mm::FrameNumber;

    /// Allocate a frame from the live frame manager. Panics if called
    /// before `mm::init` has registered any memory regions.
    pub fn alloc_test_frame() -> FrameNumber {
        frame::manager().alloc().expect("no frames available")
    }

    pub fn free_test_frame(f: FrameNumber) {
        let _ = frame::manager().decref(f);
    }
}

#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => {
                lily_kernel::serial_println!("Assertion failed: {:?} is not Ok", e);
                panic!("Expected Ok, got Err");
            }
        }
    };
}

#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => {
                lily_kernel::serial_println!("Assertion failed: result is Ok");
                panic!("Expected Err, got Ok");
            }
            Err(e) => e,
        }
    };
}

#[macro_export]
macro_rules! assert_performance {
    ($time_ns:expr, < $limit_ns:expr) => {
        if $time_ns >= $limit_ns {
            lily_kernel::serial_println!(
                "Performance assertion failed: {} ns >= {} ns",
                $time_ns,
                $limit_ns
            );
            panic!("Performance requirement not met");
        }
    };
}
