//! Kernel entry point. All real logic lives in the `lily_kernel` library
//! crate; this binary just wires `bootloader_api`'s entry point to
//! `bootstrap::run` and supplies the panic handler bare metal needs.

#![no_std]
#![no_main]

use bootloader_api::config::Mapping;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

use lily_kernel::bootstrap;

/// Physical memory is mapped starting at virtual address 0 (an identity
/// map) rather than at a bootloader-chosen offset: `mm::vm`'s self-mapped
/// directory scheme reads and writes physical frames directly by address
/// during early boot, before any of its own mappings exist to route
/// through instead.
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::FixedAddress(0));
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    bootstrap::run(boot_info)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    lily_kernel::println!("[KERNEL PANIC] {}", info);
    lily_kernel::arch::halt();
}
