fn main() {
    // bootloader_api hands the kernel a BootInfo struct at a bootloader-chosen
    // entry point (via the `entry_point!` macro in main.rs); the disk image
    // and the actual ELF link step are performed by the separate `bootloader`
    // build tool, not by this crate. Nothing to configure here.
}
