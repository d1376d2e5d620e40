//! vmtest - boot a kernel/disk image pair under QEMU inside tmux panes.
//!
//! This crate exposes the pure pieces (architecture table, QEMU command
//! construction, console socket naming, shell quoting) as a library so
//! integration tests can exercise them without QEMU or tmux installed.
//! The binary in `main.rs` adds the tmux orchestration on top.

pub mod arch;
pub mod console;
pub mod qemu;
pub mod tmux;

pub use arch::{detect_kernel_arch, Arch};
pub use console::ConsoleSockets;
pub use qemu::{build_qemu_command, host_arch, QemuCommand, QemuSpec};
