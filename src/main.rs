//! Boot a kernel/disk image pair under QEMU inside tmux panes.
//!
//! The default invocation opens a new tmux window and re-invokes this binary
//! there with the hidden `run-qemu` subcommand. `run-qemu` detects the
//! kernel architecture, splits off a pane running the hidden `run-consoles`
//! subcommand, then spawns QEMU. The consoles pane attaches raw-mode socat
//! relays to the guest's two console sockets.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use vmtest::arch::detect_kernel_arch;
use vmtest::console::{disk_basename, relay_shell_command, spawn_relay, ConsoleSockets};
use vmtest::qemu::{build_qemu_command, host_arch, QemuSpec};
use vmtest::tmux;

/// How long run-qemu waits for the console relays to bind their sockets
/// before starting QEMU regardless.
const SOCKET_BIND_TIMEOUT: Duration = Duration::from_secs(5);

/// Test a kernel and disk image under QEMU, with consoles in tmux panes.
#[derive(Parser)]
#[command(
    name = "vmtest",
    version,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    mode: Option<Mode>,

    #[command(flatten)]
    vm: Option<VmArgs>,
}

#[derive(Args, Clone)]
struct VmArgs {
    /// Path to the root filesystem image for the VM
    disk: PathBuf,

    /// Path to the kernel to execute in the VM
    kernel: PathBuf,

    /// Path to the DTB for the VM (if required)
    dtb: Option<PathBuf>,
}

/// Internal modes used when this binary re-invokes itself inside the tmux
/// window/pane it just created. Not for direct operator use.
#[derive(Subcommand)]
enum Mode {
    /// Boot QEMU for the given kernel/disk pair (runs inside the launched window).
    #[command(hide = true)]
    RunQemu(VmArgs),
    /// Attach the console relays (runs inside the pane created by run-qemu).
    #[command(hide = true)]
    RunConsoles(VmArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.mode {
        Some(Mode::RunQemu(vm)) => run_qemu_mode(&vm),
        Some(Mode::RunConsoles(vm)) => run_consoles_mode(&vm),
        None => {
            let vm = cli.vm.context("disk and kernel arguments are required")?;
            launch(&vm)
        }
    }
}

/// Default mode: open a new tmux window and hand off to `run-qemu` there.
/// Returns as soon as the window request is issued.
fn launch(vm: &VmArgs) -> Result<()> {
    let window = format!("kvm:{}", disk_basename(&vm.disk));
    tmux::new_window(&window, &reinvoke_command("run-qemu", vm)?)?;
    Ok(())
}

/// Internal mode run inside the new tmux window: boot QEMU with both
/// consoles wired up, and block until the emulator and the consoles pane
/// have both exited.
fn run_qemu_mode(vm: &VmArgs) -> Result<()> {
    let arch = detect_kernel_arch(&vm.kernel)?;

    let spec = QemuSpec {
        arch,
        disk: vm.disk.clone(),
        kernel: vm.kernel.clone(),
        cmdline: arch.kernel_cmdline(),
        dtb: vm.dtb.clone(),
        interactive: true,
        networked: true,
    };
    let qemu = build_qemu_command(&spec, &host_arch()?);

    let mut consoles = tmux::split_vertical(85, &reinvoke_command("run-consoles", vm)?)?;

    // QEMU connects to the console sockets at startup and fails if the
    // relays have not bound them yet.
    let sockets = ConsoleSockets::for_disk(&vm.disk);
    if !sockets.wait_until_bound(SOCKET_BIND_TIMEOUT) {
        eprintln!("vmtest: console sockets not bound yet, starting QEMU anyway");
    }

    let mut emulator = qemu.spawn()?;
    emulator.wait().context("Failed to wait for QEMU")?;
    consoles.wait().context("Failed to wait for consoles pane")?;
    Ok(())
}

/// Internal mode run inside the consoles pane: bridge the login console in a
/// side pane and the system console in the current pane, then wait for both.
fn run_consoles_mode(vm: &VmArgs) -> Result<()> {
    let sockets = ConsoleSockets::for_disk(&vm.disk);

    let mut login_pane = tmux::split_horizontal(&relay_shell_command(&sockets.login))?;
    let mut console = spawn_relay(&sockets.console)?;

    login_pane.wait().context("Failed to wait for login pane")?;
    console.wait().context("Failed to wait for console relay")?;
    Ok(())
}

/// Shell command string that re-runs this binary with `mode` and the same
/// disk/kernel/dtb arguments, for embedding in a tmux pane command.
fn reinvoke_command(mode: &str, vm: &VmArgs) -> Result<String> {
    let exe = env::current_exe().context("Cannot determine own executable path")?;
    let mut argv = vec![
        exe.display().to_string(),
        mode.to_string(),
        vm.disk.display().to_string(),
        vm.kernel.display().to_string(),
    ];
    if let Some(dtb) = &vm.dtb {
        argv.push(dtb.display().to_string());
    }
    Ok(tmux::sh_join(&argv))
}
