//! QEMU command construction and launch.

use std::path::PathBuf;
use std::process::{Child, Command};

use anyhow::{Context, Result};

use crate::arch::Arch;
use crate::console::ConsoleSockets;

/// Everything needed to assemble a QEMU invocation for one VM run.
#[derive(Debug, Clone)]
pub struct QemuSpec {
    pub arch: Arch,
    pub disk: PathBuf,
    pub kernel: PathBuf,
    /// Full kernel boot command line, passed via `-append`.
    pub cmdline: String,
    pub dtb: Option<PathBuf>,
    /// Wire the guest consoles to host-side domain sockets.
    pub interactive: bool,
    /// Attach a user-mode network device; `-net none` otherwise.
    pub networked: bool,
}

/// A fully assembled QEMU invocation.
#[derive(Debug, Clone)]
pub struct QemuCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl QemuCommand {
    /// Spawn the emulator. Missing binaries surface as a fatal error naming
    /// the qemu-system binary.
    pub fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))
    }
}

/// Build the full QEMU argument list for `spec`.
///
/// `host_arch` is the machine name reported by `uname -m`; when it matches
/// the target architecture, KVM acceleration is enabled. Taking it as a
/// parameter keeps the builder pure and testable on any host.
///
/// Echoes the constructed command before returning so the operator can see
/// exactly what is about to run.
pub fn build_qemu_command(spec: &QemuSpec, host_arch: &str) -> QemuCommand {
    let mut args: Vec<String> = vec![
        "-kernel".into(),
        spec.kernel.display().to_string(),
        "-append".into(),
        spec.cmdline.clone(),
        "-drive".into(),
        format!("file={},if=virtio,index=0,format=raw", spec.disk.display()),
        "-boot".into(),
        "d".into(),
        "-nographic".into(),
        "-vga".into(),
        "none".into(),
        "-display".into(),
        "none".into(),
    ];

    if let Some(dtb) = &spec.dtb {
        args.push("-dtb".into());
        args.push(dtb.display().to_string());
    }

    if spec.networked {
        args.extend(
            [
                "-netdev",
                "user,ipv6=off,net=172.16.0.0/24,id=inet",
                "-device",
                "virtio-net-pci,netdev=inet,id=idev",
                "-smbios",
                "type=41,designation='Onboard LAN',instance=1,kind=ethernet,pcidev=idev",
            ]
            .map(String::from),
        );
    } else {
        args.push("-net".into());
        args.push("none".into());
    }

    args.extend(spec.arch.machine_args().iter().map(|s| s.to_string()));

    if spec.interactive {
        let sockets = ConsoleSockets::for_disk(&spec.disk);
        args.extend([
            "-chardev".into(),
            format!("socket,path={},id=hostconsole", sockets.console.display()),
            "-serial".into(),
            "chardev:hostconsole".into(),
            "-device".into(),
            "virtio-serial-pci".into(),
            "-chardev".into(),
            format!("socket,path={},id=hostlogin", sockets.login.display()),
            "-device".into(),
            "virtconsole,chardev=hostlogin,name=login".into(),
        ]);
    }

    if spec.arch.qemu_arch() == host_arch {
        args.push("-enable-kvm".into());
    }

    let cmd = QemuCommand {
        program: format!("qemu-system-{}", spec.arch.qemu_arch()),
        args,
    };
    println!("{} {}", cmd.program, cmd.args.join(" "));
    cmd
}

/// Query the host machine architecture via uname(1).
pub fn host_arch() -> Result<String> {
    let output = Command::new("uname")
        .arg("-m")
        .output()
        .context("Failed to run uname")?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
