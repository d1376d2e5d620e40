//! Kernel architecture detection and per-architecture QEMU configuration.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};

/// Kernel boot parameters shared by every architecture.
pub const BASE_CMDLINE: &str = "systemd.getty_auto=no initcall_debug ignore_loglevel";

/// Architectures this tool knows how to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    Arm,
    Arm64,
}

impl Arch {
    /// Map the architecture name printed by `file(1)` for a kernel image.
    pub fn from_file_output(name: &str) -> Result<Self> {
        match name {
            "x86" => Ok(Arch::X86),
            "ARM" => Ok(Arch::Arm),
            "ARM64" => Ok(Arch::Arm64),
            _ => bail!("Unsupported kernel architecture: {}", name),
        }
    }

    /// Architecture suffix of the matching qemu-system binary.
    pub fn qemu_arch(&self) -> &'static str {
        match self {
            Arch::X86 => "x86_64",
            Arch::Arm => "arm",
            Arch::Arm64 => "aarch64",
        }
    }

    /// Root device and early console parameters for this architecture.
    pub fn cmdline_fragment(&self) -> &'static str {
        match self {
            Arch::X86 => "root=/dev/vda earlyprintk=serial,ttyS0 console=ttyS0",
            Arch::Arm | Arch::Arm64 => "root=/dev/vda console=ttyAMA0",
        }
    }

    /// Machine, CPU, memory, and SMP flags for this architecture.
    pub fn machine_args(&self) -> &'static [&'static str] {
        match self {
            Arch::X86 => &[
                "-machine", "pc",
                "-cpu", "max",
                "-smp", "2",
                "-m", "2048",
                "-device", "pvpanic",
            ],
            Arch::Arm => &[
                "-machine", "virt,highmem=off",
                "-cpu", "cortex-a15",
                "-m", "1024",
            ],
            Arch::Arm64 => &[
                "-machine", "virt,gic-version=max",
                "-cpu", "max",
                "-smp", "2",
                "-m", "2048",
            ],
        }
    }

    /// Full kernel command line: base parameters plus the per-arch fragment.
    pub fn kernel_cmdline(&self) -> String {
        format!("{} {}", BASE_CMDLINE, self.cmdline_fragment())
    }
}

/// Identify the architecture a kernel image targets.
///
/// Runs `file -b` against the image; if the description does not look like a
/// kernel, assumes the image is gzip-compressed and identifies the
/// decompressed stream instead. The third whitespace-delimited token of the
/// `file` output names the architecture (e.g. "Linux kernel x86 boot
/// executable bzImage ...").
pub fn detect_kernel_arch(kernel: &Path) -> Result<Arch> {
    let output = Command::new("file")
        .arg("-b")
        .arg(kernel)
        .output()
        .context("Failed to run file(1) on kernel image")?;
    let mut desc = String::from_utf8_lossy(&output.stdout).into_owned();

    if !desc.contains("kernel") {
        desc = identify_decompressed(kernel)?;
    }

    Arch::from_file_output(arch_token(&desc)?)
}

/// Pipe `zcat <kernel>` into `file -b -` and return the description.
fn identify_decompressed(kernel: &Path) -> Result<String> {
    let mut zcat = Command::new("zcat")
        .arg(kernel)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to run zcat on kernel image")?;
    let stream = zcat
        .stdout
        .take()
        .ok_or_else(|| anyhow!("zcat produced no stdout handle"))?;

    let output = Command::new("file")
        .args(["-b", "-"])
        .stdin(Stdio::from(stream))
        .output()
        .context("Failed to run file(1) on decompressed kernel")?;

    // zcat may die with SIGPIPE once file(1) stops reading; the status
    // carries no information either way.
    let _ = zcat.wait();

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract the architecture name from a `file(1)` kernel description.
pub fn arch_token(desc: &str) -> Result<&str> {
    desc.split_whitespace()
        .nth(2)
        .ok_or_else(|| anyhow!("Unrecognized kernel image description: {:?}", desc.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_output_maps_to_arch() {
        assert_eq!(Arch::from_file_output("x86").unwrap(), Arch::X86);
        assert_eq!(Arch::from_file_output("ARM").unwrap(), Arch::Arm);
        assert_eq!(Arch::from_file_output("ARM64").unwrap(), Arch::Arm64);
    }

    #[test]
    fn unknown_arch_is_fatal() {
        assert!(Arch::from_file_output("RISC-V").is_err());
        assert!(Arch::from_file_output("").is_err());
    }

    #[test]
    fn arch_token_takes_third_word() {
        let desc = "Linux kernel x86 boot executable bzImage, version 6.1.0";
        assert_eq!(arch_token(desc).unwrap(), "x86");

        let desc = "Linux kernel ARM64 boot executable Image";
        assert_eq!(arch_token(desc).unwrap(), "ARM64");
    }

    #[test]
    fn arch_token_rejects_short_descriptions() {
        assert!(arch_token("data").is_err());
        assert!(arch_token("").is_err());
    }

    #[test]
    fn kernel_cmdline_joins_base_and_fragment() {
        let cmdline = Arch::X86.kernel_cmdline();
        assert!(cmdline.starts_with(BASE_CMDLINE));
        assert!(cmdline.ends_with("console=ttyS0"));

        let cmdline = Arch::Arm64.kernel_cmdline();
        assert!(cmdline.contains("root=/dev/vda"));
        assert!(cmdline.contains("console=ttyAMA0"));
    }

    #[test]
    fn machine_args_match_template() {
        assert_eq!(
            Arch::X86.machine_args(),
            &["-machine", "pc", "-cpu", "max", "-smp", "2", "-m", "2048", "-device", "pvpanic"]
        );
        assert_eq!(
            Arch::Arm.machine_args(),
            &["-machine", "virt,highmem=off", "-cpu", "cortex-a15", "-m", "1024"]
        );
        assert_eq!(
            Arch::Arm64.machine_args(),
            &["-machine", "virt,gic-version=max", "-cpu", "max", "-smp", "2", "-m", "2048"]
        );
    }

    #[test]
    fn qemu_arch_names() {
        assert_eq!(Arch::X86.qemu_arch(), "x86_64");
        assert_eq!(Arch::Arm.qemu_arch(), "arm");
        assert_eq!(Arch::Arm64.qemu_arch(), "aarch64");
    }
}
