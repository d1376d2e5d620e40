//! Console socket rendezvous between QEMU and the attached terminal panes.
//!
//! QEMU emits the guest's system console and login console over two POSIX
//! domain sockets; socat relays listen on them and bridge each to a tmux
//! pane in raw mode. Both sides derive the socket paths from the disk
//! image's base name through this module, so the rendezvous always agrees.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::tmux::sh_quote;

/// socat address for the local terminal: no line buffering, no local echo.
const RELAY_TERMINAL: &str = "-,raw,icanon=0,echo=0";

/// The two console channels a guest exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSockets {
    /// Primary system console (serial port).
    pub console: PathBuf,
    /// Secondary login console (virtconsole).
    pub login: PathBuf,
}

impl ConsoleSockets {
    /// Derive the socket paths for a disk image.
    pub fn for_disk(disk: &Path) -> Self {
        let name = disk_basename(disk);
        let tmp = std::env::temp_dir();
        ConsoleSockets {
            console: tmp.join(format!("console-{}", name)),
            login: tmp.join(format!("login-{}", name)),
        }
    }

    /// Wait until both listening sockets exist on disk, up to `timeout`.
    ///
    /// The relay panes bind their sockets asynchronously, and QEMU fails its
    /// connect if it starts first. Returns false once the deadline passes;
    /// the caller proceeds anyway and QEMU reports the failure itself.
    pub fn wait_until_bound(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.console.exists() && self.login.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }
}

/// Base name of the disk image; keys the socket names and the window name.
pub fn disk_basename(disk: &Path) -> String {
    match disk.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => disk.to_string_lossy().into_owned(),
    }
}

/// Listen on `socket` and bridge it to the current terminal in raw mode.
pub fn spawn_relay(socket: &Path) -> Result<Child> {
    Command::new("socat")
        .arg(format!("UNIX-LISTEN:{}", socket.display()))
        .arg(RELAY_TERMINAL)
        .spawn()
        .with_context(|| format!("Failed to spawn socat for {}", socket.display()))
}

/// The same relay invocation as a shell command string for a tmux pane.
pub fn relay_shell_command(socket: &Path) -> String {
    format!(
        "socat {} {}",
        sh_quote(&format!("UNIX-LISTEN:{}", socket.display())),
        sh_quote(RELAY_TERMINAL),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_paths_derive_from_disk_basename() {
        let sockets = ConsoleSockets::for_disk(Path::new("/var/images/test.img"));
        let tmp = std::env::temp_dir();
        assert_eq!(sockets.console, tmp.join("console-test.img"));
        assert_eq!(sockets.login, tmp.join("login-test.img"));
    }

    #[test]
    fn derivation_ignores_directory_component() {
        // Both orchestrators must rendezvous on identical paths no matter
        // how the disk path was spelled.
        let a = ConsoleSockets::for_disk(Path::new("/tmp/test.img"));
        let b = ConsoleSockets::for_disk(Path::new("/home/user/../user/images/test.img"));
        assert_eq!(a, b);
    }

    #[test]
    fn relay_is_raw_mode() {
        let cmd = relay_shell_command(Path::new("/tmp/console-test.img"));
        assert!(cmd.starts_with("socat "));
        assert!(cmd.contains("UNIX-LISTEN:/tmp/console-test.img"));
        assert!(cmd.contains("raw,icanon=0,echo=0"));
    }

    #[test]
    fn basename_of_bare_name() {
        assert_eq!(disk_basename(Path::new("test.img")), "test.img");
    }
}
