//! Thin wrappers over the tmux control commands the launcher uses.

use std::process::{Child, Command};

use anyhow::{Context, Result};

/// Keeps a pane open after its command exits, so QEMU and console output
/// stay readable once the guest shuts down.
const REMAIN_ON_EXIT: &str = "tmux set-option -p remain-on-exit on";

/// Open a new named window running `shell_cmd`. Does not wait.
pub fn new_window(name: &str, shell_cmd: &str) -> Result<Child> {
    Command::new("tmux")
        .args(["new-window", "-n", name, "-a"])
        .arg(pane_command(shell_cmd))
        .spawn()
        .context("Failed to spawn tmux new-window")
}

/// Split the current window vertically, giving the new pane `percent` of
/// the space, and run `shell_cmd` in it.
pub fn split_vertical(percent: u32, shell_cmd: &str) -> Result<Child> {
    let percent = percent.to_string();
    Command::new("tmux")
        .args(["split-window", "-p", percent.as_str(), "-v"])
        .arg(pane_command(shell_cmd))
        .spawn()
        .context("Failed to spawn tmux split-window")
}

/// Split the current window horizontally and run `shell_cmd` in the new pane.
pub fn split_horizontal(shell_cmd: &str) -> Result<Child> {
    Command::new("tmux")
        .args(["split-window", "-h"])
        .arg(pane_command(shell_cmd))
        .spawn()
        .context("Failed to spawn tmux split-window")
}

fn pane_command(shell_cmd: &str) -> String {
    format!("{}; {}", REMAIN_ON_EXIT, shell_cmd)
}

/// Quote one word for a POSIX shell command line.
pub fn sh_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "./-_=:,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Join argv into a single shell command string, quoting each word.
pub fn sh_join(argv: &[String]) -> String {
    argv.iter()
        .map(|word| sh_quote(word))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_pass_through() {
        assert_eq!(sh_quote("/tmp/test.img"), "/tmp/test.img");
        assert_eq!(sh_quote("run-qemu"), "run-qemu");
        assert_eq!(sh_quote("-,raw,icanon=0,echo=0"), "-,raw,icanon=0,echo=0");
    }

    #[test]
    fn special_words_get_single_quotes() {
        assert_eq!(sh_quote("my disk.img"), "'my disk.img'");
        assert_eq!(sh_quote(""), "''");
        assert_eq!(sh_quote("a'b"), r"'a'\''b'");
    }

    #[test]
    fn join_quotes_each_word() {
        let argv = vec![
            "/usr/bin/vmtest".to_string(),
            "run-qemu".to_string(),
            "my disk.img".to_string(),
        ];
        assert_eq!(sh_join(&argv), "/usr/bin/vmtest run-qemu 'my disk.img'");
    }
}
