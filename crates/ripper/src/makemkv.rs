use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use log::debug;
use tokio::process::Command;

/// Everything that talks to makemkvcon lives here, including the exact
/// textual patterns matched on its robot-mode output. If the output
/// format changes, this is the only module that cares.
///
/// Patterns matched (robot mode, `-r`):
///   `TCOUNT:<digits>` -- number of titles MakeMKV sees on the disc;
///   `CINFO:` / `TINFO:` -- per-disc / per-title attribute lines, used as
///   a lenient "something is in the drive" signal when no count appears.
/// `makemkvcon -r info` prints a non-empty drive list even with an empty
/// drive, so absence of these markers is not proof of absence.
#[derive(Debug, Clone)]
pub struct MakeMkv {
    bin: PathBuf,
    disc_spec: String,
}

/// Outcome of one info invocation. A timeout is reported separately so
/// the caller can decide whether a filesystem fallback applies.
#[derive(Debug, Clone)]
pub struct InfoProbe {
    pub text: String,
    pub timed_out: bool,
}

/// Raw result of a rip invocation. The exit code is recorded but not
/// trusted as the success signal; output files on disk are authoritative.
#[derive(Debug, Clone)]
pub struct RipOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RipOutput {
    /// Persist stdout/stderr/exit code as plain text next to the ripped
    /// files, written regardless of how the rip went.
    pub fn persist(&self, rip_folder: &Path) -> Result<()> {
        for (name, content) in [
            ("_makemkv_stdout.txt", self.stdout.as_str()),
            ("_makemkv_stderr.txt", self.stderr.as_str()),
        ] {
            let path = rip_folder.join(name);
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write rip artifact: {}", path.display()))?;
        }
        let code_path = rip_folder.join("_makemkv_exitcode.txt");
        std::fs::write(&code_path, self.exit_code.to_string())
            .with_context(|| format!("Failed to write rip artifact: {}", code_path.display()))?;
        Ok(())
    }
}

impl MakeMkv {
    pub fn new(bin: PathBuf, disc_spec: String) -> Self {
        Self { bin, disc_spec }
    }

    /// Run `makemkvcon -r info <disc>` with a timeout. Spawn failures and
    /// non-zero exits are not errors here; they come back as empty text
    /// and the poll loop treats the disc as absent.
    pub async fn info(&self, timeout: Duration) -> InfoProbe {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-r")
            .arg("info")
            .arg(&self.disc_spec)
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => InfoProbe {
                text: String::new(),
                timed_out: true,
            },
            Ok(Err(e)) => {
                debug!("makemkvcon info did not run: {}", e);
                InfoProbe {
                    text: String::new(),
                    timed_out: false,
                }
            }
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push('\n');
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                InfoProbe {
                    text,
                    timed_out: false,
                }
            }
        }
    }

    /// Rip every title above the minimum length into `out_dir`.
    /// Deliberately no timeout: a rip runs to completion or external
    /// termination.
    pub async fn rip_all_titles(&self, out_dir: &Path, min_length_secs: u64) -> Result<RipOutput> {
        let output = Command::new(&self.bin)
            .arg("-r")
            .arg("mkv")
            .arg(&self.disc_spec)
            .arg("all")
            .arg(out_dir)
            .arg(format!("--minlength={}", min_length_secs))
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.bin.display()))?;

        Ok(RipOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Best-effort eject through MakeMKV itself
    pub async fn eject(&self) -> bool {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-r")
            .arg("eject")
            .arg(&self.disc_spec)
            .kill_on_drop(true);

        match tokio::time::timeout(Duration::from_secs(30), cmd.output()).await {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }
}

/// First `TCOUNT:<digits>` in the output, if any
pub fn parse_title_count(text: &str) -> Option<u32> {
    for (idx, _) in text.match_indices("TCOUNT:") {
        let rest = &text[idx + "TCOUNT:".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            if let Ok(n) = digits.parse() {
                return Some(n);
            }
        }
    }
    None
}

/// Lenient presence signal: per-disc or per-title attribute lines
pub fn has_info_markers(text: &str) -> bool {
    text.contains("CINFO:") || text.contains("TINFO:")
}
