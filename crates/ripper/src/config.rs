use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::keeper::KeeperPolicy;

/// How the keeper file is placed into the staging tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MoveMode {
    /// Rename into place (copy + delete across filesystems).
    #[default]
    Move,
    /// Leave the source in the rip folder.
    Copy,
}

/// Configuration for the queue-driven disc ripper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RipConfig {
    /// Root directory for per-disc rip folders (raw MakeMKV output)
    pub rip_prep_root: PathBuf,
    /// Root directory the chosen keeper files are staged into
    pub staging_root: PathBuf,
    /// Path to the makemkvcon binary
    pub makemkv_bin: PathBuf,
    /// MakeMKV disc specifier, e.g. "disc:0"
    pub disc_spec: String,
    /// Mount point of the optical drive, used as a presence fallback
    /// when the info call times out
    pub drive_mount: PathBuf,
    /// Minimum title length passed to MakeMKV (--minlength), in seconds
    pub rip_min_length_secs: u64,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// A rip folder counts as idle once no file in it changed for this long
    pub idle_secs: u64,
    /// Safety ceiling on the idle wait; after this the move step proceeds
    /// with whatever is on disk
    pub finalize_ceiling_secs: u64,
    /// Whether the keeper is moved or copied into staging
    pub move_mode: MoveMode,
    /// Eject the disc after each item
    pub auto_eject: bool,
    /// Timeout for one MakeMKV info invocation, in seconds
    pub info_timeout_secs: u64,
    /// Poll interval while waiting for a disc to appear, in seconds
    pub disc_poll_secs: u64,
    /// Poll interval while waiting for a disc to be removed, in seconds
    pub removal_poll_secs: u64,
    /// How long to wait for removal confirmation after an eject, in seconds
    pub eject_confirm_secs: u64,
    /// Tunables for main-feature selection
    pub keeper: KeeperPolicy,
}

impl Default for RipConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RipConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            rip_prep_root: PathBuf::from("/srv/ripq/prep"),
            staging_root: PathBuf::from("/srv/ripq/staging"),
            makemkv_bin: PathBuf::from("makemkvcon"),
            disc_spec: "disc:0".to_string(),
            drive_mount: PathBuf::from("/media/cdrom"),
            rip_min_length_secs: 600,
            ffprobe_bin: PathBuf::from("ffprobe"),
            idle_secs: 180,
            finalize_ceiling_secs: 1800,
            move_mode: MoveMode::Move,
            auto_eject: true,
            info_timeout_secs: 20,
            disc_poll_secs: 3,
            removal_poll_secs: 2,
            eject_confirm_secs: 60,
            keeper: KeeperPolicy::default(),
        }
    }

    /// Load configuration from an explicit path or the discovery chain,
    /// or return defaults if nothing is found
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(path) {
            Some((config_path, _)) => Self::load_from(&config_path),
            None => Ok(Self::default_config()),
        }
    }

    /// Parse a config file; TOML by extension, JSON otherwise
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))
        }
    }

    /// Check paths and external tools without touching the drive.
    /// Missing roots and absolute binaries that do not exist are errors;
    /// bare binary names are resolved through PATH at run time and only
    /// produce a note.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (label, root) in [
            ("rip_prep_root", &self.rip_prep_root),
            ("staging_root", &self.staging_root),
        ] {
            if !root.exists() {
                report
                    .errors
                    .push(format!("{} does not exist: {}", label, root.display()));
            }
        }

        for (label, bin) in [
            ("makemkv_bin", &self.makemkv_bin),
            ("ffprobe_bin", &self.ffprobe_bin),
        ] {
            if bin.components().count() > 1 {
                if !bin.exists() {
                    report
                        .errors
                        .push(format!("{} does not exist: {}", label, bin.display()));
                }
            } else {
                report.warnings.push(format!(
                    "{} is a bare name ({}); it will be resolved via PATH",
                    label,
                    bin.display()
                ));
            }
        }

        if self.idle_secs >= self.finalize_ceiling_secs {
            report.warnings.push(format!(
                "idle_secs ({}) >= finalize_ceiling_secs ({}); the idle wait can never confirm",
                self.idle_secs, self.finalize_ceiling_secs
            ));
        }

        report
    }
}

/// Outcome of [`RipConfig::validate`]
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Config discovery chain: explicit path, RIPQ_CONFIG env var,
/// ./ripq.json, ~/.ripq/config.json. Returns the first existing
/// candidate together with where it came from.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<(PathBuf, &'static str)> {
    let mut candidates: Vec<(PathBuf, &'static str)> = Vec::new();
    if let Some(p) = cli_path {
        candidates.push((p.to_path_buf(), "--config flag"));
    }
    if let Some(env_path) = std::env::var_os("RIPQ_CONFIG") {
        candidates.push((PathBuf::from(env_path), "RIPQ_CONFIG env var"));
    }
    candidates.push((PathBuf::from("ripq.json"), "current working directory"));
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push((
            PathBuf::from(home).join(".ripq").join("config.json"),
            "~/.ripq/config.json",
        ));
    }

    candidates.into_iter().find(|(p, _)| p.exists())
}
