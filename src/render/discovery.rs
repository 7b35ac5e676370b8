//! Locating a working OpenSCAD executable.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Result};
use log::{debug, warn};

const WINDOWS_CANDIDATES: &[&str] = &[
    r"C:\Program Files\OpenSCAD\openscad.exe",
    r"C:\Program Files\OpenSCAD (Nightly)\openscad.exe",
];

const MAC_CANDIDATES: &[&str] = &[
    "/Applications/OpenSCAD.app/Contents/MacOS/OpenSCAD",
    "/Applications/OpenSCAD (Nightly).app/Contents/MacOS/OpenSCAD",
    "/usr/local/bin/openscad",
    "/usr/local/bin/openscad-nightly",
];

const LINUX_CANDIDATES: &[&str] = &[
    "openscad",
    "/usr/bin/openscad",
    "/usr/bin/openscad-nightly",
    "/usr/local/bin/openscad",
    "/usr/local/bin/openscad-nightly",
    "~/Applications/OpenSCAD-Nightly.AppImage",
    "/snap/bin/openscad-nightly",
];

/// Platform-specific places OpenSCAD is usually installed.
pub fn default_candidates() -> Vec<PathBuf> {
    let candidates = if cfg!(target_os = "windows") {
        WINDOWS_CANDIDATES
    } else if cfg!(target_os = "macos") {
        MAC_CANDIDATES
    } else {
        LINUX_CANDIDATES
    };
    candidates.iter().map(|c| expand_home(c)).collect()
}

fn expand_home(candidate: &str) -> PathBuf {
    match (candidate.strip_prefix("~/"), env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(candidate),
    }
}

/// Returns `true` when `program --version` runs and exits successfully.
pub fn probe(program: &Path, leading_args: &[String]) -> bool {
    let status = Command::new(program)
        .args(leading_args)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) => status.success(),
        Err(err) => {
            debug!("{} is not usable: {err}", program.display());
            false
        }
    }
}

/// Finds a working renderer, preferring the user-supplied path.
pub fn find_renderer(user_path: Option<&Path>, leading_args: &[String]) -> Result<PathBuf> {
    if let Some(path) = user_path {
        if probe(path, leading_args) {
            return Ok(path.to_path_buf());
        }
        warn!(
            "OpenSCAD not found or invalid at '{}'. Trying defaults...",
            path.display()
        );
    }

    let candidates = default_candidates();
    if let Some(found) = candidates.iter().find(|c| probe(c, leading_args)) {
        debug!("using OpenSCAD at {}", found.display());
        return Ok(found.clone());
    }

    let listing = candidates
        .iter()
        .map(|c| format!("  {}", c.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(anyhow!(
        "could not find a working OpenSCAD. Install OpenSCAD or pass --openscad. Typical paths:\n{listing}"
    ))
}
