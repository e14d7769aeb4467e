//! External toolchain driver.
//!
//! Writes the final translation unit into a scratch directory, invokes `zig
//! build-exe` synchronously, verifies the expected artifact exists and
//! relocates it to the caller's output path. The scratch directory is
//! cleaned up on drop either way.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{CompileError, CompileResult, ErrorKind};

/// Environment switch: `PYZIG_RELEASE=1` selects the release optimization
/// mode, Debug otherwise.
pub const RELEASE_ENV: &str = "PYZIG_RELEASE";

/// Whether the environment requests a release build.
pub fn release_from_env() -> bool {
    std::env::var(RELEASE_ENV).map(|v| v == "1").unwrap_or(false)
}

/// Compile a self-contained Zig translation unit to a native executable at
/// `output_path`.
pub fn compile_zig(zig_code: &str, output_path: &Path, release: bool) -> CompileResult<PathBuf> {
    let scratch = tempfile::tempdir()?;
    let zig_file = scratch.path().join("main.zig");
    fs::write(&zig_file, zig_code)?;

    let optimize = if release { "ReleaseFast" } else { "Debug" };
    debug!(optimize, unit = %zig_file.display(), "invoking zig");

    let output = Command::new("zig")
        .args(["build-exe", "main.zig", "-O", optimize])
        .current_dir(scratch.path())
        .output()
        .map_err(|e| {
            CompileError::new(ErrorKind::Toolchain(format!("failed to invoke zig: {e}")))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        warn!("zig compilation failed");
        return Err(CompileError::new(ErrorKind::Toolchain(message)));
    }

    // Zig places the binary next to the source file
    let compiled = scratch.path().join("main");
    if !compiled.exists() {
        return Err(CompileError::new(ErrorKind::Toolchain(
            "compilation succeeded but no binary was produced".to_string(),
        )));
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&compiled, output_path)?;
    Ok(output_path.to_path_buf())
}
