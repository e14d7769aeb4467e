//! Timestamp-based build cache.
//!
//! Keyed by a hash of the absolute source path; a cached binary is reused
//! only while it is strictly newer than the source file and every
//! compiler-internal input. The running compiler executable stands in for
//! the parser, generator, registry and embedded runtime it contains; with
//! an on-disk runtime directory configured, those files count too.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::CompileResult;
use crate::inliner::RUNTIME_DIR_ENV;

/// Environment switch: `PYZIG_CACHE=0` disables caching.
pub const CACHE_ENV: &str = "PYZIG_CACHE";

const RUNTIME_FILES: [&str; 6] = [
    "runtime.zig",
    "pyint.zig",
    "pylist.zig",
    "pytuple.zig",
    "pystring.zig",
    "pydict.zig",
];

/// Every file whose modification invalidates all cache entries.
pub fn compiler_files() -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(exe) = env::current_exe() {
        files.push(exe);
    }
    if let Ok(dir) = env::var(RUNTIME_DIR_ENV) {
        let dir = PathBuf::from(dir);
        for name in RUNTIME_FILES {
            files.push(dir.join(name));
        }
    }
    files
}

/// The per-source artifact cache.
#[derive(Debug, Clone)]
pub struct BuildCache {
    dir: PathBuf,
    enabled: bool,
}

impl BuildCache {
    /// Cache under the system temp directory, honoring `PYZIG_CACHE=0`.
    pub fn from_env() -> Self {
        let enabled = env::var(CACHE_ENV).map(|v| v != "0").unwrap_or(true);
        Self {
            dir: env::temp_dir().join("pyzig-cache"),
            enabled,
        }
    }

    /// Cache rooted at an explicit directory (used by tests).
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: env::temp_dir().join("pyzig-cache"),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cache file path for a source file: one entry per hashed absolute
    /// source path.
    pub fn entry_for(&self, source: &Path) -> CompileResult<PathBuf> {
        let absolute = std::path::absolute(source)?;
        let mut hasher = Sha256::new();
        hasher.update(absolute.to_string_lossy().as_bytes());
        let key = hex::encode(hasher.finalize());
        Ok(self.dir.join(key))
    }

    /// Return the cached binary for `source` when it is still valid.
    pub fn lookup(&self, source: &Path) -> CompileResult<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        let entry = self.entry_for(source)?;
        if is_cache_valid(&entry, source) {
            debug!(source = %source.display(), "build cache hit");
            Ok(Some(entry))
        } else {
            debug!(source = %source.display(), "build cache miss");
            Ok(None)
        }
    }

    /// Copy a valid cached binary to the requested output path.
    pub fn fetch(&self, entry: &Path, output: &Path) -> CompileResult<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry, output)?;
        Ok(())
    }

    /// Store a freshly built binary under the source's cache key.
    pub fn store(&self, source: &Path, artifact: &Path) -> CompileResult<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let entry = self.entry_for(source)?;
        fs::copy(artifact, &entry)?;
        debug!(source = %source.display(), entry = %entry.display(), "stored build artifact");
        Ok(())
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A cached binary is valid iff its mtime is strictly newer than the source
/// file and every compiler-internal file.
pub fn is_cache_valid(cache_file: &Path, source_file: &Path) -> bool {
    let Some(cache_mtime) = mtime(cache_file) else {
        return false;
    };
    let Some(source_mtime) = mtime(source_file) else {
        return false;
    };
    if cache_mtime <= source_mtime {
        return false;
    }
    for compiler_file in compiler_files() {
        if let Some(compiler_mtime) = mtime(&compiler_file) {
            if compiler_mtime >= cache_mtime {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_same_source_maps_to_same_entry() {
        let cache = BuildCache::with_dir("/tmp/pyzig-test-cache");
        let a = cache.entry_for(Path::new("/srv/app/main.py")).unwrap();
        let b = cache.entry_for(Path::new("/srv/app/main.py")).unwrap();
        assert_eq!(a, b);
        let c = cache.entry_for(Path::new("/srv/app/other.py")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_missing_cache_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.py");
        fs::write(&source, "x = 1\n").unwrap();
        assert!(!is_cache_valid(&dir.path().join("nope"), &source));
    }

    #[test]
    fn test_newer_cache_is_valid_and_touched_source_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.py");
        fs::write(&source, "x = 1\n").unwrap();

        sleep(Duration::from_millis(20));
        let cached = dir.path().join("cached-binary");
        fs::write(&cached, b"\x7fELF").unwrap();
        assert!(is_cache_valid(&cached, &source));

        sleep(Duration::from_millis(20));
        fs::write(&source, "x = 2\n").unwrap();
        assert!(!is_cache_valid(&cached, &source));
    }

    #[test]
    fn test_store_and_fetch_round_trip() {
        let cache_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::with_dir(cache_dir.path());

        let source = work_dir.path().join("main.py");
        fs::write(&source, "x = 1\n").unwrap();
        let artifact = work_dir.path().join("binary");
        fs::write(&artifact, b"binary-bytes").unwrap();

        cache.store(&source, &artifact).unwrap();
        let entry = cache.entry_for(&source).unwrap();
        assert!(entry.exists());

        let output = work_dir.path().join("out/binary");
        cache.fetch(&entry, &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"binary-bytes");
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = BuildCache::disabled();
        assert!(!cache.is_enabled());
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.py");
        fs::write(&source, "x = 1\n").unwrap();
        assert!(cache.lookup(&source).unwrap().is_none());
    }
}
