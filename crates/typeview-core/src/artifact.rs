//! Content-addressed cache of compiled module artifacts.
//!
//! Artifacts are keyed by the SHA-256 of their source. Concurrent builders of
//! the same key serialize on a lock directory; a lock older than
//! `stale_after` is assumed abandoned and reclaimed, and waiting longer than
//! `timeout` for a live lock fails. Output is written to a
//! partial file and renamed into place, so readers never see a torn artifact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use sha2::Digest;
use thiserror::Error;

/// Turns a source file into an artifact.
pub trait Compiler {
    fn compile(&self, source: &Path, output: &Path) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("lock {} still held after {waited:?}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    stale_after: Duration,
    timeout: Duration,
    poll: Duration,
}

/// Removes the lock directory when the build finishes or fails.
struct LockGuard(PathBuf);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir(&self.0);
    }
}

impl ArtifactCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stale_after: Duration::from_secs(60),
            timeout: Duration::from_secs(120),
            poll: Duration::from_millis(50),
        }
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lowercase hex SHA-256 of `source`.
    #[must_use]
    pub fn key(source: &[u8]) -> String {
        sha2::Sha256::digest(source)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[must_use]
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.wasm"))
    }

    #[must_use]
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.lock"))
    }

    /// Path of the artifact for `source`, compiling it on a miss.
    pub fn compile(&self, compiler: &dyn Compiler, source: &Path) -> Result<PathBuf, ArtifactError> {
        let key = Self::key(&fs::read(source)?);
        let artifact = self.artifact_path(&key);
        if artifact.exists() {
            return Ok(artifact);
        }
        fs::create_dir_all(&self.root)?;
        let _lock = self.acquire(&self.lock_path(&key))?;
        if artifact.exists() {
            return Ok(artifact);
        }
        let partial = self.root.join(format!("{key}.partial"));
        if let Err(err) = compiler.compile(source, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(err.into());
        }
        fs::rename(&partial, &artifact)?;
        Ok(artifact)
    }

    fn acquire(&self, lock: &Path) -> Result<LockGuard, ArtifactError> {
        let start = Instant::now();
        loop {
            match fs::create_dir(lock) {
                Ok(()) => return Ok(LockGuard(lock.to_path_buf())),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
            if self.is_stale(lock) {
                let _ = fs::remove_dir(lock);
                continue;
            }
            let waited = start.elapsed();
            if waited >= self.timeout {
                return Err(ArtifactError::LockTimeout {
                    path: lock.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(self.poll);
        }
    }

    fn is_stale(&self, lock: &Path) -> bool {
        fs::metadata(lock)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingCompiler(Cell<usize>);

    impl Compiler for CountingCompiler {
        fn compile(&self, source: &Path, output: &Path) -> io::Result<()> {
            self.0.set(self.0.get() + 1);
            let mut bytes = b"compiled:".to_vec();
            bytes.extend(fs::read(source)?);
            fs::write(output, bytes)
        }
    }

    struct FailingCompiler;

    impl Compiler for FailingCompiler {
        fn compile(&self, _source: &Path, output: &Path) -> io::Result<()> {
            fs::write(output, b"half")?;
            Err(io::Error::other("compiler crashed"))
        }
    }

    fn scratch(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn key_is_sha256_hex() {
        assert_eq!(
            ArtifactCache::key(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn second_compile_hits_cache() {
        let dir = scratch("typeview-artifact-hit");
        let source = dir.join("mod.src");
        fs::write(&source, b"fn main").expect("source");
        let cache = ArtifactCache::new(dir.join("cache"));
        let compiler = CountingCompiler(Cell::new(0));
        let first = cache.compile(&compiler, &source).expect("compile");
        let second = cache.compile(&compiler, &source).expect("cached");
        assert_eq!(first, second);
        assert_eq!(compiler.0.get(), 1);
        assert_eq!(fs::read(&first).expect("artifact"), b"compiled:fn main");
        assert!(!cache.lock_path(&ArtifactCache::key(b"fn main")).exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_compile_leaves_no_artifact() {
        let dir = scratch("typeview-artifact-fail");
        let source = dir.join("mod.src");
        fs::write(&source, b"broken").expect("source");
        let cache = ArtifactCache::new(dir.join("cache"));
        assert!(matches!(
            cache.compile(&FailingCompiler, &source),
            Err(ArtifactError::Io(_))
        ));
        let key = ArtifactCache::key(b"broken");
        assert!(!cache.artifact_path(&key).exists());
        assert!(!cache.lock_path(&key).exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn live_lock_times_out() {
        let dir = scratch("typeview-artifact-lock");
        let source = dir.join("mod.src");
        fs::write(&source, b"locked").expect("source");
        let cache = ArtifactCache::new(dir.join("cache"))
            .with_stale_after(Duration::from_secs(3600))
            .with_timeout(Duration::from_millis(30))
            .with_poll(Duration::from_millis(5));
        let key = ArtifactCache::key(b"locked");
        fs::create_dir_all(cache.lock_path(&key)).expect("held lock");
        let compiler = CountingCompiler(Cell::new(0));
        assert!(matches!(
            cache.compile(&compiler, &source),
            Err(ArtifactError::LockTimeout { .. })
        ));
        assert_eq!(compiler.0.get(), 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn abandoned_lock_is_reclaimed() {
        let dir = scratch("typeview-artifact-stale");
        let source = dir.join("mod.src");
        fs::write(&source, b"abandoned").expect("source");
        let cache = ArtifactCache::new(dir.join("cache"))
            .with_stale_after(Duration::from_millis(20))
            .with_poll(Duration::from_millis(5));
        let key = ArtifactCache::key(b"abandoned");
        fs::create_dir_all(cache.lock_path(&key)).expect("old lock");
        thread::sleep(Duration::from_millis(60));
        let compiler = CountingCompiler(Cell::new(0));
        let artifact = cache.compile(&compiler, &source).expect("reclaimed");
        assert!(artifact.exists());
        assert_eq!(compiler.0.get(), 1);
        let _ = fs::remove_dir_all(dir);
    }
}
