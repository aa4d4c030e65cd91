//! File-Hash Cache
//!
//! Persistent mapping from tracked path to `{hash, size, mtime}` under
//! the project-local `.jake/` directory. A recipe with `@cache` patterns
//! is skipped when none of its matched files changed since the last
//! successful run.
//!
//! Hashes are SHA-256 over file contents, hex-encoded, so they are stable
//! across runs and machines. Size and mtime serve as a fast path: when
//! both match the record, the content is assumed unchanged; otherwise the
//! hash decides.
//!
//! A pattern that matches a directory tracks that directory's immediate
//! files only; there is no recursive content hashing. Use `dir/**/*` to
//! track a tree.
//!
//! The store is rewritten atomically (write-temp + rename) so an
//! interrupted run cannot corrupt it. Store read failures degrade to an
//! empty cache; write failures are *cache-io* errors.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{JakeError, Result};

const STORE_DIR: &str = ".jake";
const STORE_FILE: &str = "cache.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheRecord {
    pub hash: String,
    pub size: u64,
    pub mtime: u64,
}

#[derive(Debug)]
pub struct HashCache {
    store_path: PathBuf,
    records: IndexMap<String, CacheRecord>,
    dirty: bool,
}

impl HashCache {
    /// Load the cache store for a project directory. A missing or corrupt
    /// store yields an empty cache rather than an error.
    pub fn load(project_dir: &Path) -> Self {
        let store_path = project_dir.join(STORE_DIR).join(STORE_FILE);
        let records = std::fs::read_to_string(&store_path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            store_path,
            records,
            dirty: false,
        }
    }

    /// Is any file in the set stale relative to the cached state?
    ///
    /// A file with no record is stale; so is one whose content hash
    /// changed. Size+mtime equality short-circuits the hash.
    pub fn is_stale(&self, base: &Path, files: &[PathBuf]) -> Result<bool> {
        for file in files {
            let key = record_key(base, file);
            let record = match self.records.get(&key) {
                Some(record) => record,
                None => return Ok(true),
            };
            let (size, mtime) = file_stat(file)?;
            if size == record.size && mtime == record.mtime {
                continue;
            }
            if hash_file(file)? != record.hash {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Record the current state of the given files.
    pub fn update(&mut self, base: &Path, files: &[PathBuf]) -> Result<()> {
        for file in files {
            let (size, mtime) = file_stat(file)?;
            let record = CacheRecord {
                hash: hash_file(file)?,
                size,
                mtime,
            };
            self.records.insert(record_key(base, file), record);
        }
        self.dirty = true;
        Ok(())
    }

    /// Atomically rewrite the store (write-temp + rename). No-op when
    /// nothing changed.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let parent = self.store_path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(cache_io)?;

        let json = serde_json::to_string_pretty(&self.records).map_err(|err| {
            JakeError::CacheIo {
                message: format!("cannot serialize cache store: {}", err),
            }
        })?;
        let tmp_path = self.store_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(cache_io)?;
        std::fs::rename(&tmp_path, &self.store_path).map_err(cache_io)?;
        self.dirty = false;
        Ok(())
    }

    #[cfg(test)]
    fn record(&self, base: &Path, file: &Path) -> Option<&CacheRecord> {
        self.records.get(&record_key(base, file))
    }
}

fn cache_io(err: std::io::Error) -> JakeError {
    JakeError::CacheIo {
        message: err.to_string(),
    }
}

/// Store keys are project-relative where possible, so the store survives
/// a project directory move.
fn record_key(base: &Path, file: &Path) -> String {
    file.strip_prefix(base)
        .unwrap_or(file)
        .display()
        .to_string()
}

fn file_stat(path: &Path) -> Result<(u64, u64)> {
    let metadata = std::fs::metadata(path).map_err(|err| JakeError::CacheIo {
        message: format!("{}: {}", path.display(), err),
    })?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok((metadata.len(), mtime))
}

/// SHA-256 content hash, hex-encoded.
pub fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read(path).map_err(|err| JakeError::CacheIo {
        message: format!("{}: {}", path.display(), err),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

/// Expand glob patterns relative to the project directory into a sorted,
/// de-duplicated file set. A matched directory contributes its immediate
/// files; deeper nesting requires an explicit `**` pattern.
pub fn expand_globs(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            base.join(pattern).display().to_string()
        };
        let entries = glob::glob(&full).map_err(|err| JakeError::CacheIo {
            message: format!("invalid glob pattern `{}`: {}", pattern, err),
        })?;
        for entry in entries {
            let path = entry.map_err(|err| JakeError::CacheIo {
                message: format!("glob `{}`: {}", pattern, err),
            })?;
            if path.is_dir() {
                let mut children: Vec<PathBuf> = std::fs::read_dir(&path)
                    .map_err(cache_io)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect();
                children.sort();
                files.extend(children);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_new_files_are_stale() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "src/main.c", "int main(){}");
        let cache = HashCache::load(dir.path());
        assert!(cache.is_stale(dir.path(), &[file]).unwrap());
    }

    #[test]
    fn test_update_then_unchanged_is_fresh() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "src/main.c", "int main(){}");
        let mut cache = HashCache::load(dir.path());
        cache.update(dir.path(), &[file.clone()]).unwrap();
        assert!(!cache.is_stale(dir.path(), &[file]).unwrap());
    }

    #[test]
    fn test_content_change_is_stale() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "src/main.c", "int main(){}");
        let mut cache = HashCache::load(dir.path());
        cache.update(dir.path(), &[file.clone()]).unwrap();

        fs::write(&file, "int main(){ return 1; }").unwrap();
        assert!(cache.is_stale(dir.path(), &[file]).unwrap());
    }

    #[test]
    fn test_touch_without_content_change_is_fresh() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt", "same");
        let mut cache = HashCache::load(dir.path());
        cache.update(dir.path(), &[file.clone()]).unwrap();

        // Rewrite identical content: mtime may move, hash decides
        fs::write(&file, "same").unwrap();
        assert!(!cache.is_stale(dir.path(), &[file]).unwrap());
    }

    #[test]
    fn test_unrelated_file_change_does_not_invalidate() {
        let dir = TempDir::new().unwrap();
        let tracked = touch(&dir, "src/main.c", "main");
        let _other = touch(&dir, "src/util.c", "util");
        let mut cache = HashCache::load(dir.path());
        cache.update(dir.path(), &[tracked.clone()]).unwrap();

        touch(&dir, "src/util.c", "changed util");
        assert!(!cache.is_stale(dir.path(), &[tracked]).unwrap());
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt", "content");
        let mut cache = HashCache::load(dir.path());
        cache.update(dir.path(), &[file.clone()]).unwrap();
        cache.persist().unwrap();

        let reloaded = HashCache::load(dir.path());
        assert!(!reloaded.is_stale(dir.path(), &[file.clone()]).unwrap());
        assert!(reloaded.record(dir.path(), &file).is_some());
    }

    #[test]
    fn test_corrupt_store_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(STORE_DIR);
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join(STORE_FILE), "{ not json").unwrap();

        let file = touch(&dir, "a.txt", "content");
        let cache = HashCache::load(dir.path());
        assert!(cache.is_stale(dir.path(), &[file]).unwrap());
    }

    #[test]
    fn test_expand_globs() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "src/a.c", "a");
        touch(&dir, "src/b.c", "b");
        touch(&dir, "src/deep/c.c", "c");

        let files = expand_globs(dir.path(), &["src/*.c".to_string()]).unwrap();
        assert_eq!(files.len(), 2);

        let files = expand_globs(dir.path(), &["src/**/*.c".to_string()]).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_directory_pattern_tracks_top_level_files_only() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "assets/logo.png", "png");
        touch(&dir, "assets/nested/deep.png", "png2");

        let files = expand_globs(dir.path(), &["assets".to_string()]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("logo.png"));
    }

    #[test]
    fn test_empty_expansion() {
        let dir = TempDir::new().unwrap();
        let files = expand_globs(dir.path(), &["*.nope".to_string()]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_hash_is_stable() {
        let dir = TempDir::new().unwrap();
        let file = touch(&dir, "a.txt", "hello");
        let h1 = hash_file(&file).unwrap();
        let h2 = hash_file(&file).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
