//! Guarded writes to files that may carry the immutable attribute
//!
//! The resolver file is commonly pinned with `chattr +i` to stop other
//! software from rewriting it. [`GuardedWriter`] clears the flag when
//! present, overwrites the file, and re-applies the flag only if it was set
//! beforehand, so the lock state round-trips.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{CommandRunner, RunnerError};
use crate::parse::{AttrListingParser, TextOutputParser};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to change attributes of {path}: {detail}")]
    Attr { path: PathBuf, detail: String },
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub struct GuardedWriter {
    runner: Arc<dyn CommandRunner>,
}

impl GuardedWriter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Whether the file currently carries the immutable attribute.
    ///
    /// Filesystems without attribute support report as not immutable.
    pub fn is_immutable(&self, path: &Path) -> Result<bool, WriteError> {
        let path_str = path.to_string_lossy();
        let out = self.runner.run("lsattr", &[path_str.as_ref()])?;
        if !out.success {
            return Err(WriteError::Attr {
                path: path.to_path_buf(),
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(AttrListingParser
            .parse(&out.stdout)
            .map(|flags| flags.immutable)
            .unwrap_or(false))
    }

    /// Overwrite `path` with `content`, preserving the immutable flag state.
    pub fn write_guarded(&self, path: &Path, content: &str) -> Result<(), WriteError> {
        let was_locked = if path.exists() {
            match self.is_immutable(path) {
                Ok(locked) => locked,
                Err(e) => {
                    // Attribute inspection is advisory; a filesystem without
                    // lsattr support must not block the write itself.
                    warn!("could not inspect attributes of {}: {}", path.display(), e);
                    false
                }
            }
        } else {
            false
        };

        if was_locked {
            debug!("clearing immutable flag on {}", path.display());
            self.set_immutable(path, false)?;
        }

        fs::write(path, content).map_err(|e| WriteError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        if was_locked {
            debug!("restoring immutable flag on {}", path.display());
            self.set_immutable(path, true)?;
        }

        Ok(())
    }

    fn set_immutable(&self, path: &Path, on: bool) -> Result<(), WriteError> {
        let flag = if on { "+i" } else { "-i" };
        let path_str = path.to_string_lossy();
        let out = self.runner.run("chattr", &[flag, path_str.as_ref()])?;
        if !out.success {
            return Err(WriteError::Attr {
                path: path.to_path_buf(),
                detail: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use tempfile::TempDir;

    const LOCKED: &str = "----i---------e------- /tmp/target\n";
    const UNLOCKED: &str = "--------------e------- /tmp/target\n";

    fn writer_with(runner: &Arc<FakeRunner>) -> GuardedWriter {
        GuardedWriter::new(runner.clone() as Arc<dyn CommandRunner>)
    }

    #[test]
    fn test_write_plain_file_leaves_it_unlocked() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("resolv.conf");
        fs::write(&target, "old").unwrap();

        let runner = Arc::new(FakeRunner::new());
        runner.set_stdout("lsattr", UNLOCKED);

        let writer = writer_with(&runner);
        writer.write_guarded(&target, "new content\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new content\n");
        // No attribute changes for an unlocked file
        assert_eq!(runner.count_calls_with("chattr"), 0);
    }

    #[test]
    fn test_write_locked_file_round_trips_the_flag() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("resolv.conf");
        fs::write(&target, "old").unwrap();

        let runner = Arc::new(FakeRunner::new());
        runner.set_stdout("lsattr", LOCKED);

        let writer = writer_with(&runner);
        writer.write_guarded(&target, "new content\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new content\n");
        let chattr_calls: Vec<String> = runner
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("chattr"))
            .collect();
        assert_eq!(chattr_calls.len(), 2);
        assert!(chattr_calls[0].contains("-i"));
        assert!(chattr_calls[1].contains("+i"));
    }

    #[test]
    fn test_write_new_file_skips_attribute_checks() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("fresh.conf");

        let runner = Arc::new(FakeRunner::new());
        let writer = writer_with(&runner);
        writer.write_guarded(&target, "hello\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "hello\n");
        assert_eq!(runner.count_calls_with("lsattr"), 0);
    }

    #[test]
    fn test_attribute_inspection_failure_does_not_block_write() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("resolv.conf");
        fs::write(&target, "old").unwrap();

        let runner = Arc::new(FakeRunner::new());
        runner.fail_program("lsattr");

        let writer = writer_with(&runner);
        writer.write_guarded(&target, "new\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
    }

    #[test]
    fn test_is_immutable_reports_tool_failure() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail_program("lsattr");

        let writer = writer_with(&runner);
        let result = writer.is_immutable(Path::new("/tmp/whatever"));
        assert!(matches!(result, Err(WriteError::Attr { .. })));
    }
}
