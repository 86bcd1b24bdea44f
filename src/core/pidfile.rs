//! # PID file management.
//!
//! Between a successful start and a clean shutdown the PID file exists and
//! names the process currently owning the listener. Writes go through a
//! temp file and a rename, so readers never observe a truncated file.
//!
//! On graceful restart the predecessor does not remove the file; the
//! successor overwrites it, and that overwrite is the readiness signal the
//! predecessor polls for.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ServeError;

/// Handle to the PID file owned by this process.
///
/// `owned` tracks whether this process is still responsible for the file:
/// a predecessor that handed its listener to a successor calls
/// [`PidFile::release`] and leaves the file for the successor.
pub struct PidFile {
    path: PathBuf,
    owned: bool,
}

impl PidFile {
    /// Writes this process's PID atomically and takes ownership.
    pub fn write(path: impl Into<PathBuf>) -> Result<Self, ServeError> {
        let path = path.into();
        write_atomic(&path, std::process::id()).map_err(|source| ServeError::PidFile {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, owned: true })
    }

    /// Rewrites the file with this process's PID and re-takes ownership.
    ///
    /// Used after an aborted handover: whatever a half-started successor
    /// may have written, the file must point at the live owner again.
    pub fn rewrite(&mut self) -> Result<(), ServeError> {
        write_atomic(&self.path, std::process::id()).map_err(|source| ServeError::PidFile {
            path: self.path.clone(),
            source,
        })?;
        self.owned = true;
        Ok(())
    }

    /// Reads the PID recorded at `path`.
    ///
    /// Parses the leading digits and ignores anything after them; returns
    /// `None` for a missing file or one without a leading number.
    pub fn read(path: &Path) -> Option<u32> {
        let contents = fs::read_to_string(path).ok()?;
        let digits: String = contents.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    /// Gives up ownership without touching the file (restart handover).
    pub fn release(&mut self) {
        self.owned = false;
    }

    /// Removes the file if this process still owns it. Best-effort:
    /// absence is not an error.
    pub fn remove(&mut self) {
        if self.owned {
            let _ = fs::remove_file(&self.path);
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this process is still responsible for the file.
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

/// Write-then-rename so a concurrent reader sees the old or the new
/// contents, never a partial write.
fn write_atomic(path: &Path, pid: u32) -> io::Result<()> {
    let tmp = match path.file_name() {
        Some(name) => {
            let mut tmp_name = name.to_os_string();
            tmp_name.push(format!(".{pid}.tmp"));
            path.with_file_name(tmp_name)
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "pid path has no file name",
            ))
        }
    };
    fs::write(&tmp, format!("{pid}\n"))?;
    fs::rename(&tmp, path)
}
