/*
  carwash-dispenser, an unattended carwash entry ticket dispenser controller.

  This program is free software: you can redistribute it and/or modify
  it under the terms of the GNU General Public License as published by
  the Free Software Foundation, either version 3 of the License, or
  (at your option) any later version.

  This program is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

//! Persisted ticket sequence cursor.
//!
//! `SequenceStore` centralizes the cursor file and the in-memory next value
//! behind one type: a ticket's sequence is only persisted once it has
//! actually been handed to the driver, so a reboot between reservation and
//! a failed print never reissues or skips a sequence.

use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "sequence cursor I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

/// Read the persisted cursor from `path`.
///
/// A missing or corrupt (non-numeric) file yields `0`.
#[must_use]
pub fn load(path: &Path) -> u64 {
    match fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Atomically persist `value` to `path` via write-to-temp, rename-over.
///
/// # Errors
///
/// Returns [`Error::Io`] if the temp file cannot be created/written in
/// `path`'s parent directory, or if the rename fails.
pub fn persist(path: &Path, value: u64) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    use std::io::Write;
    write!(tmp, "{value}")?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Owns the sequence cursor file exclusively for Primary, and centralizes
/// the "next sequence" logic across boot and steady-state operation.
pub struct SequenceStore {
    path: PathBuf,
    /// The next sequence number to be handed out. Persisted to disk only
    /// once a ticket bearing it has actually been handed to the driver (see
    /// [`SequenceStore::confirm`]), so a reboot between generation and a
    /// failed print never reissues a sequence twice.
    next: u64,
}

impl SequenceStore {
    /// Load the effective next sequence at boot: `max(persisted_cursor,
    /// server_reported_last) + 1`.
    #[must_use]
    pub fn boot(path: PathBuf, server_reported_last: u64) -> SequenceStore {
        let persisted = load(&path);
        let next = persisted.max(server_reported_last) + 1;
        SequenceStore { path, next }
    }

    /// Peek the sequence number that the next generated ticket will use,
    /// without consuming it.
    #[must_use]
    pub fn peek_next(&self) -> u64 {
        self.next
    }

    /// Reserve the current `next` value for a ticket about to be printed,
    /// without yet persisting it. Returns the reserved sequence.
    #[must_use]
    pub fn reserve(&self) -> u64 {
        self.next
    }

    /// Confirm that the ticket bearing the last-reserved sequence was
    /// successfully handed to the driver: persist the cursor and advance
    /// `next` for the following ticket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the cursor file cannot be written.
    pub fn confirm(&mut self) -> Result<(), Error> {
        persist(&self.path, self.next)?;
        self.next += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert_eq!(load(&path), 0);
    }

    #[test]
    fn corrupt_file_loads_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        fs::write(&path, "not-a-number").unwrap();
        assert_eq!(load(&path), 0);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        persist(&path, 42).unwrap();
        assert_eq!(load(&path), 42);
    }

    #[test]
    fn boot_takes_max_of_persisted_and_server() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        persist(&path, 10).unwrap();

        let store = SequenceStore::boot(path.clone(), 8);
        assert_eq!(store.peek_next(), 11);

        let store = SequenceStore::boot(path, 15);
        assert_eq!(store.peek_next(), 16);
    }

    #[test]
    fn confirm_persists_and_advances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        let mut store = SequenceStore::boot(path.clone(), 0);
        assert_eq!(store.reserve(), 1);
        store.confirm().unwrap();
        assert_eq!(load(&path), 1);
        assert_eq!(store.peek_next(), 2);
    }

    #[test]
    fn failed_print_never_persists_reservation() {
        // A ticket is reserved but printing fails, so `confirm` is never
        // called. The next boot must reissue the same sequence rather than
        // skip it.
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        let store = SequenceStore::boot(path.clone(), 0);
        let reserved = store.reserve();
        assert_eq!(reserved, 1);
        drop(store); // print failed; nothing was confirmed

        let reboot = SequenceStore::boot(path, 0);
        assert_eq!(reboot.peek_next(), 1);
    }
}
