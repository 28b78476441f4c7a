//! The changeset journal.
//!
//! Every zone has an append-only journal of the changesets that were applied
//! to it.  The journal is what lets the server answer IXFR and replay history
//! after a restart; FLUSH truncates it once the zone file has caught up.
//!
//! ## On-disk format
//!
//! A fixed header (an eight-octet magic, a format version, and the serial
//! window base), followed by entries of the form
//! `(serial_from u32, serial_to u32, length u32, octets[length])`, each
//! holding one wire-encoded changeset.  Consecutive entries chain:
//! entry *i*'s `serial_to` is entry *i+1*'s `serial_from`.  A tail marker of
//! all-ones terminates the valid data; truncation rewrites the marker in
//! place and pads the file to the next power-of-two boundary.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::FileExt;

use camino::Utf8PathBuf;
use herald_wire::Serial;

use crate::zone::changeset::{Changeset, ChangesetError};

const MAGIC: [u8; 8] = *b"HERALDJ\0";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 16;
const TAIL_MARKER: [u8; 12] = [0xFF; 12];

//----------- Journal ----------------------------------------------------------

/// One entry of the in-memory index.
#[derive(Clone, Copy, Debug)]
struct Entry {
    /// The serial this entry's changeset applies to.
    from: Serial,

    /// The serial this entry's changeset produces.
    to: Serial,

    /// Where the changeset octets start in the file.
    offset: u64,

    /// The length of the changeset octets.
    length: u32,
}

/// A zone's changeset journal.
#[derive(Debug)]
pub struct Journal {
    /// The journal file.
    file: File,

    /// The path it was opened from.
    path: Utf8PathBuf,

    /// The index of valid entries, oldest first.
    entries: Vec<Entry>,

    /// Where the next entry (currently the tail marker) starts.
    end: u64,
}

impl Journal {
    /// Open a journal file, creating it if necessary.
    ///
    /// Existing contents are validated: bad magic, an unknown version or a
    /// broken serial chain are rejected rather than silently served.
    pub fn open(path: Utf8PathBuf) -> Result<Self, JournalError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            header.extend_from_slice(&MAGIC);
            header.extend_from_slice(&VERSION.to_be_bytes());
            header.extend_from_slice(&0u32.to_be_bytes());
            header.extend_from_slice(&TAIL_MARKER);
            file.write_all(&header)?;
            file.sync_data()?;
            return Ok(Self {
                file,
                path,
                entries: Vec::new(),
                end: HEADER_LEN,
            });
        }

        // Validate the header.
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if header[..8] != MAGIC {
            return Err(JournalError::BadMagic);
        }
        let version = u32::from_be_bytes(header[8..12].try_into().expect("4 octets"));
        if version != VERSION {
            return Err(JournalError::BadVersion(version));
        }

        // Scan the entries up to the tail marker.
        let mut entries: Vec<Entry> = Vec::new();
        let mut offset = HEADER_LEN;
        loop {
            let mut frame = [0u8; 12];
            if file.read_exact_at(&mut frame, offset).is_err() {
                // A missing tail marker means the last write was torn; the
                // entries scanned so far are still intact.
                break;
            }
            if frame == TAIL_MARKER {
                break;
            }
            let from = Serial(u32::from_be_bytes(frame[0..4].try_into().expect("4 octets")));
            let to = Serial(u32::from_be_bytes(frame[4..8].try_into().expect("4 octets")));
            let length = u32::from_be_bytes(frame[8..12].try_into().expect("4 octets"));
            if let Some(last) = entries.last() {
                if last.to != from {
                    return Err(JournalError::BrokenChain);
                }
            }
            entries.push(Entry {
                from,
                to,
                offset: offset + 12,
                length,
            });
            offset += 12 + u64::from(length);
            if offset > len {
                return Err(JournalError::Corrupt);
            }
        }

        Ok(Self {
            file,
            path,
            entries,
            end: offset,
        })
    }

    /// The path this journal lives at.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// Whether the journal holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The serial window covered: from the oldest entry's `serial_from` to
    /// the newest entry's `serial_to`.
    pub fn window(&self) -> Option<(Serial, Serial)> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        Some((first.from, last.to))
    }

    /// Append a changeset.
    ///
    /// The changeset's `serial_from` must continue the chain.  The entry and
    /// a fresh tail marker are written and synced before the call returns;
    /// a crash mid-write loses at most the entry being written.
    pub fn store(&mut self, changeset: &Changeset) -> Result<(), JournalError> {
        let from = changeset.serial_from().ok_or(ChangesetError::NoSoa)?;
        let to = changeset.serial_to().ok_or(ChangesetError::NoSoa)?;
        if let Some(last) = self.entries.last() {
            if last.to != from {
                return Err(JournalError::Gap {
                    have: last.to,
                    want: from,
                });
            }
        }

        let wire = changeset.to_wire()?;
        let mut frame = Vec::with_capacity(12 + wire.len() + 12);
        frame.extend_from_slice(&from.get().to_be_bytes());
        frame.extend_from_slice(&to.get().to_be_bytes());
        frame.extend_from_slice(&(wire.len() as u32).to_be_bytes());
        frame.extend_from_slice(&wire);
        frame.extend_from_slice(&TAIL_MARKER);
        self.file.write_all_at(&frame, self.end)?;
        self.file.sync_data()?;

        if self.entries.is_empty() {
            // Keep the header's serial-window base current.
            self.file.write_all_at(&from.get().to_be_bytes(), 12)?;
        }
        self.entries.push(Entry {
            from,
            to,
            offset: self.end + 12,
            length: wire.len() as u32,
        });
        self.end += 12 + wire.len() as u64;
        Ok(())
    }

    /// Load the chain of changesets starting at `from`.
    ///
    /// Fails with [`JournalError::Gap`] if the journal does not reach back
    /// to `from`; IXFR service falls back to a full transfer in that case.
    pub fn load_range(&self, from: Serial) -> Result<Vec<Changeset>, JournalError> {
        let start = self
            .entries
            .iter()
            .position(|entry| entry.from == from)
            .ok_or_else(|| JournalError::Gap {
                have: self.window().map(|(first, _)| first).unwrap_or(from),
                want: from,
            })?;

        let mut changesets = Vec::with_capacity(self.entries.len() - start);
        for entry in &self.entries[start..] {
            let mut wire = vec![0u8; entry.length as usize];
            self.file.read_exact_at(&mut wire, entry.offset)?;
            changesets.push(Changeset::from_wire(&wire)?);
        }
        Ok(changesets)
    }

    /// Drop all entries.
    ///
    /// Called after FLUSH has persisted the zone file, and after a full
    /// transfer replaced the zone outright.  The tail marker is rewritten in
    /// place directly after the header and the file is shrunk to the next
    /// power-of-two boundary.
    pub fn truncate(&mut self) -> Result<(), JournalError> {
        self.file.write_all_at(&TAIL_MARKER, HEADER_LEN)?;
        let boundary = (HEADER_LEN + TAIL_MARKER.len() as u64).next_power_of_two();
        self.file.set_len(boundary)?;
        self.file.sync_data()?;
        self.entries.clear();
        self.end = HEADER_LEN;
        Ok(())
    }
}

//----------- JournalError -----------------------------------------------------

/// An error using the journal.
#[derive(Debug)]
pub enum JournalError {
    /// The file does not start with the journal magic.
    BadMagic,

    /// The file uses an unknown format version.
    BadVersion(u32),

    /// The file's framing is self-contradictory.
    Corrupt,

    /// Consecutive serials do not chain.
    BrokenChain,

    /// The requested serial is outside the journal's window.
    Gap {
        /// The nearest serial the journal knows.
        have: Serial,

        /// The serial that was asked for.
        want: Serial,
    },

    /// A stored changeset could not be encoded or decoded.
    Changeset(ChangesetError),

    /// The underlying file failed.
    Io(io::Error),
}

impl From<io::Error> for JournalError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ChangesetError> for JournalError {
    fn from(err: ChangesetError) -> Self {
        Self::Changeset(err)
    }
}

impl std::error::Error for JournalError {}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => f.write_str("not a journal file"),
            Self::BadVersion(version) => write!(f, "unsupported journal version {version}"),
            Self::Corrupt => f.write_str("corrupt journal framing"),
            Self::BrokenChain => f.write_str("journal serials do not chain"),
            Self::Gap { have, want } => {
                write!(f, "journal does not cover serial {want} (oldest is {have})")
            }
            Self::Changeset(err) => err.fmt(f),
            Self::Io(err) => err.fmt(f),
        }
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use herald_wire::{Class, Name, Rdata, Record, Soa};
    use std::str::FromStr;

    fn soa_record(serial: u32) -> Record {
        Record::new(
            Name::from_str("example.").unwrap(),
            Class::IN,
            3600,
            Rdata::Soa(Soa {
                mname: Name::from_str("ns1.example.").unwrap(),
                rname: Name::from_str("hostmaster.example.").unwrap(),
                serial: Serial(serial),
                refresh: 10800,
                retry: 3600,
                expire: 604800,
                minimum: 3600,
            }),
        )
    }

    fn changeset(from: u32, to: u32) -> Changeset {
        let mut changeset = Changeset::between(soa_record(from), soa_record(to));
        changeset.add(Record::new(
            Name::from_str("www.example.").unwrap(),
            Class::IN,
            3600,
            Rdata::A(format!("192.0.2.{}", to % 250).parse().unwrap()),
        ));
        changeset
    }

    fn journal_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("example.journal")).unwrap()
    }

    #[test]
    fn store_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);

        {
            let mut journal = Journal::open(path.clone()).unwrap();
            journal.store(&changeset(0, 1)).unwrap();
            journal.store(&changeset(1, 2)).unwrap();
            journal.store(&changeset(2, 3)).unwrap();
            assert_eq!(journal.window(), Some((Serial(0), Serial(3))));
        }

        // Reopen and read everything back.
        let journal = Journal::open(path).unwrap();
        assert_eq!(journal.window(), Some((Serial(0), Serial(3))));
        let loaded = journal.load_range(Serial(0)).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].serial_from(), Some(Serial(0)));
        assert_eq!(loaded[2].serial_to(), Some(Serial(3)));

        // A partial range.
        let loaded = journal.load_range(Serial(2)).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn rejects_serial_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(journal_path(&dir)).unwrap();
        journal.store(&changeset(0, 1)).unwrap();
        assert!(matches!(
            journal.store(&changeset(5, 6)),
            Err(JournalError::Gap { .. })
        ));
    }

    #[test]
    fn missing_serial_is_a_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(journal_path(&dir)).unwrap();
        journal.store(&changeset(4, 5)).unwrap();
        assert!(matches!(
            journal.load_range(Serial(2)),
            Err(JournalError::Gap { .. })
        ));
    }

    #[test]
    fn truncate_empties_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = journal_path(&dir);
        let mut journal = Journal::open(path.clone()).unwrap();
        journal.store(&changeset(0, 1)).unwrap();
        journal.truncate().unwrap();
        assert!(journal.is_empty());

        // The truncation survives a reopen, and the chain restarts cleanly.
        let mut journal = Journal::open(path).unwrap();
        assert!(journal.is_empty());
        journal.store(&changeset(1, 2)).unwrap();
        assert_eq!(journal.window(), Some((Serial(1), Serial(2))));
    }
}
