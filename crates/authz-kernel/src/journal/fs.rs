use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use authz_types::to_canonical_cbor;

use super::{DiskRecord, Journal, JournalEntry, JournalError, JournalSeq, OwnedJournalEntry};

const JOURNAL_DIR: &str = "journal";
const JOURNAL_FILE: &str = "journal.log";

/// Append-only file of length-prefixed (u32 LE) canonical CBOR entries.
#[derive(Debug)]
pub struct FsJournal {
    path: PathBuf,
    next_seq: JournalSeq,
}

impl FsJournal {
    /// Opens `<root>/journal/journal.log`, creating it if needed, and
    /// validates every existing entry.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, JournalError> {
        let dir = root.as_ref().join(JOURNAL_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(JOURNAL_FILE);
        if !path.exists() {
            File::create(&path)?;
        }
        let next_seq = read_entries(&path)?
            .last()
            .map(|entry| entry.seq + 1)
            .unwrap_or(0);
        log::debug!("opened journal {} at seq {next_seq}", path.display());
        Ok(Self { path, next_seq })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FsJournal {
    fn append(&mut self, entry: JournalEntry<'_>) -> Result<JournalSeq, JournalError> {
        let seq = self.next_seq;
        let bytes = to_canonical_cbor(&DiskRecord {
            seq,
            kind: entry.kind,
            payload: entry.payload,
        })?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| JournalError::Corrupt("entry larger than 4GiB".into()))?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        self.next_seq += 1;
        Ok(seq)
    }

    fn load_from(&self, from: JournalSeq) -> Result<Vec<OwnedJournalEntry>, JournalError> {
        let mut entries = read_entries(&self.path)?;
        entries.retain(|entry| entry.seq >= from);
        Ok(entries)
    }

    fn next_seq(&self) -> JournalSeq {
        self.next_seq
    }
}

fn read_entries(path: &Path) -> Result<Vec<OwnedJournalEntry>, JournalError> {
    let mut file = File::open(path)?;
    let mut entries = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        let read = read_header(&mut file, &mut len_buf)?;
        if read == 0 {
            break;
        }
        if read < len_buf.len() {
            return Err(JournalError::Corrupt(format!(
                "truncated length header (read {read} bytes)"
            )));
        }
        let mut buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        if let Err(err) = file.read_exact(&mut buf) {
            if err.kind() == ErrorKind::UnexpectedEof {
                return Err(JournalError::Corrupt("truncated entry payload".into()));
            }
            return Err(err.into());
        }
        let entry: OwnedJournalEntry = serde_cbor::from_slice(&buf)?;
        if entry.seq != entries.len() as JournalSeq {
            return Err(JournalError::Corrupt(format!(
                "expected seq {}, found {}",
                entries.len(),
                entry.seq
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Fills `buf` unless EOF comes first; returns the number of bytes read.
fn read_header(file: &mut File, buf: &mut [u8]) -> Result<usize, JournalError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}
