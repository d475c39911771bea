use crate::{GrantStore, MemGrantStore, StoreError, StoreResult, io_error};
use authz_types::{ContentDigest, Grant, GrantKey, Principal, Timestamp, to_canonical_cbor};
use std::{
    fmt,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

const GRANTS_DIR: &str = ".grants";
const RECORD_EXT: &str = "cbor";

/// Filesystem-backed grant store rooted at `<root>/.grants`.
///
/// Each grant lives in its own canonical-CBOR file named after the digest of
/// its key. The directory is indexed into memory on open and every mutation
/// is written through before it becomes visible.
pub struct FsGrantStore {
    dir: PathBuf,
    index: MemGrantStore,
}

impl fmt::Debug for FsGrantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsGrantStore")
            .field("dir", &self.dir)
            .field("grants", &self.index.len())
            .finish()
    }
}

impl FsGrantStore {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = root.as_ref().join(GRANTS_DIR);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let mut index = MemGrantStore::new();
        for entry in fs::read_dir(&dir).map_err(|e| io_error(&dir, e))? {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let grant = read_record(&path)?;
            let expected = record_path(&dir, &grant.key())?;
            if expected != path {
                return Err(StoreError::Corrupt {
                    path,
                    detail: format!("record holds grant {} under the wrong name", grant.key()),
                });
            }
            index.insert(grant);
        }
        log::debug!("opened grant store at {:?} with {} grants", dir, index.len());
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_record(&self, grant: &Grant) -> StoreResult<()> {
        let path = record_path(&self.dir, &grant.key())?;
        let bytes = to_canonical_cbor(grant)?;
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }

    fn remove_record(&self, key: &GrantKey) -> StoreResult<()> {
        let path = record_path(&self.dir, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(path, err)),
        }
    }
}

fn record_path(dir: &Path, key: &GrantKey) -> StoreResult<PathBuf> {
    let digest = ContentDigest::of_bytes(&to_canonical_cbor(key)?);
    Ok(dir.join(format!("{}.{RECORD_EXT}", digest.to_hex())))
}

fn read_record(path: &Path) -> StoreResult<Grant> {
    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    serde_cbor::from_slice(&bytes).map_err(|err| StoreError::Corrupt {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })
}

impl GrantStore for FsGrantStore {
    fn load(&self, key: &GrantKey) -> StoreResult<Option<Grant>> {
        self.index.load(key)
    }

    fn store(&mut self, grant: Grant) -> StoreResult<()> {
        self.write_record(&grant)?;
        self.index.insert(grant);
        Ok(())
    }

    fn remove(&mut self, key: &GrantKey) -> StoreResult<Option<Grant>> {
        if self.index.load(key)?.is_none() {
            return Ok(None);
        }
        self.remove_record(key)?;
        Ok(self.index.take(key))
    }

    fn scan_granter(&self, granter: &Principal) -> StoreResult<Vec<Grant>> {
        self.index.scan_granter(granter)
    }

    fn scan_all(&self) -> StoreResult<Vec<Grant>> {
        self.index.scan_all()
    }

    fn expired(&self, now: Timestamp, limit: usize) -> StoreResult<Vec<GrantKey>> {
        self.index.expired(now, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz_types::{Authorization, builtins::Coin};
    use tempfile::TempDir;

    #[test]
    fn grants_survive_reopen() {
        let dir = TempDir::new().expect("tmp");
        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        {
            let mut store = FsGrantStore::open(dir.path()).expect("open");
            store
                .save(
                    &alice,
                    &bob,
                    Authorization::spend_limit(vec![Coin::new("stake", 10)]),
                    Some(Timestamp::from_secs(60)),
                    Timestamp::ZERO,
                )
                .expect("save");
            store
                .save(&alice, &bob, Authorization::generic("gov/vote"), None, Timestamp::ZERO)
                .expect("save");
        }

        let store = FsGrantStore::open(dir.path()).expect("reopen");
        assert_eq!(store.scan_all().unwrap().len(), 2);
        let send = store
            .get(&GrantKey::new("alice", "bob", "bank/send"))
            .expect("send grant");
        assert_eq!(send.expiration, Some(Timestamp::from_secs(60)));
        let due = store.expired(Timestamp::from_secs(60), 10).unwrap();
        assert_eq!(due, vec![GrantKey::new("alice", "bob", "bank/send")]);
    }

    #[test]
    fn delete_removes_record_file() {
        let dir = TempDir::new().expect("tmp");
        let mut store = FsGrantStore::open(dir.path()).expect("open");
        store
            .save(
                &Principal::new("alice"),
                &Principal::new("bob"),
                Authorization::generic("gov/vote"),
                None,
                Timestamp::ZERO,
            )
            .expect("save");
        let key = GrantKey::new("alice", "bob", "gov/vote");
        store.delete(&key).expect("delete");
        assert!(matches!(store.delete(&key), Err(StoreError::NotFound(_))));

        let reopened = FsGrantStore::open(dir.path()).expect("reopen");
        assert!(reopened.scan_all().unwrap().is_empty());
    }

    #[test]
    fn tampered_record_is_reported() {
        let dir = TempDir::new().expect("tmp");
        let mut store = FsGrantStore::open(dir.path()).expect("open");
        store
            .save(
                &Principal::new("alice"),
                &Principal::new("bob"),
                Authorization::generic("gov/vote"),
                None,
                Timestamp::ZERO,
            )
            .expect("save");
        let path = record_path(store.dir(), &GrantKey::new("alice", "bob", "gov/vote")).unwrap();
        std::fs::write(&path, b"not cbor").expect("tamper");

        match FsGrantStore::open(dir.path()) {
            Err(StoreError::Corrupt { path: bad, .. }) => assert_eq!(bad, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
