//! Resource payload files.
//!
//! Binary payloads of resources live outside the database:
//!
//! ```text
//! <storage_dir>/Resources/
//! ├─ data/<note local id>/<resource local id>.dat
//! └─ alternateData/<note local id>/<resource local id>.dat
//! ```
//!
//! A payload is first written to a `.new` sibling and then renamed into
//! place. When both payloads of a resource change, the previous alternate
//! file is parked as `.old` for the duration of the swap:
//!
//! 1. `alt.dat` -> `alt.dat.old`
//! 2. `alt.dat.new` -> `alt.dat`
//! 3. `data.dat.new` -> `data.dat`
//! 4. remove `alt.dat.old`
//!
//! Every read first repairs whatever an interrupted swap left behind, see
//! [`BlobStore::recover`].
//!
//! Writers inside a database transaction do not touch the files directly.
//! They stage their changes in [`StagedPayloads`], which the owner of the
//! transaction applies after the commit and drops on rollback.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{FileOp, Result, StorageError};

const RESOURCES_DIR: &str = "Resources";
const DATA_EXT: &str = "dat";
const NEW_SUFFIX: &str = ".new";
const OLD_SUFFIX: &str = ".old";

/// One of the two payload namespaces of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Data,
    AlternateData,
}

impl Payload {
    fn dir_name(self) -> &'static str {
        match self {
            Payload::Data => "data",
            Payload::AlternateData => "alternateData",
        }
    }
}

/// Payload bytes to store for a resource; `None` leaves that payload untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadWrite<'a> {
    pub data: Option<&'a [u8]>,
    pub alternate_data: Option<&'a [u8]>,
}

/// A payload change waiting for its transaction to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StagedChange {
    Write {
        note_local_id: String,
        resource_local_id: String,
        data: Option<Vec<u8>>,
        alternate_data: Option<Vec<u8>>,
    },
    Relocate {
        from_note_local_id: String,
        to_note_local_id: String,
        resource_local_id: String,
    },
}

impl StagedChange {
    fn resource_local_id(&self) -> &str {
        match self {
            StagedChange::Write { resource_local_id, .. }
            | StagedChange::Relocate { resource_local_id, .. } => resource_local_id,
        }
    }
}

/// Payload changes collected during one transaction, in staging order.
#[derive(Debug, Default)]
pub struct StagedPayloads {
    changes: RefCell<Vec<StagedChange>>,
}

impl StagedPayloads {
    /// Queues a payload write. Bodies are copied, nothing hits the disk yet.
    pub fn write(&self, note_local_id: &str, resource_local_id: &str, write: PayloadWrite<'_>) {
        if write.data.is_none() && write.alternate_data.is_none() {
            return;
        }
        self.changes.borrow_mut().push(StagedChange::Write {
            note_local_id: note_local_id.to_owned(),
            resource_local_id: resource_local_id.to_owned(),
            data: write.data.map(<[u8]>::to_vec),
            alternate_data: write.alternate_data.map(<[u8]>::to_vec),
        });
    }

    /// Queues moving the payload files of a resource to another note.
    pub fn relocate(&self, from_note_local_id: &str, to_note_local_id: &str, resource_local_id: &str) {
        self.changes.borrow_mut().push(StagedChange::Relocate {
            from_note_local_id: from_note_local_id.to_owned(),
            to_note_local_id: to_note_local_id.to_owned(),
            resource_local_id: resource_local_id.to_owned(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.borrow().is_empty()
    }

    /// Forgets every staged change.
    pub fn discard(&self) {
        self.changes.borrow_mut().clear();
    }

    /// Applies and clears the staged changes. Every change is attempted; the
    /// first failure is returned.
    pub fn apply(&self, blobs: &BlobStore) -> Result<()> {
        let changes = self.changes.take();
        let mut first_err = None;
        for change in changes {
            let result = match &change {
                StagedChange::Write {
                    note_local_id,
                    resource_local_id,
                    data,
                    alternate_data,
                } => blobs.write(
                    note_local_id,
                    resource_local_id,
                    PayloadWrite {
                        data: data.as_deref(),
                        alternate_data: alternate_data.as_deref(),
                    },
                ),
                StagedChange::Relocate {
                    from_note_local_id,
                    to_note_local_id,
                    resource_local_id,
                } => blobs.relocate(from_note_local_id, to_note_local_id, resource_local_id),
            };
            if let Err(e) = result {
                log::warn!(
                    "Failed to store payloads of resource {}: {e}",
                    change.resource_local_id()
                );
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// File-backed store for resource payloads rooted at an account's storage dir.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| StorageError::fs(FileOp::Rename, from, e))
}

/// Removes a file, treating an already missing file as success.
fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::fs(FileOp::Remove, path, e)),
    }
}

fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::fs(FileOp::Remove, path, e)),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::fs(FileOp::CreateDir, parent, e))?;
    }
    let mut file = File::create(path).map_err(|e| StorageError::fs(FileOp::Open, path, e))?;
    file.write_all(bytes)
        .map_err(|e| StorageError::fs(FileOp::Write, path, e))?;
    file.flush()
        .map_err(|e| StorageError::fs(FileOp::Flush, path, e))?;
    file.sync_all()
        .map_err(|e| StorageError::fs(FileOp::Flush, path, e))
}

impl BlobStore {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            root: storage_dir.join(RESOURCES_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of one payload of a resource.
    pub fn path(&self, payload: Payload, note_local_id: &str, resource_local_id: &str) -> PathBuf {
        self.root
            .join(payload.dir_name())
            .join(note_local_id)
            .join(format!("{resource_local_id}.{DATA_EXT}"))
    }

    /// Stores the given payloads of a resource.
    ///
    /// A single payload is swapped in with one rename. Two payloads go
    /// through the four-step swap described in the module docs.
    pub fn write(&self, note_local_id: &str, resource_local_id: &str, write: PayloadWrite<'_>) -> Result<()> {
        let data_path = self.path(Payload::Data, note_local_id, resource_local_id);
        let alt_path = self.path(Payload::AlternateData, note_local_id, resource_local_id);
        let data_new = with_suffix(&data_path, NEW_SUFFIX);
        let alt_new = with_suffix(&alt_path, NEW_SUFFIX);

        if write.data.is_none() && write.alternate_data.is_none() {
            return Ok(());
        }
        self.recover(note_local_id, resource_local_id)?;

        match (write.data, write.alternate_data) {
            (None, None) => Ok(()),
            (Some(data), None) => {
                write_file(&data_new, data)?;
                rename(&data_new, &data_path)
            }
            (None, Some(alt)) => {
                write_file(&alt_new, alt)?;
                rename(&alt_new, &alt_path)
            }
            (Some(data), Some(alt)) => {
                write_file(&alt_new, alt)?;
                write_file(&data_new, data)?;

                let alt_old = with_suffix(&alt_path, OLD_SUFFIX);
                if alt_path.exists() {
                    rename(&alt_path, &alt_old)?;
                }
                rename(&alt_new, &alt_path)?;
                rename(&data_new, &data_path)?;
                remove_file(&alt_old)
            }
        }
    }

    /// Brings the files of one resource back to a consistent state after an
    /// interrupted [`write`](Self::write).
    ///
    /// * A surviving `data.new` means the swap never reached step 3: the
    ///   parked alternate file is restored and both `.new` files dropped.
    /// * Otherwise a parked `alt.old` is dropped when the swapped-in
    ///   alternate file exists, or moved back when it does not.
    /// * Any remaining `.new` file is a write that never got renamed.
    ///
    /// Safe to call any number of times.
    pub fn recover(&self, note_local_id: &str, resource_local_id: &str) -> Result<()> {
        let data_path = self.path(Payload::Data, note_local_id, resource_local_id);
        let alt_path = self.path(Payload::AlternateData, note_local_id, resource_local_id);
        let data_new = with_suffix(&data_path, NEW_SUFFIX);
        let alt_new = with_suffix(&alt_path, NEW_SUFFIX);
        let alt_old = with_suffix(&alt_path, OLD_SUFFIX);

        if data_new.exists() {
            log::warn!(
                "Rolling back interrupted payload write of resource {resource_local_id}"
            );
            if alt_old.exists() {
                rename(&alt_old, &alt_path)?;
            }
            remove_file(&data_new)?;
            remove_file(&alt_new)?;
            return Ok(());
        }

        if alt_old.exists() {
            if alt_path.exists() {
                log::warn!(
                    "Completing interrupted payload write of resource {resource_local_id}"
                );
                remove_file(&alt_old)?;
            } else {
                log::warn!(
                    "Restoring alternate payload of resource {resource_local_id} from backup"
                );
                rename(&alt_old, &alt_path)?;
            }
        }

        remove_file(&alt_new)
    }

    /// Reads one payload, recovering first. A missing file reads as `None`.
    pub fn read(
        &self,
        payload: Payload,
        note_local_id: &str,
        resource_local_id: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.recover(note_local_id, resource_local_id)?;
        let path = self.path(payload, note_local_id, resource_local_id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::fs(FileOp::Open, &path, e)),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| StorageError::fs(FileOp::Read, &path, e))?;
        Ok(Some(bytes))
    }

    /// Removes one payload of a resource together with its transient siblings.
    pub fn remove_payload(&self, payload: Payload, note_local_id: &str, resource_local_id: &str) -> Result<()> {
        let path = self.path(payload, note_local_id, resource_local_id);
        remove_file(&with_suffix(&path, NEW_SUFFIX))?;
        remove_file(&with_suffix(&path, OLD_SUFFIX))?;
        remove_file(&path)?;
        if path.exists() {
            return Err(StorageError::fs(
                FileOp::Remove,
                &path,
                std::io::Error::new(ErrorKind::Other, "file still exists after removal"),
            ));
        }
        Ok(())
    }

    /// Moves both payloads of a resource under another note. Missing files
    /// are skipped.
    pub fn relocate(&self, from_note_local_id: &str, to_note_local_id: &str, resource_local_id: &str) -> Result<()> {
        if from_note_local_id == to_note_local_id {
            return Ok(());
        }
        self.recover(from_note_local_id, resource_local_id)?;
        for payload in [Payload::Data, Payload::AlternateData] {
            let from = self.path(payload, from_note_local_id, resource_local_id);
            if !from.exists() {
                continue;
            }
            let to = self.path(payload, to_note_local_id, resource_local_id);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| StorageError::fs(FileOp::CreateDir, parent, e))?;
            }
            rename(&from, &to)?;
        }
        Ok(())
    }

    /// Removes both payloads of a resource.
    pub fn remove_resource(&self, note_local_id: &str, resource_local_id: &str) -> Result<()> {
        self.remove_payload(Payload::Data, note_local_id, resource_local_id)?;
        self.remove_payload(Payload::AlternateData, note_local_id, resource_local_id)
    }

    /// Removes every payload of a note.
    pub fn remove_note(&self, note_local_id: &str) -> Result<()> {
        for payload in [Payload::Data, Payload::AlternateData] {
            remove_dir(&self.root.join(payload.dir_name()).join(note_local_id))?;
        }
        Ok(())
    }

    /// Removes the payloads of several notes, attempting every note and
    /// returning the first failure.
    pub fn remove_notes<I, S>(&self, note_local_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut first_err = None;
        for id in note_local_ids {
            if let Err(e) = self.remove_note(id.as_ref()) {
                log::warn!("Failed to remove payloads of note {}: {e}", id.as_ref());
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drops the whole payload tree.
    pub fn clear(&self) -> Result<()> {
        remove_dir(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NOTE: &str = "note-1";
    const RES: &str = "res-1";

    fn store() -> (TempDir, BlobStore) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        (dir, store)
    }

    fn both(store: &BlobStore, data: &[u8], alt: &[u8]) {
        store
            .write(
                NOTE,
                RES,
                PayloadWrite {
                    data: Some(data),
                    alternate_data: Some(alt),
                },
            )
            .unwrap();
    }

    fn read_both(store: &BlobStore) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        (
            store.read(Payload::Data, NOTE, RES).unwrap(),
            store.read(Payload::AlternateData, NOTE, RES).unwrap(),
        )
    }

    #[test]
    fn test_layout_and_round_trip() {
        let (dir, store) = store();
        both(&store, b"primary", b"alternate");
        assert!(dir.path().join("Resources/data/note-1/res-1.dat").exists());
        assert!(dir.path().join("Resources/alternateData/note-1/res-1.dat").exists());
        assert_eq!(
            read_both(&store),
            (Some(b"primary".to_vec()), Some(b"alternate".to_vec()))
        );
    }

    #[test]
    fn test_single_payload_update_leaves_other_alone() {
        let (_dir, store) = store();
        both(&store, b"v1", b"alt-v1");
        store
            .write(NOTE, RES, PayloadWrite { data: Some(b"v2"), alternate_data: None })
            .unwrap();
        assert_eq!(
            read_both(&store),
            (Some(b"v2".to_vec()), Some(b"alt-v1".to_vec()))
        );
    }

    #[test]
    fn test_missing_payload_reads_none() {
        let (_dir, store) = store();
        assert_eq!(store.read(Payload::Data, NOTE, RES).unwrap(), None);
    }

    #[test]
    fn test_crash_after_step_one_keeps_original_pair() {
        let (_dir, store) = store();
        both(&store, b"data-old", b"alt-old");

        // Step 1 done, then the .new files were lost.
        let alt = store.path(Payload::AlternateData, NOTE, RES);
        fs::rename(&alt, with_suffix(&alt, OLD_SUFFIX)).unwrap();

        assert_eq!(
            read_both(&store),
            (Some(b"data-old".to_vec()), Some(b"alt-old".to_vec()))
        );
        assert!(!with_suffix(&alt, OLD_SUFFIX).exists());
    }

    #[test]
    fn test_crash_at_every_step_is_recoverable() {
        let old = (Some(b"data-old".to_vec()), Some(b"alt-old".to_vec()));
        let new = (Some(b"data-new".to_vec()), Some(b"alt-new".to_vec()));

        for completed_steps in 0..=4 {
            let (_dir, store) = store();
            both(&store, b"data-old", b"alt-old");

            let data = store.path(Payload::Data, NOTE, RES);
            let alt = store.path(Payload::AlternateData, NOTE, RES);
            write_file(&with_suffix(&alt, NEW_SUFFIX), b"alt-new").unwrap();
            write_file(&with_suffix(&data, NEW_SUFFIX), b"data-new").unwrap();

            if completed_steps >= 1 {
                fs::rename(&alt, with_suffix(&alt, OLD_SUFFIX)).unwrap();
            }
            if completed_steps >= 2 {
                fs::rename(with_suffix(&alt, NEW_SUFFIX), &alt).unwrap();
            }
            if completed_steps >= 3 {
                fs::rename(with_suffix(&data, NEW_SUFFIX), &data).unwrap();
            }
            if completed_steps >= 4 {
                fs::remove_file(with_suffix(&alt, OLD_SUFFIX)).unwrap();
            }

            let expected = if completed_steps >= 3 { &new } else { &old };
            assert_eq!(&read_both(&store), expected, "after step {completed_steps}");
            // A second pass must not change anything.
            assert_eq!(&read_both(&store), expected, "repeat after step {completed_steps}");
            assert!(!with_suffix(&data, NEW_SUFFIX).exists());
            assert!(!with_suffix(&alt, NEW_SUFFIX).exists());
            assert!(!with_suffix(&alt, OLD_SUFFIX).exists());
        }
    }

    #[test]
    fn test_remove_note_drops_directories() {
        let (dir, store) = store();
        both(&store, b"x", b"y");
        store.remove_note(NOTE).unwrap();
        assert!(!dir.path().join("Resources/data/note-1").exists());
        assert!(!dir.path().join("Resources/alternateData/note-1").exists());
        // Removing again is fine.
        store.remove_note(NOTE).unwrap();
    }

    #[test]
    fn test_staged_changes_wait_for_apply() {
        let (_dir, store) = store();
        let staged = StagedPayloads::default();
        staged.write(NOTE, RES, PayloadWrite { data: Some(b"staged"), alternate_data: None });
        assert!(!staged.is_empty());
        assert_eq!(read_both(&store), (None, None));

        staged.apply(&store).unwrap();
        assert!(staged.is_empty());
        assert_eq!(read_both(&store), (Some(b"staged".to_vec()), None));
    }

    #[test]
    fn test_discarded_changes_never_land() {
        let (_dir, store) = store();
        let staged = StagedPayloads::default();
        staged.write(NOTE, RES, PayloadWrite { data: Some(b"gone"), alternate_data: Some(b"gone") });
        staged.discard();
        staged.apply(&store).unwrap();
        assert_eq!(read_both(&store), (None, None));
        assert!(!store.path(Payload::Data, NOTE, RES).exists());
    }

    #[test]
    fn test_relocate_moves_both_payloads() {
        let (_dir, store) = store();
        both(&store, b"x", b"y");
        store.relocate(NOTE, "note-2", RES).unwrap();
        assert_eq!(read_both(&store), (None, None));
        assert_eq!(store.read(Payload::Data, "note-2", RES).unwrap(), Some(b"x".to_vec()));
        assert_eq!(
            store.read(Payload::AlternateData, "note-2", RES).unwrap(),
            Some(b"y".to_vec())
        );
        // Nothing left to move.
        store.relocate(NOTE, "note-2", RES).unwrap();
    }

    #[test]
    fn test_remove_resource() {
        let (_dir, store) = store();
        both(&store, b"x", b"y");
        store.remove_resource(NOTE, RES).unwrap();
        assert_eq!(read_both(&store), (None, None));
    }
}
