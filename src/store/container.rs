use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{debug, info};

use super::index::{normalize_group, ContainerIndex, GroupEntry, FORMAT_VERSION};
use crate::error::{Error, Result};

/// Leading and trailing file marker.
pub const MAGIC: &[u8; 8] = b"RSBGRP01";

const HEADER_LEN: u64 = MAGIC.len() as u64;
/// `index_len: u64` followed by the closing magic.
const TRAILER_LEN: u64 = 8 + MAGIC.len() as u64;

// ---------------------------------------------------------------------------
// Container – a single file holding several named groups
// ---------------------------------------------------------------------------

/// A group container file.
///
/// Layout:
/// ```text
/// MAGIC | payload … payload | index (JSON) | index_len (u64 LE) | MAGIC
/// ```
///
/// Payloads are opaque here; `store::codec` gives them meaning. Every
/// mutation rewrites the whole file to `<path>.tmp` with groups in sorted
/// order and renames it into place, so the result of a write depends only on
/// the final set of groups.
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    index: ContainerIndex,
}

/// Where a group's bytes come from during a rewrite.
enum PayloadSource<'a> {
    Existing { offset: u64, length: u64 },
    New(&'a [u8]),
}

impl Container {
    /// Open an existing container and validate its index.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let index = read_index(&path, &mut file)?;
        Ok(Self { path, index })
    }

    /// Open a container, or start an empty one if the file does not exist yet.
    pub fn open_or_empty(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(mut file) => {
                let index = read_index(path, &mut file)?;
                Ok(Self {
                    path: path.to_path_buf(),
                    index,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self {
                path: path.to_path_buf(),
                index: ContainerIndex::default(),
            }),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &GroupEntry)> {
        self.index.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entry(&self, group: &str) -> Result<&GroupEntry> {
        let name = normalize_group(group)?;
        self.index
            .groups
            .get(&name)
            .ok_or_else(|| Error::GroupNotFound {
                path: self.path.clone(),
                group: name,
            })
    }

    /// Read a group's payload bytes.
    pub fn read_payload(&self, group: &str) -> Result<Bytes> {
        let entry = self.entry(group)?;
        let mut file = File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let mut buf = vec![0u8; entry.length as usize];
        file.seek(SeekFrom::Start(entry.offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(Bytes::from(buf))
    }

    /// Store `payload` under `group`, replacing any previous group of that name.
    /// `entry.offset` and `entry.length` are assigned here.
    pub fn put_group(&mut self, group: &str, entry: GroupEntry, payload: &[u8]) -> Result<()> {
        let name = normalize_group(group)?;
        let mut plan: Vec<(String, GroupEntry, PayloadSource<'_>)> = self
            .index
            .groups
            .iter()
            .filter(|(k, _)| **k != name)
            .map(|(k, e)| {
                let source = PayloadSource::Existing {
                    offset: e.offset,
                    length: e.length,
                };
                (k.clone(), e.clone(), source)
            })
            .collect();
        plan.push((name.clone(), entry, PayloadSource::New(payload)));

        self.rewrite(plan)?;
        info!(
            "wrote group {name} ({} bytes) to {}",
            payload.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Delete a group. Returns `false` if it was not present.
    pub fn remove_group(&mut self, group: &str) -> Result<bool> {
        let name = normalize_group(group)?;
        if !self.index.groups.contains_key(&name) {
            return Ok(false);
        }

        let plan = self
            .index
            .groups
            .iter()
            .filter(|(k, _)| **k != name)
            .map(|(k, e)| {
                let source = PayloadSource::Existing {
                    offset: e.offset,
                    length: e.length,
                };
                (k.clone(), e.clone(), source)
            })
            .collect();
        self.rewrite(plan)?;
        info!("removed group {name} from {}", self.path.display());
        Ok(true)
    }

    fn rewrite(&mut self, mut plan: Vec<(String, GroupEntry, PayloadSource<'_>)>) -> Result<()> {
        plan.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let tmp_path = tmp_path(&self.path);

        let mut old = if plan
            .iter()
            .any(|(_, _, s)| matches!(s, PayloadSource::Existing { .. }))
        {
            Some(File::open(&self.path).map_err(|e| Error::io(&self.path, e))?)
        } else {
            None
        };

        let file = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
        let mut guard = TempFileGuard::new(tmp_path.clone());
        let mut out = BufWriter::new(file);
        let io_err = |e| Error::io(&tmp_path, e);

        out.write_all(MAGIC).map_err(io_err)?;
        let mut offset = HEADER_LEN;
        let mut index = ContainerIndex::default();

        for (name, mut entry, source) in plan {
            let length = match source {
                PayloadSource::New(bytes) => {
                    out.write_all(bytes).map_err(io_err)?;
                    bytes.len() as u64
                }
                PayloadSource::Existing {
                    offset: src,
                    length,
                } => {
                    // Only reachable when `old` was opened above.
                    let Some(old) = old.as_mut() else {
                        return Err(Error::corrupt(&self.path, "missing source file"));
                    };
                    old.seek(SeekFrom::Start(src))
                        .map_err(|e| Error::io(&self.path, e))?;
                    let copied = io::copy(&mut old.take(length), &mut out).map_err(io_err)?;
                    if copied != length {
                        return Err(Error::corrupt(
                            &self.path,
                            format!("group {name} is truncated"),
                        ));
                    }
                    length
                }
            };
            debug!("group {name}: offset {offset}, {length} bytes");
            entry.offset = offset;
            entry.length = length;
            offset += length;
            index.groups.insert(name, entry);
        }

        let index_bytes = serde_json::to_vec(&index)?;
        out.write_all(&index_bytes).map_err(io_err)?;
        out.write_all(&(index_bytes.len() as u64).to_le_bytes())
            .map_err(io_err)?;
        out.write_all(MAGIC).map_err(io_err)?;

        let file = out.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        drop(old);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| Error::io(&self.path, e))?;
        guard.disarm();
        self.index = index;
        Ok(())
    }
}

/// Removes a half-written temp file unless disarmed after the rename.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best effort: the write already failed.
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!("could not remove {}: {e}", self.path.display());
            }
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_index(path: &Path, file: &mut File) -> Result<ContainerIndex> {
    let io_err = |e| Error::io(path, e);
    let len = file.metadata().map_err(io_err)?.len();
    if len < HEADER_LEN + TRAILER_LEN {
        return Err(Error::corrupt(path, format!("file is only {len} bytes")));
    }

    let mut header = [0u8; 8];
    file.read_exact(&mut header).map_err(io_err)?;
    if &header != MAGIC {
        return Err(Error::corrupt(path, "bad header magic"));
    }

    let mut trailer = [0u8; TRAILER_LEN as usize];
    file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))
        .map_err(io_err)?;
    file.read_exact(&mut trailer).map_err(io_err)?;
    if &trailer[8..] != MAGIC {
        return Err(Error::corrupt(path, "bad trailer magic, the file may be truncated"));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&trailer[..8]);
    let index_len = u64::from_le_bytes(len_bytes);
    if index_len > len - HEADER_LEN - TRAILER_LEN {
        return Err(Error::corrupt(path, "index length exceeds file size"));
    }
    let index_start = len - TRAILER_LEN - index_len;

    let mut index_bytes = vec![0u8; index_len as usize];
    file.seek(SeekFrom::Start(index_start)).map_err(io_err)?;
    file.read_exact(&mut index_bytes).map_err(io_err)?;
    let index: ContainerIndex = serde_json::from_slice(&index_bytes)?;

    if index.format_version != FORMAT_VERSION {
        return Err(Error::corrupt(
            path,
            format!("unsupported format version {}", index.format_version),
        ));
    }
    for (name, entry) in &index.groups {
        let end = entry.offset.checked_add(entry.length);
        if entry.offset < HEADER_LEN || end.map_or(true, |end| end > index_start) {
            return Err(Error::corrupt(
                path,
                format!("group {name} points outside the payload area"),
            ));
        }
    }
    debug!(
        "opened {} with {} group(s)",
        path.display(),
        index.groups.len()
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ColumnKind, ColumnMeta};

    fn entry(rows: u64) -> GroupEntry {
        GroupEntry {
            offset: 0,
            length: 0,
            columns: vec![ColumnMeta::new("amount", ColumnKind::Integer)],
            partitions: vec![rows],
            categories: Default::default(),
        }
    }

    #[test]
    fn groups_survive_writes_to_other_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.grp");

        let mut store = Container::open_or_empty(&path).unwrap();
        assert_eq!(store.groups().count(), 0);
        store.put_group("/data", entry(3), b"raw-payload").unwrap();
        store.put_group("data2", entry(3), b"categorical").unwrap();

        let reopened = Container::open(&path).unwrap();
        let names: Vec<&str> = reopened.groups().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["/data", "/data2"]);
        assert_eq!(&reopened.read_payload("data").unwrap()[..], b"raw-payload");
        assert_eq!(&reopened.read_payload("/data2").unwrap()[..], b"categorical");
        assert!(!dir.path().join("nested").join("store.grp.tmp").exists());
    }

    #[test]
    fn overwrite_replaces_and_is_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.grp");
        let b = dir.path().join("b.grp");

        let mut first = Container::open_or_empty(&a).unwrap();
        first.put_group("/data", entry(1), b"old").unwrap();
        first.put_group("/data2", entry(2), b"two").unwrap();
        first.put_group("/data", entry(3), b"new-bytes").unwrap();

        let mut second = Container::open_or_empty(&b).unwrap();
        second.put_group("/data2", entry(2), b"two").unwrap();
        second.put_group("/data", entry(3), b"new-bytes").unwrap();

        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
        assert_eq!(first.entry("/data").unwrap().partitions, vec![3]);
    }

    #[test]
    fn remove_and_missing_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.grp");
        let mut store = Container::open_or_empty(&path).unwrap();
        store.put_group("/data", entry(1), b"x").unwrap();
        store.put_group("/keep", entry(1), b"y").unwrap();

        assert!(store.remove_group("/data").unwrap());
        assert!(!store.remove_group("/data").unwrap());

        let reopened = Container::open(&path).unwrap();
        assert!(matches!(
            reopened.entry("/data"),
            Err(Error::GroupNotFound { .. })
        ));
        assert_eq!(&reopened.read_payload("/keep").unwrap()[..], b"y");
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.grp");
        let mut store = Container::open_or_empty(&path).unwrap();
        store.put_group("/data", entry(1), b"payload").unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            Container::open(&path),
            Err(Error::CorruptContainer { .. })
        ));

        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            Container::open(&path),
            Err(Error::CorruptContainer { .. })
        ));
    }

    #[test]
    fn failed_rewrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.grp");
        let mut store = Container::open_or_empty(&path).unwrap();
        store.put_group("/data", entry(1), b"a-long-enough-payload").unwrap();

        // The file shrinks under an open handle, so copying `/data` comes up short.
        std::fs::write(&path, MAGIC).unwrap();
        let err = store.put_group("/data2", entry(1), b"more").unwrap_err();
        assert!(matches!(err, Error::CorruptContainer { .. }));
        assert!(!dir.path().join("store.grp.tmp").exists());
        assert_eq!(std::fs::read(&path).unwrap(), MAGIC);
    }

    #[test]
    fn opening_a_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Container::open(dir.path().join("absent.grp")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
