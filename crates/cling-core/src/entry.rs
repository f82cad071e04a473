//! Revision entries and their canonical ordering.
//!
//! Every revision is a sorted stream of `(path, kind, metadata)`
//! records describing a diff against the parent revision. The order is
//! directory-aware: within a parent, files sort before the directory
//! entry, which sorts before that directory's contents. A snapshot
//! stream in this order can be restored or verified without buffering
//! sibling subtrees.

use crate::marshal::{MarshalError, MarshalReader, MarshalWriter};
use crate::metadata::FileMetadata;
use crate::path::RepoPath;

const KIND_ADD: u8 = 1;
const KIND_UPDATE: u8 = 2;
const KIND_DELETE: u8 = 3;
const KIND_MASK: u8 = 0x7F;
/// High bit of the kind byte: the entry is (or was, for deletes) a
/// directory. Deletes carry no metadata, so the bit is the only place
/// their directory-ness survives serialisation.
const FLAG_DIR: u8 = 0x80;

/// What a revision entry does to its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// The path appears; it was absent in the parent.
    Add,
    /// The path's metadata changed.
    Update,
    /// The path is removed.
    Delete,
}

/// One record in a revision's entry stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionEntry {
    /// The path this entry describes.
    pub path: RepoPath,
    /// Add, update, or delete.
    pub kind: EntryKind,
    /// Present for add and update; absent for delete.
    pub metadata: Option<FileMetadata>,
    dir: bool,
}

impl RevisionEntry {
    /// An add record.
    pub fn add(path: RepoPath, metadata: FileMetadata) -> Self {
        let dir = metadata.mode.is_dir();
        Self { path, kind: EntryKind::Add, metadata: Some(metadata), dir }
    }

    /// An update record.
    pub fn update(path: RepoPath, metadata: FileMetadata) -> Self {
        let dir = metadata.mode.is_dir();
        Self { path, kind: EntryKind::Update, metadata: Some(metadata), dir }
    }

    /// A delete record. `was_dir` preserves the deleted entry's form
    /// so it keeps the same canonical position as the entry it
    /// removes.
    pub fn delete(path: RepoPath, was_dir: bool) -> Self {
        Self { path, kind: EntryKind::Delete, metadata: None, dir: was_dir }
    }

    /// Whether this entry is (or was) a directory.
    pub fn is_dir(&self) -> bool {
        self.dir
    }

    /// The canonical sort key for this entry.
    pub fn sort_key(&self) -> Vec<u8> {
        canonical_key(&self.path, self.dir)
    }

    /// Compare two entries in canonical order.
    pub fn compare(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.sort_key().cmp(&b.sort_key())
    }

    /// Exact size of the marshalled form in bytes.
    pub fn marshalled_size(&self) -> usize {
        2 + self.path.as_str().len()
            + 1
            + self.metadata.as_ref().map_or(0, FileMetadata::marshalled_size)
    }

    /// Serialise as `path | kind | metadata`.
    pub fn marshal(&self, w: &mut MarshalWriter) {
        w.put_string(self.path.as_str());
        let mut kind = match self.kind {
            EntryKind::Add => KIND_ADD,
            EntryKind::Update => KIND_UPDATE,
            EntryKind::Delete => KIND_DELETE,
        };
        if self.dir {
            kind |= FLAG_DIR;
        }
        w.put_u8(kind);
        match (&self.kind, &self.metadata) {
            (EntryKind::Delete, None) => {}
            (_, Some(metadata)) => metadata.marshal(w),
            (_, None) => w.fail(MarshalError::Corrupt("add/update entry without metadata")),
        }
    }

    /// Parse one entry from the stream.
    pub fn unmarshal(r: &mut MarshalReader<'_>) -> Result<Self, MarshalError> {
        let path_text = r.string();
        let kind_byte = r.u8();
        r.status()?;
        let path = RepoPath::new(path_text)
            .map_err(|_| MarshalError::Corrupt("invalid path in entry"))?;
        let dir = kind_byte & FLAG_DIR != 0;
        match kind_byte & KIND_MASK {
            KIND_ADD | KIND_UPDATE => {
                let kind =
                    if kind_byte & KIND_MASK == KIND_ADD { EntryKind::Add } else { EntryKind::Update };
                let metadata = FileMetadata::unmarshal(r)?;
                if metadata.mode.is_dir() != dir {
                    return Err(MarshalError::Corrupt("entry dir flag contradicts metadata"));
                }
                Ok(Self { path, kind, metadata: Some(metadata), dir })
            }
            KIND_DELETE => Ok(Self { path, kind: EntryKind::Delete, metadata: None, dir }),
            _ => Err(MarshalError::Corrupt("unknown entry kind")),
        }
    }
}

/// Compute the canonical sort key for `path`.
///
/// Every `/` (including an implied leading one) becomes `/1`; for
/// non-directories the `1` after the last `/` becomes `0`. Byte-wise
/// comparison of the keys then yields the directory-aware order.
pub fn canonical_key(path: &RepoPath, is_dir: bool) -> Vec<u8> {
    let text = path.as_str().as_bytes();
    let mut key = Vec::with_capacity(text.len() * 2 + 2);
    key.push(b'/');
    key.push(b'1');
    for &b in text {
        if b == b'/' {
            key.push(b'/');
            key.push(b'1');
        } else {
            key.push(b);
        }
    }
    if !is_dir {
        let last_slash = key.iter().rposition(|&b| b == b'/').expect("key has a leading slash");
        key[last_slash + 1] = b'0';
    }
    key
}
