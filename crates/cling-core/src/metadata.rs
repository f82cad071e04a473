//! File metadata: mode bitfield, timestamps, content hash, and the
//! block list backing a file's content.

use crate::block::BlockId;
use crate::marshal::{MarshalError, MarshalReader, MarshalWriter};

/// Version tag leading every marshalled [`FileMetadata`].
pub const METADATA_VERSION: u16 = 1;

/// Sentinel for an absent uid or gid.
pub const OWNER_ABSENT: u32 = u32::MAX;
/// Sentinel for an absent birthtime.
pub const BIRTHTIME_ABSENT: i64 = -1;

/// Mode and permission bits, independent of any OS encoding.
///
/// The low 9 bits are the POSIX permission; the upper bits flag entry
/// type and the set-id/sticky modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeAndPerm(pub u32);

impl ModeAndPerm {
    /// Directory flag.
    pub const DIR: u32 = 1 << 31;
    /// Symlink flag.
    pub const SYMLINK: u32 = 1 << 30;
    /// Setuid flag.
    pub const SETUID: u32 = 1 << 29;
    /// Setgid flag.
    pub const SETGID: u32 = 1 << 28;
    /// Sticky flag.
    pub const STICKY: u32 = 1 << 27;

    /// A directory with the given permission bits.
    pub fn dir(perm: u32) -> Self {
        Self(Self::DIR | (perm & 0o777))
    }

    /// A regular file with the given permission bits.
    pub fn file(perm: u32) -> Self {
        Self(perm & 0o777)
    }

    /// A symlink with the given permission bits.
    pub fn symlink(perm: u32) -> Self {
        Self(Self::SYMLINK | (perm & 0o777))
    }

    /// True for directories.
    pub fn is_dir(self) -> bool {
        self.0 & Self::DIR != 0
    }

    /// True for symlinks.
    pub fn is_symlink(self) -> bool {
        self.0 & Self::SYMLINK != 0
    }

    /// The POSIX permission bits.
    pub fn perm(self) -> u32 {
        self.0 & 0o777
    }
}

/// Which restorable attributes participate in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeMask {
    /// Compare mode and permission bits.
    pub mode: bool,
    /// Compare modification time.
    pub mtime: bool,
    /// Compare uid and gid.
    pub ownership: bool,
}

impl AttributeMask {
    /// Compare everything restorable.
    pub const ALL: Self = Self { mode: true, mtime: true, ownership: true };
}

/// Metadata recorded for every live path in a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Mode and permission bits.
    pub mode: ModeAndPerm,
    /// Modification time, seconds since the epoch.
    pub mtime_sec: i64,
    /// Modification time, nanosecond part.
    pub mtime_nsec: i32,
    /// Content size in bytes.
    pub size: u64,
    /// SHA-256 of the file content; all-zero for directories.
    pub file_hash: [u8; 32],
    /// Content blocks, in file order.
    pub block_ids: Vec<BlockId>,
    /// Symlink target; empty for other kinds.
    pub symlink_target: String,
    /// Owning uid, or [`OWNER_ABSENT`].
    pub uid: u32,
    /// Owning gid, or [`OWNER_ABSENT`].
    pub gid: u32,
    /// Birth time seconds, or [`BIRTHTIME_ABSENT`].
    pub birthtime_sec: i64,
    /// Birth time nanosecond part; 0 when absent.
    pub birthtime_nsec: i32,
}

impl FileMetadata {
    /// Metadata for a directory that was never scanned from disk
    /// (synthetic ancestors created during a commit).
    pub fn synthetic_dir(mtime_sec: i64, mtime_nsec: i32) -> Self {
        Self {
            mode: ModeAndPerm::dir(0o700),
            mtime_sec,
            mtime_nsec,
            size: 0,
            file_hash: [0u8; 32],
            block_ids: Vec::new(),
            symlink_target: String::new(),
            uid: OWNER_ABSENT,
            gid: OWNER_ABSENT,
            birthtime_sec: BIRTHTIME_ABSENT,
            birthtime_nsec: 0,
        }
    }

    /// Restricted equality over the attributes a restore can
    /// reproduce. Birthtime and the block list never participate;
    /// mode, mtime, and ownership participate per `mask`.
    pub fn restorable_eq(&self, other: &Self, mask: AttributeMask) -> bool {
        if self.size != other.size
            || self.file_hash != other.file_hash
            || self.symlink_target != other.symlink_target
        {
            return false;
        }
        if mask.mode && self.mode != other.mode {
            return false;
        }
        if mask.mtime && (self.mtime_sec, self.mtime_nsec) != (other.mtime_sec, other.mtime_nsec) {
            return false;
        }
        if mask.ownership && (self.uid, self.gid) != (other.uid, other.gid) {
            return false;
        }
        true
    }

    /// Exact size of the marshalled form in bytes.
    pub fn marshalled_size(&self) -> usize {
        84 + 32 * self.block_ids.len() + self.symlink_target.len()
    }

    /// Serialise in the fixed field order, led by the version tag.
    pub fn marshal(&self, w: &mut MarshalWriter) {
        w.put_u16(METADATA_VERSION);
        w.put_u32(self.mode.0);
        w.put_i64(self.mtime_sec);
        w.put_i32(self.mtime_nsec);
        w.put_u64(self.size);
        w.put_raw(&self.file_hash);
        w.put_u32(self.block_ids.len() as u32);
        for id in &self.block_ids {
            w.put_raw(&id.0);
        }
        w.put_string(&self.symlink_target);
        w.put_u32(self.uid);
        w.put_u32(self.gid);
        w.put_i64(self.birthtime_sec);
        w.put_i32(self.birthtime_nsec);
    }

    /// Parse the fixed field order; a version tag mismatch is fatal.
    pub fn unmarshal(r: &mut MarshalReader<'_>) -> Result<Self, MarshalError> {
        let version = r.u16();
        r.status()?;
        if version != METADATA_VERSION {
            return Err(MarshalError::UnsupportedVersion {
                found: version,
                expected: METADATA_VERSION,
            });
        }
        let mode = ModeAndPerm(r.u32());
        let mtime_sec = r.i64();
        let mtime_nsec = r.i32();
        let size = r.u64();
        let file_hash: [u8; 32] = r.array();
        let block_count = r.u32() as usize;
        let mut block_ids = Vec::with_capacity(block_count.min(1024));
        for _ in 0..block_count {
            block_ids.push(BlockId(r.array()));
            r.status()?;
        }
        let symlink_target = r.string();
        let uid = r.u32();
        let gid = r.u32();
        let birthtime_sec = r.i64();
        let birthtime_nsec = r.i32();
        r.status()?;
        Ok(Self {
            mode,
            mtime_sec,
            mtime_nsec,
            size,
            file_hash,
            block_ids,
            symlink_target,
            uid,
            gid,
            birthtime_sec,
            birthtime_nsec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileMetadata {
        FileMetadata {
            mode: ModeAndPerm::file(0o644),
            mtime_sec: 1_700_000_000,
            mtime_nsec: 123_456_789,
            size: 42,
            file_hash: [0xCD; 32],
            block_ids: vec![BlockId([1u8; 32]), BlockId([2u8; 32])],
            symlink_target: String::new(),
            uid: 1000,
            gid: 1000,
            birthtime_sec: 1_600_000_000,
            birthtime_nsec: 7,
        }
    }

    #[test]
    fn mode_flags() {
        let d = ModeAndPerm::dir(0o755);
        assert!(d.is_dir());
        assert!(!d.is_symlink());
        assert_eq!(d.perm(), 0o755);

        let l = ModeAndPerm::symlink(0o777);
        assert!(l.is_symlink());
        assert!(!l.is_dir());

        let s = ModeAndPerm(ModeAndPerm::SETUID | 0o755);
        assert_eq!(s.perm(), 0o755);
        assert!(!s.is_dir());
    }

    #[test]
    fn round_trip() {
        let m = sample();
        let mut w = MarshalWriter::new();
        m.marshal(&mut w);
        let buf = w.finish().unwrap();
        assert_eq!(buf.len(), m.marshalled_size());

        let mut r = MarshalReader::new(&buf);
        let parsed = FileMetadata::unmarshal(&mut r).unwrap();
        assert_eq!(parsed, m);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let m = sample();
        let mut w = MarshalWriter::new();
        m.marshal(&mut w);
        let mut buf = w.finish().unwrap();
        buf[0] = 9;
        let mut r = MarshalReader::new(&buf);
        assert!(matches!(
            FileMetadata::unmarshal(&mut r),
            Err(MarshalError::UnsupportedVersion { found: 9, expected: 1 })
        ));
    }

    #[test]
    fn truncated_input_is_fatal() {
        let m = sample();
        let mut w = MarshalWriter::new();
        m.marshal(&mut w);
        let buf = w.finish().unwrap();
        let mut r = MarshalReader::new(&buf[..buf.len() - 3]);
        assert!(FileMetadata::unmarshal(&mut r).is_err());
    }

    #[test]
    fn restorable_equality_masks() {
        let a = sample();
        let mut b = a.clone();
        b.birthtime_sec = BIRTHTIME_ABSENT;
        b.block_ids = Vec::new();
        // Birthtime and block list never participate.
        assert!(a.restorable_eq(&b, AttributeMask::ALL));

        let mut c = a.clone();
        c.mode = ModeAndPerm::file(0o600);
        assert!(!a.restorable_eq(&c, AttributeMask::ALL));
        assert!(a.restorable_eq(&c, AttributeMask { mode: false, mtime: true, ownership: true }));

        let mut d = a.clone();
        d.uid = OWNER_ABSENT;
        assert!(!a.restorable_eq(&d, AttributeMask::ALL));
        assert!(a.restorable_eq(&d, AttributeMask { mode: true, mtime: true, ownership: false }));

        let mut e = a.clone();
        e.size = 43;
        // Size always participates.
        assert!(!a.restorable_eq(&e, AttributeMask { mode: false, mtime: false, ownership: false }));
    }

    #[test]
    fn synthetic_dir_shape() {
        let d = FileMetadata::synthetic_dir(100, 5);
        assert!(d.mode.is_dir());
        assert_eq!(d.mode.perm(), 0o700);
        assert_eq!(d.file_hash, [0u8; 32]);
        assert!(d.block_ids.is_empty());
        assert_eq!(d.uid, OWNER_ABSENT);
        assert_eq!(d.birthtime_sec, BIRTHTIME_ABSENT);
    }
}
