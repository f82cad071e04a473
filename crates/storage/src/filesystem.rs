//! File-based storage backend.
//!
//! Layout under the storage root:
//!
//! ```text
//! repository.txt          bootstrap config (restricted TOML dialect)
//! objects/<xx>/<xx>/<rest>  blocks, sharded by the first four hex
//!                           chars of the block id
//! refs/<name>             control files (e.g. the head ref)
//! locks/<name>.lock       advisory lock files
//! ```
//!
//! Every write lands in a `.incomplete` sibling first, is fsynced,
//! and is renamed into place; block files are immutable after the
//! rename.

use crate::lock::{CancelFlag, StorageLock};
use crate::{validate_name, ConfigFile, Storage, StorageError};
use cling_core::block::{BlockHeader, BlockId, BLOCK_HEADER_SIZE, MAX_BLOCK_SIZE};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE_NAME: &str = "repository.txt";
const OBJECTS_DIR: &str = "objects";
const LOCKS_DIR: &str = "locks";
const INCOMPLETE_EXT: &str = "incomplete";

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Bind to `root`. Nothing is touched until `init` or `open`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// The object path for a block id: two shard levels from the
    /// first four hex chars, then the rest of the hex as file name.
    fn block_path(&self, id: &BlockId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(OBJECTS_DIR).join(&hex[0..2]).join(&hex[2..4]).join(&hex[4..])
    }

    fn control_path(&self, section: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(section)?;
        validate_name(name)?;
        Ok(self.root.join(section).join(name))
    }

    /// Remove leftover `.incomplete` artifacts from interrupted
    /// writes. Returns how many were removed.
    pub fn cleanup_incomplete(&self) -> Result<usize, StorageError> {
        fn walk(dir: &Path, removed: &mut usize) -> std::io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    walk(&path, removed)?;
                } else if path.extension().is_some_and(|e| e == INCOMPLETE_EXT) {
                    fs::remove_file(&path)?;
                    *removed += 1;
                }
            }
            Ok(())
        }
        let mut removed = 0;
        let objects = self.root.join(OBJECTS_DIR);
        if objects.exists() {
            walk(&objects, &mut removed)
                .map_err(|e| StorageError::io("cleanup incomplete objects", e))?;
        }
        Ok(removed)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let parent = path.parent().expect("storage paths always have a parent");
        fs::create_dir_all(parent)
            .map_err(|e| StorageError::io(format!("create {}", parent.display()), e))?;
        let tmp = path.with_extension(INCOMPLETE_EXT);
        {
            let mut out = fs::File::create(&tmp)
                .map_err(|e| StorageError::io(format!("create {}", tmp.display()), e))?;
            out.write_all(data)
                .map_err(|e| StorageError::io(format!("write {}", tmp.display()), e))?;
            out.sync_all()
                .map_err(|e| StorageError::io(format!("sync {}", tmp.display()), e))?;
        }
        fs::rename(&tmp, path)
            .map_err(|e| StorageError::io(format!("rename into {}", path.display()), e))?;
        // Make the rename durable; failure to fsync the directory is
        // not fatal to the logical write.
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn load_block_bytes(&self, id: &BlockId) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.block_path(id)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::BlockNotFound(*id)),
            Err(e) => Err(StorageError::io(format!("read block {id}"), e)),
        }
    }
}

impl Storage for FileStorage {
    fn init(&self, config: &ConfigFile) -> Result<(), StorageError> {
        if self.config_path().exists() {
            return Err(StorageError::StorageAlreadyExists);
        }
        fs::create_dir_all(self.root.join(OBJECTS_DIR))
            .map_err(|e| StorageError::io("create objects dir", e))?;
        fs::create_dir_all(self.root.join(LOCKS_DIR))
            .map_err(|e| StorageError::io("create locks dir", e))?;
        self.write_atomic(&self.config_path(), config.render().as_bytes())?;
        debug!(root = %self.root.display(), "initialised file storage");
        Ok(())
    }

    fn open(&self) -> Result<ConfigFile, StorageError> {
        let text = match fs::read_to_string(self.config_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::StorageNotFound),
            Err(e) => return Err(StorageError::io("read config", e)),
        };
        ConfigFile::parse(&text)
    }

    fn update_config(&self, config: &ConfigFile) -> Result<(), StorageError> {
        if !self.config_path().exists() {
            return Err(StorageError::StorageNotFound);
        }
        self.write_atomic(&self.config_path(), config.render().as_bytes())
    }

    fn has_block(&self, id: &BlockId) -> Result<bool, StorageError> {
        Ok(self.block_path(id).exists())
    }

    fn write_block(&self, id: &BlockId, data: &[u8]) -> Result<bool, StorageError> {
        if data.len() < BLOCK_HEADER_SIZE || data.len() > MAX_BLOCK_SIZE {
            return Err(StorageError::Corrupt(format!(
                "block {id} has invalid size {}",
                data.len()
            )));
        }
        let path = self.block_path(id);
        if path.exists() {
            return Ok(true);
        }
        self.write_atomic(&path, data)?;
        debug!(block = %id, bytes = data.len(), "wrote block");
        Ok(false)
    }

    fn read_block(&self, id: &BlockId) -> Result<(BlockHeader, Vec<u8>), StorageError> {
        let data = self.load_block_bytes(id)?;
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(StorageError::Corrupt(format!("block {id} shorter than its header")));
        }
        let (head, payload) = data.split_at(BLOCK_HEADER_SIZE);
        let header = BlockHeader::unmarshal(head, *id)?;
        if payload.len() != header.encrypted_size as usize {
            return Err(StorageError::Corrupt(format!(
                "block {id}: file carries {} payload bytes, header says {}",
                payload.len(),
                header.encrypted_size
            )));
        }
        Ok((header, payload.to_vec()))
    }

    fn read_block_header(&self, id: &BlockId) -> Result<BlockHeader, StorageError> {
        let mut file = match fs::File::open(self.block_path(id)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::BlockNotFound(*id))
            }
            Err(e) => return Err(StorageError::io(format!("open block {id}"), e)),
        };
        let mut head = [0u8; BLOCK_HEADER_SIZE];
        file.read_exact(&mut head)
            .map_err(|e| StorageError::io(format!("read block header {id}"), e))?;
        Ok(BlockHeader::unmarshal(&head, *id)?)
    }

    fn has_control_file(&self, section: &str, name: &str) -> Result<bool, StorageError> {
        Ok(self.control_path(section, name)?.exists())
    }

    fn read_control_file(&self, section: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.control_path(section, name)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::ControlFileNotFound {
                section: section.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(StorageError::io(format!("read {section}/{name}"), e)),
        }
    }

    fn write_control_file(
        &self,
        section: &str,
        name: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.control_path(section, name)?;
        self.write_atomic(&path, data)
    }

    fn delete_control_file(&self, section: &str, name: &str) -> Result<(), StorageError> {
        let path = self.control_path(section, name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::ControlFileNotFound {
                section: section.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(StorageError::io(format!("delete {section}/{name}"), e)),
        }
    }

    fn lock(&self, name: &str, cancel: &CancelFlag) -> Result<StorageLock, StorageError> {
        validate_name(name)?;
        StorageLock::acquire(&self.root.join(LOCKS_DIR).join(format!("{name}.lock")), cancel)
    }
}
