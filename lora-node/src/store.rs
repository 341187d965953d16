//! Non-volatile byte stores holding the node configuration.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Value of an erased (never written) byte.
pub const ERASED: u8 = 0xFF;

/// Byte-addressed non-volatile memory, EEPROM style.
pub trait NvStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError>;
    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError>;

    fn capacity(&self) -> usize;
}

/// Store kept in memory, for tests and volatile setups.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    /// A fully erased store of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![ERASED; capacity],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl NvStore for MemoryStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(StoreError::OutOfBounds {
                offset,
                capacity: self.bytes.len(),
            })
    }

    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError> {
        let capacity = self.bytes.len();
        let byte = self
            .bytes
            .get_mut(offset)
            .ok_or(StoreError::OutOfBounds { offset, capacity })?;
        *byte = value;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

/// Store backed by a byte image on disk. Every write is flushed to the file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    image: MemoryStore,
}

impl FileStore {
    /// Opens the image at `path`, creating an erased one of `capacity` bytes
    /// if it does not exist. A shorter image is extended with erased bytes.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut image = MemoryStore::new(capacity);
        match fs::read(&path) {
            Ok(bytes) => {
                let len = bytes.len().min(capacity);
                image.bytes[..len].copy_from_slice(&bytes[..len]);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::write(&path, image.as_bytes())?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Self { path, image })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NvStore for FileStore {
    fn read(&self, offset: usize) -> Result<u8, StoreError> {
        self.image.read(offset)
    }

    fn write(&mut self, offset: usize, value: u8) -> Result<(), StoreError> {
        self.image.write(offset, value)?;
        fs::write(&self.path, self.image.as_bytes())?;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.image.capacity()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Offset {} is outside the store ({} bytes).", .offset, .capacity)]
    OutOfBounds { offset: usize, capacity: usize },

    #[error("Underlying I/O Error.")]
    IoError(#[from] io::Error),
}
