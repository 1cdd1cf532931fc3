// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;

use crate::storage::{StorageResult, TracedStorageError};

/// A scoped read handle on one file of a part.
pub enum PartReadableFile {
    /// Buffered reads on a local file.
    Local(BufReader<File>),
    /// An in-memory file.
    InMemory(bytes::buf::Reader<Bytes>),
}

impl Read for PartReadableFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Local(file) => file.read(buf),
            Self::InMemory(file) => file.read(buf),
        }
    }
}

/// The storage location of a single part. Paths are relative to the part directory.
///
/// Files below this interface are byte-exact; no transformation happens here.
pub trait PartStorage: Send + Sync {
    /// Human readable location of the part, used in error messages.
    fn full_path(&self) -> String;

    fn exists(&self, name: &str) -> bool;

    fn file_size(&self, name: &str) -> StorageResult<u64>;

    fn read_file(&self, name: &str) -> StorageResult<PartReadableFile>;

    /// Names of all files of the part, sorted.
    fn list_files(&self) -> StorageResult<Vec<String>>;

    /// Create a new file. Fails if the file already exists.
    fn write_file(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Remove the part and everything in it.
    fn remove_recursive(&self) -> StorageResult<()>;

    fn is_stored_on_remote_disk(&self) -> bool {
        false
    }

    fn supports_zero_copy_replication(&self) -> bool {
        false
    }

    fn read_all(&self, name: &str) -> StorageResult<Vec<u8>> {
        let mut data = vec![];
        self.read_file(name)?.read_to_end(&mut data)?;
        Ok(data)
    }
}

pub type PartStorageRef = Arc<dyn PartStorage>;

/// A part stored in a directory of the local file system.
#[derive(Debug, Clone)]
pub struct LocalPartStorage {
    directory: PathBuf,
}

impl LocalPartStorage {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Create the part directory, which must not exist yet.
    pub fn create(directory: impl AsRef<Path>) -> StorageResult<Self> {
        std::fs::create_dir(directory.as_ref())?;
        Ok(Self::new(directory))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

impl PartStorage for LocalPartStorage {
    fn full_path(&self) -> String {
        self.directory.display().to_string()
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn file_size(&self, name: &str) -> StorageResult<u64> {
        Ok(std::fs::metadata(self.path_of(name))?.len())
    }

    fn read_file(&self, name: &str) -> StorageResult<PartReadableFile> {
        let file = File::open(self.path_of(name))?;
        Ok(PartReadableFile::Local(BufReader::new(file)))
    }

    fn list_files(&self) -> StorageResult<Vec<String>> {
        let mut names = vec![];
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn write_file(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path_of(name))?;

        let mut writer = BufWriter::new(file);
        writer.write_all(data)?;
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|err| TracedStorageError::from(err.into_error()))?;
        file.sync_data()?;
        Ok(())
    }

    fn remove_recursive(&self) -> StorageResult<()> {
        std::fs::remove_dir_all(&self.directory)?;
        Ok(())
    }
}

/// A part kept entirely in memory. Clones share the same files.
#[derive(Clone, Default)]
pub struct InMemoryPartStorage {
    path: String,
    files: Arc<Mutex<BTreeMap<String, Bytes>>>,
    remote: bool,
    zero_copy: bool,
}

impl InMemoryPartStorage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Report the part as living on a remote disk, optionally with zero-copy replication.
    pub fn with_remote(mut self, zero_copy: bool) -> Self {
        self.remote = true;
        self.zero_copy = zero_copy;
        self
    }

    /// Insert or replace a file.
    pub fn put(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.files.lock().insert(name.into(), data.into());
    }

    pub fn remove(&self, name: &str) -> Option<Bytes> {
        self.files.lock().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.lock().get(name).cloned()
    }

    fn get_or_missing(&self, name: &str) -> StorageResult<Bytes> {
        self.get(name).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}/{} does not exist", self.path, name),
            )
            .into()
        })
    }
}

impl PartStorage for InMemoryPartStorage {
    fn full_path(&self) -> String {
        self.path.clone()
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn file_size(&self, name: &str) -> StorageResult<u64> {
        Ok(self.get_or_missing(name)?.len() as u64)
    }

    fn read_file(&self, name: &str) -> StorageResult<PartReadableFile> {
        Ok(PartReadableFile::InMemory(self.get_or_missing(name)?.reader()))
    }

    fn list_files(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    fn write_file(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let mut files = self.files.lock();
        if files.contains_key(name) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{}/{} already exists", self.path, name),
            )
            .into());
        }
        files.insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn remove_recursive(&self) -> StorageResult<()> {
        self.files.lock().clear();
        Ok(())
    }

    fn is_stored_on_remote_disk(&self) -> bool {
        self.remote
    }

    fn supports_zero_copy_replication(&self) -> bool {
        self.zero_copy
    }
}
