//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::image::{self, HEADER_LEN};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// The image lives in a single file. Stores write a sibling `.tmp` file,
/// sync it, and rename it over the image, so a crash leaves either the old
/// or the new image. A sibling `.lock` file carries the cross-process
/// writer lock.
///
/// Opening a backend does not create the file; the first `store` does.
///
/// # Example
///
/// ```no_run
/// use harealm_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("default.realm")).unwrap();
/// let image = backend.load().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    writer_lock: Mutex<Option<File>>,
}

impl FileBackend {
    /// Opens a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exists but is a directory.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if path.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("path is a directory: {}", path.display()),
            )
            .into());
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer_lock: Mutex::new(None),
        })
    }

    /// Returns the path to the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if an image file exists and is non-empty.
    #[must_use]
    pub fn exists(&self) -> bool {
        fs::metadata(&self.path).map_or(false, |m| m.len() > 0)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl StorageBackend for FileBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&mut self, image: &[u8]) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = self.sibling(".tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(image)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn stamp(&self) -> StorageResult<u64> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut header = Vec::with_capacity(HEADER_LEN);
        Read::by_ref(&mut file)
            .take(HEADER_LEN as u64)
            .read_to_end(&mut header)?;
        if header.is_empty() {
            return Ok(0);
        }
        image::read_stamp(&header)
    }

    fn size(&self) -> StorageResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn lock_writer(&self) -> StorageResult<()> {
        let lock_path = self.sibling(".lock");
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        // Blocks while another process is writing.
        file.lock_exclusive()?;
        *self.writer_lock.lock() = Some(file);
        Ok(())
    }

    fn unlock_writer(&self) {
        // Closing the handle releases the lock.
        self.writer_lock.lock().take();
    }
}
