use crate::error::{Result, ScrapeError};
use log::{debug, error, info};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const SCAN_CHUNK: usize = 4096;

/// How a temp file reaches its final location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Atomic rename, source path disappears
    Rename,
    /// Byte copy, source is left in place
    Copy,
}

/// Append-only file whose mutating operations are serialized by a mutex
///
/// The mutex guards the current path, which moves when the file is renamed.
#[derive(Debug)]
pub struct TempFile {
    path: Mutex<PathBuf>,
}

impl TempFile {
    /// Wrap an existing file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(path.into()),
        }
    }

    /// Create an empty, uniquely named file in `dir`
    pub fn create_in(dir: &Path, prefix: &str) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".json")
            .tempfile_in(dir)?
            .into_temp_path()
            .keep()
            .map_err(io::Error::from)?;

        debug!("Created temporary file {:?}", path);
        Ok(Self::new(path))
    }

    /// Current path of the backing file
    pub async fn path(&self) -> Result<PathBuf> {
        let path = self.path.lock().await;
        ensure_created(&path).await?;
        Ok(path.clone())
    }

    /// Append UTF-8 text
    ///
    /// I/O failures are logged and swallowed so one bad write does not end a
    /// run. Appending to a file that does not exist is an error.
    pub async fn append(&self, content: &str) -> Result<()> {
        let path = self.path.lock().await;
        ensure_created(&path).await?;

        if let Err(e) = append_bytes(&path, content.as_bytes()).await {
            error!("Error writing to temporary file {:?}: {}", path, e);
        }

        Ok(())
    }

    /// Append the whole content of `source`, returning the bytes copied
    ///
    /// Both locks are held for the copy. They are taken in address order, so
    /// concurrent appends between the same two files in opposite directions
    /// cannot deadlock.
    pub async fn append_file(&self, source: &TempFile) -> Result<u64> {
        if std::ptr::eq(self, source) {
            return Err(ScrapeError::InvalidArgument(
                "cannot append a temporary file to itself".to_string(),
            ));
        }

        let (source_path, path) = if (source as *const TempFile) < (self as *const TempFile) {
            let source_path = source.path.lock().await;
            (source_path, self.path.lock().await)
        } else {
            let path = self.path.lock().await;
            (source.path.lock().await, path)
        };
        ensure_created(&source_path).await?;
        ensure_created(&path).await?;

        let mut reader = File::open(&*source_path).await?;
        let mut writer = OpenOptions::new().append(true).open(&*path).await?;
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;

        debug!("Appended {} bytes from {:?} to {:?}", copied, source_path, path);
        Ok(copied)
    }

    /// Remove the last line and return it trimmed
    ///
    /// The newline ending the line before it is kept, so everything before the
    /// popped line is left byte-identical. Returns `None` for an empty file.
    pub async fn pop_last_line(&self) -> Result<Option<String>> {
        let path = self.path.lock().await;
        ensure_created(&path).await?;

        let mut file = OpenOptions::new().read(true).write(true).open(&*path).await?;
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(None);
        }

        let cut = last_line_start(&mut file, len).await?;

        file.seek(SeekFrom::Start(cut)).await?;
        let mut line = Vec::with_capacity((len - cut) as usize);
        file.read_to_end(&mut line).await?;

        file.set_len(cut).await?;
        file.flush().await?;

        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    }

    /// Move the file to `destination`, copying when it lives on another device
    pub async fn rename_or_copy(&self, destination: &Path) -> Result<Placement> {
        let mut path = self.path.lock().await;
        ensure_created(&path).await?;

        let dir = parent_dir(destination);
        fs::create_dir_all(&dir).await?;

        let placement = placement_for(&path, &dir).await?;
        place_locked(&mut path, destination, placement).await?;

        Ok(placement)
    }

    /// Move the file to `destination` with an explicit strategy
    pub async fn place(&self, destination: &Path, placement: Placement) -> Result<()> {
        let mut path = self.path.lock().await;
        ensure_created(&path).await?;
        fs::create_dir_all(parent_dir(destination)).await?;

        place_locked(&mut path, destination, placement).await
    }

    /// Copy the file to `destination`, leaving this instance where it is
    pub async fn copy(&self, destination: &Path) -> Result<()> {
        let path = self.path.lock().await;
        ensure_created(&path).await?;
        copy_unlocked(&path, destination).await
    }
}

async fn ensure_created(path: &Path) -> Result<()> {
    if fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(ScrapeError::TempFileNotCreated(path.to_path_buf()))
    }
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Offset where the last line starts, ignoring the file's final byte
async fn last_line_start(file: &mut File, len: u64) -> io::Result<u64> {
    let mut end = len - 1;
    let mut buf = vec![0u8; SCAN_CHUNK];

    while end > 0 {
        let start = end.saturating_sub(SCAN_CHUNK as u64);
        let size = (end - start) as usize;

        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf[..size]).await?;

        if let Some(i) = buf[..size].iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }

    Ok(0)
}

#[cfg(unix)]
async fn placement_for(source: &Path, destination_dir: &Path) -> Result<Placement> {
    use std::os::unix::fs::MetadataExt;

    let source_dev = fs::metadata(source).await?.dev();
    let destination_dev = fs::metadata(destination_dir).await?.dev();

    Ok(placement_between(source_dev, destination_dev))
}

/// Rename within one device, copy across devices
fn placement_between(source_dev: u64, destination_dev: u64) -> Placement {
    if source_dev == destination_dev {
        Placement::Rename
    } else {
        Placement::Copy
    }
}

#[cfg(not(unix))]
async fn placement_for(_source: &Path, _destination_dir: &Path) -> Result<Placement> {
    Ok(Placement::Rename)
}

async fn place_locked(path: &mut PathBuf, destination: &Path, placement: Placement) -> Result<()> {
    match placement {
        Placement::Rename => fs::rename(&*path, destination).await?,
        Placement::Copy => copy_unlocked(path, destination).await?,
    }

    info!("Placed {:?} at {:?} ({:?})", path, destination, placement);
    *path = destination.to_path_buf();
    Ok(())
}

async fn copy_unlocked(source: &Path, destination: &Path) -> Result<()> {
    ensure_created(source).await?;
    fs::create_dir_all(parent_dir(destination)).await?;
    fs::copy(source, destination).await?;
    Ok(())
}
