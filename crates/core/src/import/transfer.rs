//! Moving downloaded files into the library.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use crate::config::TransferMode;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from {source} to {destination}")]
    CopyFailed {
        source: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to move file from {source} to {destination}")]
    MoveFailed {
        source: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl TransferError {
    fn copy_failed(source: &Path, destination: &Path, error: std::io::Error) -> Self {
        TransferError::CopyFailed {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Renamed,
    Copied,
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub method: TransferMethod,
    /// SHA-256 of the written file, when verification ran.
    pub checksum: Option<String>,
}

/// How a file is transferred.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub mode: TransferMode,
    pub verify_checksum: bool,
    pub buffer_size: usize,
}

/// Place `source` at `destination`, replacing any file already there.
///
/// Move mode renames when source and destination share a filesystem and
/// otherwise copies then deletes the source. Copy mode always copies and
/// leaves the source in place. Copies are written next to the destination
/// under a `.partial` name and renamed into place once complete, so a
/// failed copy never leaves a truncated library file.
pub async fn transfer_file(
    source: &Path,
    destination: &Path,
    options: &TransferOptions,
) -> Result<TransferResult, TransferError> {
    if fs::metadata(source).await.is_err() {
        return Err(TransferError::SourceNotFound {
            path: source.to_path_buf(),
        });
    }

    ensure_parent_dirs(destination).await?;

    if options.mode == TransferMode::Move {
        let renamed = try_atomic_move(source, destination)
            .await
            .map_err(|error| TransferError::MoveFailed {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
                error,
            })?;
        if renamed {
            let size_bytes = fs::metadata(destination)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            debug!(
                source = %source.display(),
                destination = %destination.display(),
                "File renamed into library"
            );
            return Ok(TransferResult {
                destination: destination.to_path_buf(),
                size_bytes,
                method: TransferMethod::Renamed,
                checksum: None,
            });
        }
        debug!(source = %source.display(), "Cross-device move, falling back to copy");
    }

    let result = copy_into_place(source, destination, options).await?;

    if options.mode == TransferMode::Move {
        if let Err(e) = fs::remove_file(source).await {
            warn!(path = %source.display(), error = %e, "Failed to remove source after copy");
        }
    }

    Ok(result)
}

async fn copy_into_place(
    source: &Path,
    destination: &Path,
    options: &TransferOptions,
) -> Result<TransferResult, TransferError> {
    let partial = partial_path(destination);

    let (size_bytes, source_checksum) =
        match copy_file(source, &partial, options.buffer_size, options.verify_checksum).await {
            Ok(copied) => copied,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

    let checksum = match source_checksum {
        Some(expected) => {
            let actual = match calculate_checksum(&partial, options.buffer_size).await {
                Ok(actual) => actual,
                Err(error) => {
                    let _ = fs::remove_file(&partial).await;
                    return Err(TransferError::copy_failed(source, destination, error));
                }
            };
            if actual != expected {
                let _ = fs::remove_file(&partial).await;
                return Err(TransferError::ChecksumMismatch {
                    path: destination.to_path_buf(),
                    expected,
                    actual,
                });
            }
            Some(actual)
        }
        None => None,
    };

    fs::rename(&partial, destination)
        .await
        .map_err(|e| TransferError::copy_failed(source, destination, e))?;

    debug!(
        source = %source.display(),
        destination = %destination.display(),
        size_bytes,
        "File copied into library"
    );

    Ok(TransferResult {
        destination: destination.to_path_buf(),
        size_bytes,
        method: TransferMethod::Copied,
        checksum,
    })
}

/// Attempts to move a file atomically (rename).
///
/// Returns `Ok(false)` when the rename crossed filesystems.
async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(true),
        Err(e) => {
            // EXDEV is 18 on Linux
            if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                Ok(false)
            } else {
                Err(e)
            }
        }
    }
}

/// Copies a file, hashing the bytes read when asked to.
async fn copy_file(
    source: &Path,
    destination: &Path,
    buffer_size: usize,
    calculate_checksum: bool,
) -> Result<(u64, Option<String>), TransferError> {
    let source_file = File::open(source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TransferError::SourceNotFound {
                path: source.to_path_buf(),
            }
        } else {
            TransferError::copy_failed(source, destination, e)
        }
    })?;

    let dest_file = File::create(destination)
        .await
        .map_err(|e| TransferError::copy_failed(source, destination, e))?;

    let mut reader = BufReader::with_capacity(buffer_size, source_file);
    let mut writer = BufWriter::with_capacity(buffer_size, dest_file);

    let mut hasher = if calculate_checksum {
        Some(Sha256::new())
    } else {
        None
    };

    let mut total_bytes = 0u64;
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| TransferError::copy_failed(source, destination, e))?;

        if bytes_read == 0 {
            break;
        }

        if let Some(ref mut h) = hasher {
            h.update(&buffer[..bytes_read]);
        }

        writer
            .write_all(&buffer[..bytes_read])
            .await
            .map_err(|e| TransferError::copy_failed(source, destination, e))?;

        total_bytes += bytes_read as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| TransferError::copy_failed(source, destination, e))?;

    let checksum = hasher.map(|h| format!("{:x}", h.finalize()));

    Ok((total_bytes, checksum))
}

/// SHA-256 of a file as lowercase hex.
pub async fn calculate_checksum(path: &Path, buffer_size: usize) -> Result<String, std::io::Error> {
    let file = File::open(path).await?;
    let mut reader = BufReader::with_capacity(buffer_size, file);
    let mut buffer = vec![0u8; buffer_size];
    let mut hasher = Sha256::new();

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

async fn ensure_parent_dirs(path: &Path) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| TransferError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}
