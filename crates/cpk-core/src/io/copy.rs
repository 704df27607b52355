//! Chunked copies with a size cap and cooperative cancellation, plus the
//! bookkeeping file copies done after an install.

use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::PackError;

/// Bytes moved per chunk between cancellation checks.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Why a bounded copy stopped early.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Cancellation was requested between chunks.
    #[error("terminated by user")]
    Cancelled,

    /// More than `limit` bytes were offered.
    #[error("exceeds the {limit} byte limit")]
    TooLarge {
        /// Configured maximum.
        limit: u64,
    },

    /// Read or write failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Copy `reader` into `writer` in [`CHUNK_SIZE`] chunks, refusing to write
/// more than `limit` bytes and stopping as soon as `cancel` fires.
pub fn copy_bounded<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    limit: u64,
    cancel: &CancellationToken,
) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        written += n as u64;
        if written > limit {
            return Err(CopyError::TooLarge { limit });
        }
        writer.write_all(&buf[..n])?;
    }
    writer.flush()?;
    Ok(written)
}

/// Copy one file, creating the destination's parent directories.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), PackError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PackError::io(format!("creating {}", parent.display()), e))?;
    }
    std::fs::copy(src, dst).map_err(|e| {
        PackError::io(
            format!("copying {} to {}", src.display(), dst.display()),
            e,
        )
    })?;
    tracing::debug!(from = %src.display(), to = %dst.display(), "copied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_within_limit() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 11];
        let mut out = Vec::new();
        let n = copy_bounded(&mut data.as_slice(), &mut out, 1 << 20, &CancellationToken::new())
            .unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn test_copy_over_limit() {
        let data = vec![0u8; 100];
        let mut out = Vec::new();
        let err = copy_bounded(&mut data.as_slice(), &mut out, 99, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, CopyError::TooLarge { limit: 99 }));
    }

    #[test]
    fn test_copy_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let mut out = Vec::new();
        let err = copy_bounded(&mut [1u8, 2, 3].as_slice(), &mut out, 10, &token).unwrap_err();
        assert!(matches!(err, CopyError::Cancelled));
        assert!(out.is_empty());
    }

    #[test]
    fn test_copy_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "hello").unwrap();
        let dst = dir.path().join("x").join("y").join("b.txt");
        copy_file(&src, &dst).unwrap();
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "hello");
    }
}
