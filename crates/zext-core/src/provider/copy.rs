//! Buffered copy that observes cancellation between buffer cycles

use crate::cancel::CancellationToken;
use crate::error::StageError;
use std::io::{self, Read, Write};

/// Size of one read/write cycle
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Errors from the copy loop, kept apart so the caller can attribute reads
/// and writes to different paths.
#[derive(Debug)]
pub enum CopyError {
    Cancelled,
    Read(io::Error),
    Write(io::Error),
}

impl CopyError {
    /// Convert with the caller's read/write attribution
    pub fn into_stage_error<R, W>(self, on_read: R, on_write: W) -> StageError
    where
        R: FnOnce(io::Error) -> StageError,
        W: FnOnce(io::Error) -> StageError,
    {
        match self {
            CopyError::Cancelled => StageError::Cancelled,
            CopyError::Read(e) => on_read(e),
            CopyError::Write(e) => on_write(e),
        }
    }
}

/// Copy `reader` into `writer`, checking `cancel` before every buffer.
///
/// Returns the number of bytes copied.
pub fn copy_cancellable<R, W>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<u64, CopyError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
}

/// Reader adapter that fails with an `Other` error once `cancel` is set.
///
/// For APIs that drive the copy loop themselves. Callers check the token
/// after an error to tell cancellation from a real failure.
pub struct CancellableRead<'a, R> {
    inner: R,
    cancel: &'a CancellationToken,
}

impl<'a, R: Read> CancellableRead<'a, R> {
    pub fn new(inner: R, cancel: &'a CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancellableRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "operation cancelled"));
        }
        self.inner.read(buf)
    }
}
