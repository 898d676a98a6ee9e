//! Store I/O engine.
//!
//! Moves bytes between a store file and the session's stdin/stdout in
//! bounded chunks. Both directions stop silently at `max_bytes`.
//!
//! Put is not atomic: the destination is truncated on open, and chunks that
//! passed the base64 check before a bad byte arrived stay on disk.

use crate::core::error::CommandError;
use crate::core::telemetry::errno_name;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    pub max_bytes: u64,
    pub chunk_size: usize,
    /// Per-chunk wait for put input.
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Input continued past the byte ceiling and the rest was dropped.
    pub truncated: bool,
    /// Hex SHA-256 of the bytes written.
    pub sha256: String,
}

/// A byte source that can say whether a read would make progress.
pub trait PollRead: Read {
    /// Wait up to `timeout` for input (or end of input). `Ok(false)` means
    /// nothing happened in time.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;
}

fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    loop {
        // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and nfds is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        // POLLHUP and POLLERR count as ready: the next read reports them.
        return Ok(rc > 0);
    }
}

/// Unbuffered descriptors only. `Stdin` buffers internally, and data sitting
/// in that buffer is invisible to `poll` on the descriptor.
impl PollRead for File {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        poll_readable(self.as_raw_fd(), timeout)
    }
}

impl PollRead for &[u8] {
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

impl<T: AsRef<[u8]>> PollRead for io::Cursor<T> {
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }
}

/// `A-Z a-z 0-9 + / =` and newline.
pub fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'\n')
}

fn read_retrying<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Whether a source at the ceiling still has a byte to give. A reader that
/// ends exactly at the ceiling was not cut short.
fn has_more<R: Read + ?Sized>(reader: &mut R) -> io::Result<bool> {
    let mut extra = [0u8; 1];
    Ok(read_retrying(reader, &mut extra)? > 0)
}

fn chunk_len(limits: &TransferLimits, done: u64) -> usize {
    let remaining = limits.max_bytes.saturating_sub(done);
    usize::try_from(remaining).map_or(limits.chunk_size, |r| r.min(limits.chunk_size))
}

/// Copy the store file at `path` to `sink`.
///
/// A store that cannot be opened, missing or otherwise, is an empty success so
/// callers cannot probe which stores exist.
pub fn stream_get<W: Write + ?Sized>(
    path: &Path,
    sink: &mut W,
    limits: &TransferLimits,
) -> Result<TransferResult, CommandError> {
    let mut hasher = Sha256::new();
    let mut result = TransferResult {
        bytes_read: 0,
        bytes_written: 0,
        truncated: false,
        sha256: String::new(),
    };

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            if e.kind() == io::ErrorKind::NotFound {
                tracing::debug!("Could not open store: {}", path.display());
            } else {
                tracing::warn!("[{}] Could not open store: {}", errno_name(&e), path.display());
            }
            result.sha256 = format!("{:x}", hasher.finalize());
            return Ok(result);
        }
    };

    let mut buf = vec![0u8; limits.chunk_size];
    loop {
        let want = chunk_len(limits, result.bytes_written);
        if want == 0 {
            result.truncated = has_more(&mut file)
                .map_err(|e| CommandError::io(format!("read {}", path.display()), e))?;
            if result.truncated {
                tracing::warn!("Hit read limit for: {}", path.display());
            }
            break;
        }
        let n = read_retrying(&mut file, &mut buf[..want])
            .map_err(|e| CommandError::io(format!("read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        result.bytes_read += n as u64;
        sink.write_all(&buf[..n])
            .map_err(|e| CommandError::io("write output", e))?;
        hasher.update(&buf[..n]);
        result.bytes_written += n as u64;
    }
    sink.flush().map_err(|e| CommandError::io("flush output", e))?;

    result.sha256 = format!("{:x}", hasher.finalize());
    Ok(result)
}

/// Replace the store file at `path` with base64 text read from `source`.
pub fn stream_put<R: PollRead + ?Sized>(
    source: &mut R,
    path: &Path,
    limits: &TransferLimits,
) -> Result<TransferResult, CommandError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| CommandError::io(format!("open {} for writing", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut result = TransferResult {
        bytes_read: 0,
        bytes_written: 0,
        truncated: false,
        sha256: String::new(),
    };

    let mut buf = vec![0u8; limits.chunk_size];
    loop {
        let want = chunk_len(limits, result.bytes_read);
        if want == 0 {
            let pending = source
                .wait_readable(limits.read_timeout)
                .map_err(|e| CommandError::io("poll input", e))?;
            result.truncated =
                pending && has_more(source).map_err(|e| CommandError::io("read input", e))?;
            if result.truncated {
                tracing::warn!("Hit write limit for: {}", path.display());
            }
            break;
        }
        let ready = source
            .wait_readable(limits.read_timeout)
            .map_err(|e| CommandError::io("poll input", e))?;
        if !ready {
            tracing::debug!("Input not readable within {:?}", limits.read_timeout);
            break;
        }
        let n = read_retrying(source, &mut buf[..want])
            .map_err(|e| CommandError::io("read input", e))?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        if let Some(pos) = chunk.iter().position(|b| !is_base64_byte(*b)) {
            let offset = result.bytes_read + pos as u64;
            tracing::warn!("Found non-b64 characters in input at offset {}", offset);
            return Err(CommandError::InvalidEncoding {
                offset,
                byte: chunk[pos],
            });
        }
        result.bytes_read += n as u64;
        file.write_all(chunk)
            .map_err(|e| CommandError::io(format!("write {}", path.display()), e))?;
        hasher.update(chunk);
        result.bytes_written += n as u64;
    }
    file.flush()
        .map_err(|e| CommandError::io(format!("flush {}", path.display()), e))?;

    result.sha256 = format!("{:x}", hasher.finalize());
    Ok(result)
}
