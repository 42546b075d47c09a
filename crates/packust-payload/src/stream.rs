//! Position-tracked payload streams.
//!
//! Archive alignment is byte-exact, so every read and write goes through
//! a wrapper that tracks the stream position, loops until the full
//! buffer is transferred, and maps shortfalls to the I/O error kinds.
//! An optional digest bolt-on observes every byte that passes through.

use std::io::{Read, Write};

use packust_common::{Error, ErrorKind, Result};

use crate::digest::{DigestAlgo, DigestCtx};

/// Alignment of archive entry headers and payload data.
pub const ALIGNMENT: u64 = 4;

const fn align_gap(pos: u64, modulo: u64) -> u64 {
    (modulo - pos % modulo) % modulo
}

/// A reading payload stream.
#[derive(Debug)]
pub struct PayloadReader<R> {
    inner: R,
    pos: u64,
    digest: Option<DigestCtx>,
}

impl<R: Read> PayloadReader<R> {
    /// Wraps a byte source at position zero.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            digest: None,
        }
    }

    /// Current stream position in bytes.
    #[must_use]
    pub const fn pos(&self) -> u64 {
        self.pos
    }

    /// Attaches a digest that will observe all further reads.
    pub fn attach_digest(&mut self, algo: DigestAlgo) {
        self.digest = Some(DigestCtx::new(algo));
    }

    /// Detaches the digest and returns its hex result.
    pub fn take_digest(&mut self) -> Option<String> {
        self.digest.take().map(DigestCtx::finish)
    }

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` on any shortfall, with the OS error captured.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::new(ErrorKind::ReadFailed).with_source(e))?;
        self.pos += buf.len() as u64;
        if let Some(digest) = &mut self.digest {
            digest.update(buf);
        }
        Ok(())
    }

    /// Consumes exactly `amount` bytes without keeping them.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` on any shortfall.
    pub fn skip(&mut self, amount: u64) -> Result<()> {
        let mut scratch = [0u8; 8192];
        let mut left = amount;
        while left > 0 {
            let bite = usize::try_from(left.min(scratch.len() as u64)).unwrap_or(scratch.len());
            self.read_exact(&mut scratch[..bite])?;
            left -= bite as u64;
        }
        Ok(())
    }

    /// Consumes the zero fill up to the next alignment boundary.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` on any shortfall.
    pub fn align(&mut self, modulo: u64) -> Result<()> {
        self.skip(align_gap(self.pos, modulo))
    }
}

/// A writing payload stream.
#[derive(Debug)]
pub struct PayloadWriter<W> {
    inner: W,
    pos: u64,
    digest: Option<DigestCtx>,
}

impl<W: Write> PayloadWriter<W> {
    /// Wraps a byte sink at position zero.
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            pos: 0,
            digest: None,
        }
    }

    /// Current stream position in bytes.
    #[must_use]
    pub const fn pos(&self) -> u64 {
        self.pos
    }

    /// Attaches a digest that will observe all further writes.
    pub fn attach_digest(&mut self, algo: DigestAlgo) {
        self.digest = Some(DigestCtx::new(algo));
    }

    /// Detaches the digest and returns its hex result.
    pub fn take_digest(&mut self) -> Option<String> {
        self.digest.take().map(DigestCtx::finish)
    }

    /// Writes `buf` completely.
    ///
    /// # Errors
    ///
    /// Returns `WriteFailed` on any shortfall, with the OS error
    /// captured.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner
            .write_all(buf)
            .map_err(|e| Error::new(ErrorKind::WriteFailed).with_source(e))?;
        self.pos += buf.len() as u64;
        if let Some(digest) = &mut self.digest {
            digest.update(buf);
        }
        Ok(())
    }

    /// Emits the zero fill up to the next alignment boundary.
    ///
    /// # Errors
    ///
    /// Returns `WriteFailed` on any shortfall.
    pub fn pad(&mut self, modulo: u64) -> Result<()> {
        let gap = align_gap(self.pos, modulo);
        let zeros = [0u8; 8];
        self.write_all(&zeros[..usize::try_from(gap).unwrap_or(0)])
    }

    /// Flushes the underlying sink.
    ///
    /// # Errors
    ///
    /// Returns `WriteFailed` when the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.inner
            .flush()
            .map_err(|e| Error::new(ErrorKind::WriteFailed).with_source(e))
    }

    /// Consumes the wrapper, returning the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
