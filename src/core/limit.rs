//! # Bounded Reader
//!
//! [`LimitedReader`] enforces a hard byte budget on an underlying source,
//! independent of anything the sender claims about its payload size.
//!
//! The budget is re-armable. The framing layer first arms it with the
//! ceiling of a varint prefix, decodes the declared length, and only then
//! re-arms it with the read budget derived from policy and codec.
//!
//! Once the budget is spent, the next read checks the source for a single
//! byte: a clean end of stream is passed through as EOF, anything else fails
//! with [`ProtocolError::ReadBudgetExceeded`].
//!
//! [`DeclaredLengthReader`] sits on the decoded side of a codec and fails with
//! [`ProtocolError::PayloadTooLong`] when the decoder yields more bytes than
//! the peer declared.

use crate::error::ProtocolError;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Reader wrapper with a mutable remaining-byte budget.
#[derive(Debug)]
pub struct LimitedReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
}

impl<R> LimitedReader<R> {
    /// Wrap `inner`, allowing at most `limit` bytes to be read.
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }

    /// Re-arm the budget. Bytes already read do not count against `limit`.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
        self.remaining = limit;
    }

    /// The budget most recently armed.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bytes that may still be read before the budget is exhausted.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.remaining == 0 {
            let mut next = [0u8; 1];
            let mut next_buf = ReadBuf::new(&mut next);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut next_buf))?;
            if next_buf.filled().is_empty() {
                return Poll::Ready(Ok(()));
            }
            return Poll::Ready(Err(ProtocolError::ReadBudgetExceeded(this.limit)
                .into_io(io::ErrorKind::InvalidData)));
        }

        let max = buf
            .remaining()
            .min(usize::try_from(this.remaining).unwrap_or(usize::MAX));
        let dst = buf.initialize_unfilled_to(max);
        let mut limited = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.advance(n);
        this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

/// Passes through exactly `declared` decoded bytes. A read past them that
/// finds more data fails instead of dropping it.
#[derive(Debug)]
pub struct DeclaredLengthReader<R> {
    inner: R,
    declared: u64,
    remaining: u64,
}

impl<R> DeclaredLengthReader<R> {
    pub fn new(inner: R, declared: u64) -> Self {
        Self {
            inner,
            declared,
            remaining: declared,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DeclaredLengthReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if this.remaining == 0 {
            let mut extra = [0u8; 1];
            let mut extra_buf = ReadBuf::new(&mut extra);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut extra_buf))?;
            if extra_buf.filled().is_empty() {
                return Poll::Ready(Ok(()));
            }
            return Poll::Ready(Err(ProtocolError::PayloadTooLong(this.declared)
                .into_io(io::ErrorKind::InvalidData)));
        }

        let max = buf
            .remaining()
            .min(usize::try_from(this.remaining).unwrap_or(usize::MAX));
        let dst = buf.initialize_unfilled_to(max);
        let mut limited = ReadBuf::new(dst);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        buf.advance(n);
        this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}
