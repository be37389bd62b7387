// ============================================
// File: crates/callhome-transport/src/activity.rs
// ============================================
//! # Activity Tracking Stream
//!
//! ## Creation Reason
//! Idle expiry has to see NETCONF traffic, not just controller API
//! calls. Wrapping the byte streams of a session stamps a shared
//! clock whenever bytes actually move.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only successful reads that filled bytes and writes that accepted
//!   bytes count; EOF and `Pending` do not
//!
//! ## Last Modified
//! v0.1.0 - Initial activity wrapper

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use callhome_common::time::AtomicInstant;

/// Stream wrapper that records the last time data moved through it.
#[derive(Debug)]
pub struct ActivityStream<S> {
    inner: S,
    activity: Arc<AtomicInstant>,
}

impl<S> ActivityStream<S> {
    /// Wraps `inner`, stamping `activity` on traffic.
    pub fn new(inner: S, activity: Arc<AtomicInstant>) -> Self {
        Self { inner, activity }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ActivityStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.activity.touch();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ActivityStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            this.activity.touch();
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
