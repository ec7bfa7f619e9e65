use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures_core::ready;
use futures_util::StreamExt;
use pin_project_lite::pin_project;

use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::Payload;
use actix_web::error::PayloadError;

use crate::record::EmitGuard;

/// Default per-body capture cap in bytes.
pub(crate) const DEFAULT_BODY_CAP: usize = 64 * 1024;

/// A capped copy of a body stream.
///
/// The cap bounds only the captured copy; the consumer of the teed stream
/// always receives every byte. A chunk straddling the cap is captured up to
/// exactly the cap.
#[derive(Debug, Clone)]
pub struct BodyCapture {
    buf: BytesMut,
    cap: usize,
    total: usize,
    truncated: bool,
}

impl BodyCapture {
    pub(crate) fn new(cap: usize) -> Self {
        BodyCapture {
            buf: BytesMut::new(),
            cap,
            total: 0,
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = self.cap.saturating_sub(self.buf.len());
        if room >= chunk.len() {
            self.buf.extend_from_slice(chunk);
        } else {
            self.buf.extend_from_slice(&chunk[..room]);
            self.truncated = true;
        }
    }

    /// Captured bytes, at most the configured cap.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Captured bytes decoded as text, lossily for non-UTF-8 content.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    /// Total size of the stream in bytes, including anything past the cap.
    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Whether bytes past the cap were dropped from the capture.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Tees the request payload.
///
/// Drains `payload` to exhaustion, capturing at most `cap` bytes, and
/// returns a replacement payload that replays the complete byte sequence to
/// the handler. A mid-stream source error ends the capture at the bytes seen
/// so far and is replayed unchanged after them.
pub(crate) async fn tee_payload(mut payload: Payload, cap: usize) -> (Payload, BodyCapture) {
    let mut capture = BodyCapture::new(cap);
    if matches!(payload, Payload::None) {
        return (Payload::None, capture);
    }

    let mut chunks: Vec<Result<Bytes, PayloadError>> = Vec::new();
    while let Some(item) = payload.next().await {
        match item {
            Ok(chunk) => {
                capture.push(&chunk);
                chunks.push(Ok(chunk));
            }
            Err(err) => {
                chunks.push(Err(err));
                break;
            }
        }
    }

    let replay = Payload::Stream {
        payload: Box::pin(futures_util::stream::iter(chunks)) as _,
    };
    (replay, capture)
}

pin_project! {
    /// Response body wrapper that forwards chunks untouched while keeping a
    /// capped copy, and emits the request's log record once the body has
    /// been fully streamed (or dropped early on client disconnect).
    pub struct TeeBody<B> {
        #[pin]
        body: B,
        capture: BodyCapture,
        size: usize,
        guard: Option<EmitGuard>,
    }

    impl<B> PinnedDrop for TeeBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(mut guard) = this.guard.take() {
                guard.finish_stream(*this.size, this.capture);
            }
        }
    }
}

impl<B> TeeBody<B> {
    pub(crate) fn new(body: B, cap: usize, guard: EmitGuard) -> Self {
        TeeBody {
            body,
            capture: BodyCapture::new(cap),
            size: 0,
            guard: Some(guard),
        }
    }

    /// Wraps without capturing or logging, for excluded paths.
    pub(crate) fn passthrough(body: B) -> Self {
        TeeBody {
            body,
            capture: BodyCapture::new(0),
            size: 0,
            guard: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn captured(&self) -> &BodyCapture {
        &self.capture
    }
}

impl<B: MessageBody> MessageBody for TeeBody<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len();
                if this.guard.is_some() {
                    this.capture.push(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }
}
