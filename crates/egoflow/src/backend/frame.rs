//! Decoder for the synthesis frame stream.
//!
//! The backend answers a synthesis call with blocks separated by a blank
//! line, each of the form `data: {"type": ..., "data": ...}`. Byte chunks
//! from the transport do not align with blocks, so the decoder buffers raw
//! bytes and only decodes complete blocks (a multi-byte character split
//! across chunks is reassembled before UTF-8 decoding).
//!
//! Blocks without the `data:` prefix and blocks whose payload is not valid
//! JSON are logged and skipped; they never end the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, warn};

use super::error::BackendError;
use super::types::StreamFrame;

/// Largest block the decoder will buffer.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const DELIMITER: &[u8] = b"\n\n";

/// Stream adapter turning a byte stream into decoded `StreamFrame`s.
pub struct FrameDecoder<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S> FrameDecoder<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn next_block(&mut self) -> Option<Vec<u8>> {
        let pos = self
            .buffer
            .windows(DELIMITER.len())
            .position(|w| w == DELIMITER)?;
        let mut block: Vec<u8> = self.buffer.drain(..pos + DELIMITER.len()).collect();
        block.truncate(pos);
        Some(block)
    }
}

impl<S, E> Stream for FrameDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BackendError>,
{
    type Item = Result<StreamFrame, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            while let Some(block) = self.next_block() {
                if let Some(frame) = decode_block(&block) {
                    return Poll::Ready(Some(Ok(frame)));
                }
            }

            if self.done {
                return Poll::Ready(None);
            }

            if self.buffer.len() > MAX_FRAME_BYTES {
                self.done = true;
                self.buffer.clear();
                return Poll::Ready(Some(Err(BackendError::FrameTooLarge {
                    limit: MAX_FRAME_BYTES,
                })));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    // Trailing block without a terminating blank line
                    let rest = std::mem::take(&mut self.buffer);
                    if let Some(frame) = decode_block(&rest) {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn decode_block(block: &[u8]) -> Option<StreamFrame> {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!(error = %e, "Skipping non UTF-8 stream block");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }

    let Some(payload) = text.strip_prefix("data:") else {
        debug!(block = %text, "Ignoring stream block without data prefix");
        return None;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    match serde_json::from_str::<StreamFrame>(payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;
    use std::convert::Infallible;

    async fn decode(chunks: Vec<&'static [u8]>) -> Vec<Result<StreamFrame, BackendError>> {
        let inner = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from_static(c))),
        );
        FrameDecoder::new(inner).collect().await
    }

    fn kinds(frames: &[Result<StreamFrame, BackendError>]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f.as_ref().unwrap().kind.clone())
            .collect()
    }

    #[tokio::test]
    async fn decodes_blocks_split_across_chunks() {
        let frames = decode(vec![
            b"data: {\"type\":\"chunk\",\"da",
            b"ta\":{\"text\":\"Hel\"}}\n",
            b"\ndata: {\"type\":\"chunk\",\"data\":{\"text\":\"lo\"}}\n\n",
        ])
        .await;

        let texts: Vec<_> = frames
            .iter()
            .map(|f| f.as_ref().unwrap().chunk_text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn multibyte_character_split_between_chunks() {
        let full = "data: {\"type\":\"chunk\",\"data\":{\"text\":\"привет\"}}\n\n".as_bytes();
        let split = full.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let (head, tail) = full.split_at(split);
        let head: &'static [u8] = Box::leak(head.to_vec().into_boxed_slice());
        let tail: &'static [u8] = Box::leak(tail.to_vec().into_boxed_slice());

        let frames = decode(vec![head, tail]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().chunk_text(), Some("привет"));
    }

    #[tokio::test]
    async fn malformed_and_foreign_blocks_are_skipped() {
        let frames = decode(vec![
            b": keep-alive\n\n",
            b"data: {not json}\n\n",
            b"event: ping\n\n",
            b"data: {\"type\":\"usage\",\"data\":{\"totalTokenCount\":3}}\n\n",
        ])
        .await;
        assert_eq!(kinds(&frames), vec!["usage"]);
    }

    #[tokio::test]
    async fn trailing_block_without_delimiter_is_decoded() {
        let frames = decode(vec![
            b"data: {\"type\":\"chunk\",\"data\":{\"text\":\"a\"}}\n\n",
            b"data:{\"type\":\"chunk\",\"data\":{\"text\":\"b\"}}",
        ])
        .await;
        assert_eq!(kinds(&frames), vec!["chunk", "chunk"]);
        assert_eq!(frames[1].as_ref().unwrap().chunk_text(), Some("b"));
    }

    #[tokio::test]
    async fn oversized_block_ends_stream_with_error() {
        let big: &'static [u8] = Box::leak(vec![b'x'; MAX_FRAME_BYTES + 1].into_boxed_slice());
        let frames = decode(vec![big, b"\n\n"]).await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0],
            Err(BackendError::FrameTooLarge { .. })
        ));
    }
}
