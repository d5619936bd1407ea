//! Server-sent events decoding for streaming completion responses.
//!
//! Only `data:` fields matter to the providers used here; comments,
//! `event:` and `id:` lines are skipped. Bytes are buffered until a full
//! line arrives, so a multi-byte character split across network chunks
//! is reassembled before decoding.

use futures_util::stream::{self, Stream, StreamExt};
use std::pin::Pin;

struct Decoder<S> {
    body: Pin<Box<S>>,
    buf: Vec<u8>,
    finished: bool,
}

impl<S> Decoder<S> {
    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line[..end]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Extract the payload of a `data:` line.
fn data_field(line: &str) -> Option<String> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).to_string())
}

/// Decode a byte stream into the payloads of its `data:` lines.
///
/// A transport error is yielded once and ends the stream. A trailing line
/// without a newline is still decoded when the body ends.
pub fn data_events<S, B, E>(body: S) -> impl Stream<Item = Result<String, E>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Send,
{
    let decoder = Decoder {
        body: Box::pin(body),
        buf: Vec::new(),
        finished: false,
    };

    stream::unfold(decoder, |mut dec| async move {
        loop {
            if let Some(line) = dec.next_line() {
                match data_field(&line) {
                    Some(data) => return Some((Ok(data), dec)),
                    None => continue,
                }
            }
            if dec.finished {
                return None;
            }
            match dec.body.next().await {
                Some(Ok(chunk)) => dec.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    dec.finished = true;
                    dec.buf.clear();
                    return Some((Err(e), dec));
                }
                None => {
                    dec.finished = true;
                    if !dec.buf.is_empty() {
                        dec.buf.push(b'\n');
                    }
                }
            }
        }
    })
}
