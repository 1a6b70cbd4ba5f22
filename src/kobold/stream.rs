//! Token stream decoding
//!
//! `POST /api/extra/generate/stream` answers with a chunked body of
//! newline-separated frames, the interesting ones looking like
//! `data: {"token": "..."}`. Chunk boundaries are arbitrary: they can fall
//! inside a frame, inside the JSON payload or inside a multi-byte UTF-8
//! character. [`StreamDecoder`] keeps both the undecoded byte tail and the
//! unterminated frame between reads, so the accumulated text is the same
//! whatever way the body was split.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use super::KoboldError;

/// Marker preceding a JSON payload in a frame
pub const DATA_PREFIX: &str = "data:";

/// Payload some servers send as the last frame of a stream
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Something a streamed body can be read from, one chunk at a time
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk in arrival order, `None` once the body is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, KoboldError>;
}

#[async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, KoboldError> {
        Ok(self.chunk().await?)
    }
}

/// Incremental frame decoder
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of an incomplete UTF-8 sequence left over from the last chunk
    pending: Vec<u8>,
    /// Decoded text after the last newline seen
    remainder: String,
    /// Tokens accumulated so far
    text: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the body.
    ///
    /// Returns the tokens completed by this chunk, in order. Frames still
    /// missing their newline stay buffered until a later call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let decoded = self.decode(chunk);
        self.remainder.push_str(&decoded);

        let Some(last_newline) = self.remainder.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.remainder.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.remainder, rest);

        complete
            .split('\n')
            .filter_map(|frame| self.accept(frame))
            .collect()
    }

    /// Signal end of body.
    ///
    /// A dangling partial UTF-8 sequence becomes U+FFFD and an unterminated
    /// last frame is handled as if it had its newline.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.remainder.push(char::REPLACEMENT_CHARACTER);
        }
        let last = std::mem::take(&mut self.remainder);
        self.accept(&last).into_iter().collect()
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    fn accept(&mut self, frame: &str) -> Option<String> {
        match parse_frame(frame) {
            Ok(Some(token)) if !token.is_empty() => {
                self.text.push_str(&token);
                Some(token)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Skipping stream frame: {}", e);
                None
            }
        }
    }

    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    rest = &[];
                }
                Err(err) => {
                    let (valid, invalid) = rest.split_at(err.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = &invalid[len..];
                        }
                        // Truncated sequence: wait for the next chunk
                        None => {
                            rest = invalid;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        decoded
    }
}

/// Extract the token carried by a single frame.
///
/// Frames without the `data:` marker, the `[DONE]` terminator and payloads
/// without a string `token` field yield `Ok(None)`. Any other payload that is
/// not JSON is a [`KoboldError::MalformedFrame`].
pub fn parse_frame(frame: &str) -> Result<Option<String>, KoboldError> {
    let Some(payload) = frame.trim().strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload == DONE_PAYLOAD {
        return Ok(None);
    }

    let event: Value =
        serde_json::from_str(payload).map_err(|source| KoboldError::MalformedFrame {
            payload: payload.to_string(),
            source,
        })?;

    Ok(event
        .get("token")
        .and_then(Value::as_str)
        .map(str::to_string))
}

/// Drain `source` to the end, returning the accumulated text.
///
/// `on_token` is called for every token as soon as its frame is complete.
pub async fn read_stream<S, F>(source: &mut S, mut on_token: F) -> Result<String, KoboldError>
where
    S: ChunkSource + ?Sized,
    F: FnMut(&str),
{
    let mut decoder = StreamDecoder::new();
    let mut chunks = 0usize;

    while let Some(chunk) = source.next_chunk().await? {
        chunks += 1;
        for token in decoder.push(&chunk) {
            on_token(&token);
        }
    }
    for token in decoder.finish() {
        on_token(&token);
    }

    tracing::debug!(
        "Stream finished after {} chunks, {} bytes of text",
        chunks,
        decoder.text().len()
    );
    Ok(decoder.into_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const BODY: &str = "data: {\"token\":\"Hel\"}\ndata: {\"token\":\"lo\"}\n";

    struct VecSource(VecDeque<Bytes>);

    impl VecSource {
        fn split(body: &[u8], cuts: &[usize]) -> Self {
            let mut chunks = VecDeque::new();
            let mut start = 0;
            for &cut in cuts {
                chunks.push_back(Bytes::copy_from_slice(&body[start..cut]));
                start = cut;
            }
            chunks.push_back(Bytes::copy_from_slice(&body[start..]));
            Self(chunks)
        }
    }

    #[async_trait]
    impl ChunkSource for VecSource {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, KoboldError> {
            Ok(self.0.pop_front())
        }
    }

    fn decode_all(chunks: &[&[u8]]) -> String {
        let mut decoder = StreamDecoder::new();
        for chunk in chunks {
            decoder.push(chunk);
        }
        decoder.finish();
        decoder.into_text()
    }

    #[test]
    fn test_split_inside_first_frame() {
        let body = BODY.as_bytes();
        let (a, b) = body.split_at(10);
        assert_eq!(decode_all(&[a, b]), "Hello");
    }

    #[test]
    fn test_every_single_split_point() {
        let body = BODY.as_bytes();
        for cut in 0..=body.len() {
            let (a, b) = body.split_at(cut);
            assert_eq!(decode_all(&[a, b]), "Hello", "split at {}", cut);
        }
    }

    #[test]
    fn test_fixed_size_reads() {
        let body = "event: message\ndata: {\"token\":\"Once \"}\n\nevent: message\ndata: {\"token\":\"upon \"}\n\nevent: message\ndata: {\"token\":\"a time\"}\n\n";
        for size in 1..=body.len() {
            let chunks: Vec<&[u8]> = body.as_bytes().chunks(size).collect();
            assert_eq!(decode_all(&chunks), "Once upon a time", "chunk size {}", size);
        }
    }

    /// Multibyte text, invalid bytes, a truncated sequence and CRLF endings
    fn mixed_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b": keep-alive\r\n\r\nevent: message\r\n");
        body.extend_from_slice("data: {\"token\":\"caf\u{e9} \"}\r\n\r\n".as_bytes());
        body.extend_from_slice("data: {\"token\":\"\u{1F600}\u{4e16}\"}\r\n".as_bytes());
        body.extend_from_slice(b"data: {\"token\":\"x\xFFy\"}\r\n");
        body.extend_from_slice(b"data: {\"token\":\"\xE2\x82z\"}\r\n");
        body.extend_from_slice(b"data: {broken\r\ndata: [DONE]\r\n");
        body
    }

    const MIXED_TEXT: &str = "caf\u{e9} \u{1F600}\u{4e16}x\u{FFFD}y\u{FFFD}z";

    #[test]
    fn test_mixed_body_any_partition() {
        let body = mixed_body();
        assert_eq!(decode_all(&[&body]), MIXED_TEXT);

        for size in 1..=body.len() {
            let chunks: Vec<&[u8]> = body.chunks(size).collect();
            assert_eq!(decode_all(&chunks), MIXED_TEXT, "chunk size {}", size);
        }

        for first in 0..=body.len() {
            for second in first..=body.len() {
                let chunks = [&body[..first], &body[first..second], &body[second..]];
                assert_eq!(
                    decode_all(&chunks),
                    MIXED_TEXT,
                    "splits at {} and {}",
                    first,
                    second
                );
            }
        }
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let body = "data: {\"token\":\"caf\u{e9} \u{1F600}\"}\n".as_bytes();
        let e_acute = body.iter().position(|&b| b == 0xC3).unwrap();
        let emoji = body.iter().position(|&b| b == 0xF0).unwrap();

        let chunks = [
            &body[..e_acute + 1],
            &body[e_acute + 1..emoji + 2],
            &body[emoji + 2..],
        ];
        assert_eq!(decode_all(&chunks), "caf\u{e9} \u{1F600}");
    }

    #[test]
    fn test_tokens_reported_when_frame_completes() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"data: {\"tok").is_empty());
        assert_eq!(decoder.push(b"en\":\"a\"}\ndata: {\"token\":\"b\"}"), ["a"]);
        assert_eq!(decoder.text(), "a");
        assert_eq!(decoder.push(b"\n"), ["b"]);
        assert!(decoder.finish().is_empty());
        assert_eq!(decoder.into_text(), "ab");
    }

    #[test]
    fn test_unterminated_last_frame_is_kept() {
        assert_eq!(decode_all(&[b"data: {\"token\":\"x\"}\ndata: {\"token\":\"y\"}"]), "xy");
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let body = b"data: {\"token\":\"a\"}\ndata: {not json\ndata: [DONE]\ndata: {\"token\":\"b\"}\n";
        assert_eq!(decode_all(&[body]), "ab");
    }

    #[test]
    fn test_frames_without_token() {
        let body = b": keep-alive\n\nevent: message\ndata: {\"finish_reason\":\"length\"}\ndata: {\"token\":null}\ndata: {\"token\":\"z\"}\r\n";
        assert_eq!(decode_all(&[body]), "z");
    }

    #[test]
    fn test_invalid_utf8_becomes_replacement() {
        let mut body = b"data: {\"token\":\"a".to_vec();
        body.push(0xFF);
        body.extend_from_slice(b"b\"}\n");
        assert_eq!(decode_all(&[&body]), "a\u{FFFD}b");
    }

    #[test]
    fn test_parse_frame() {
        assert_eq!(parse_frame("  data: {\"token\":\"t\"}  ").unwrap().as_deref(), Some("t"));
        assert_eq!(parse_frame("data:{\"token\":\"t\"}").unwrap().as_deref(), Some("t"));
        assert_eq!(parse_frame("event: message").unwrap(), None);
        assert_eq!(parse_frame("").unwrap(), None);
        assert_eq!(parse_frame("data: [DONE]").unwrap(), None);
        assert_eq!(parse_frame("data:[DONE]\r").unwrap(), None);
        assert!(matches!(
            parse_frame("data: [DONE"),
            Err(KoboldError::MalformedFrame { .. })
        ));
        assert!(matches!(
            parse_frame("data: {\"token\""),
            Err(KoboldError::MalformedFrame { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_stream_calls_back_in_order() {
        let body = BODY.as_bytes();
        let mut source = VecSource::split(body, &[3, 17, 30]);
        let mut seen = Vec::new();

        let text = read_stream(&mut source, |token| seen.push(token.to_string()))
            .await
            .unwrap();

        assert_eq!(text, "Hello");
        assert_eq!(seen, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_read_stream_empty_body() {
        let mut source = VecSource(VecDeque::new());
        let text = read_stream(&mut source, |_| {}).await.unwrap();
        assert!(text.is_empty());
    }
}
