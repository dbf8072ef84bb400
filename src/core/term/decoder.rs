//! Incremental lossy UTF-8 decoding
//!
//! Serial reads split multi-byte sequences at arbitrary points, so an
//! incomplete tail is carried over to the next chunk. Invalid bytes become
//! U+FFFD; decoding never fails.

use std::char::REPLACEMENT_CHARACTER;

/// Longest incomplete UTF-8 prefix that can be pending
const MAX_PENDING: usize = 3;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, calling `emit` for every complete character
    pub fn decode(&mut self, bytes: &[u8], mut emit: impl FnMut(char)) {
        let joined;
        let mut input: &[u8] = if self.pending.is_empty() {
            bytes
        } else {
            let mut buf = std::mem::take(&mut self.pending);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    text.chars().for_each(&mut emit);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        text.chars().for_each(&mut emit);
                    }
                    match e.error_len() {
                        Some(len) => {
                            emit(REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            // Truncated sequence at the end of the chunk
                            debug_assert!(rest.len() <= MAX_PENDING);
                            self.pending = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Forget any buffered partial sequence
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut Utf8Decoder, chunks: &[&[u8]]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            decoder.decode(chunk, |c| out.push(c));
        }
        out
    }

    #[test]
    fn test_ascii_passthrough() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decode_all(&mut decoder, &[b"hello\r\n"]), "hello\r\n");
    }

    #[test]
    fn test_sequence_split_across_chunks() {
        let mut decoder = Utf8Decoder::new();
        let bytes = "né日".as_bytes();
        let out = decode_all(&mut decoder, &[&bytes[..2], &bytes[2..4], &bytes[4..]]);
        assert_eq!(out, "né日");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::new();
        let out = decode_all(&mut decoder, &[b"a\xffb\xc3(c"]);
        assert_eq!(out, "a\u{fffd}b\u{fffd}(c");
    }

    #[test]
    fn test_reset_drops_partial_sequence() {
        let mut decoder = Utf8Decoder::new();
        let out = decode_all(&mut decoder, &[b"\xe6\x97"]);
        assert_eq!(out, "");
        decoder.reset();
        assert_eq!(decode_all(&mut decoder, &[b"x"]), "x");
    }
}
