//! Line framer for the AT response stream.
//!
//! A token is a maximal `\n`-delimited run with bare `\r` bytes stripped.
//! The tokenizer reports how much of the window it consumed so the caller
//! can flush the receive buffer once every token has been handled; a window
//! without a single complete line consumes nothing and stays buffered.

use heapless::{String, Vec};

use crate::error::{Error, Result};

/// Upper bound on a single response or notification line.
pub const MAX_TOKEN_SZ: usize = 512;
/// Upper bound on complete lines handled out of one buffer window.
pub const MAX_TOKENS: usize = 20;

pub type Token = String<MAX_TOKEN_SZ>;
pub type Tokens = Vec<Token, MAX_TOKENS>;

#[derive(Debug, PartialEq, Eq)]
pub struct Tokenized {
    pub tokens: Tokens,
    /// Bytes of the window covered by the returned tokens, including the
    /// trailing `\r`/`\n` run after the last one.
    pub consumed: usize,
}

pub fn tokenize(window: &[u8]) -> Result<Option<Tokenized>> {
    let mut tokens = Tokens::new();
    let mut current = Token::new();
    let mut has_token = false;
    let mut consumed = 0;

    for (i, &byte) in window.iter().enumerate() {
        match byte {
            b'\n' => {
                if has_token {
                    tokens.push(current).map_err(|_| Error::OutOfMemory)?;
                    current = Token::new();
                    has_token = false;
                }
                consumed = i + 1;
            }
            b'\r' => {
                if !has_token {
                    consumed = i + 1;
                }
            }
            _ => {
                has_token = true;
                current.push(byte as char).map_err(|_| Error::OutOfMemory)?;
            }
        }
    }

    if tokens.is_empty() {
        return Ok(None);
    }

    // Extend `consumed` through any trailing \r/\n run directly after the
    // last complete token, but never into a partial line.
    if has_token {
        consumed = window[..consumed]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(consumed);
    }

    Ok(Some(Tokenized { tokens, consumed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_newline_and_strips_cr() {
        let t = tokenize(b"\r\nOK\r\n").unwrap().unwrap();
        assert_eq!(t.tokens.len(), 1);
        assert_eq!(t.tokens[0].as_str(), "OK");
        assert_eq!(t.consumed, 6);
    }

    #[test]
    fn partial_line_yields_nothing() {
        assert!(tokenize(b"+CLCC: 1,0").unwrap().is_none());
        assert!(tokenize(b"").unwrap().is_none());
        assert!(tokenize(b"\r\n\r\n").unwrap().is_none());
    }

    #[test]
    fn partial_tail_is_not_consumed() {
        let t = tokenize(b"+CREG: 1\r\n+CLC").unwrap().unwrap();
        assert_eq!(t.tokens.len(), 1);
        assert_eq!(t.tokens[0].as_str(), "+CREG: 1");
        assert_eq!(t.consumed, 10);
    }

    #[test]
    fn multiple_tokens_in_order() {
        let t = tokenize(b"+CLCC: 1,0,3,0,0,\"5551212\",129,\"\"\r\nOK\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(t.tokens.len(), 2);
        assert_eq!(t.tokens[0].as_str(), "+CLCC: 1,0,3,0,0,\"5551212\",129,\"\"");
        assert_eq!(t.tokens[1].as_str(), "OK");
        assert_eq!(t.consumed, 39);
    }

    #[test]
    fn trailing_blank_lines_are_consumed() {
        let t = tokenize(b"OK\r\n\r\n\r\n").unwrap().unwrap();
        assert_eq!(t.tokens.len(), 1);
        assert_eq!(t.consumed, 8);
    }

    #[test]
    fn oversized_line_is_fatal() {
        let mut long = heapless::Vec::<u8, 1024>::new();
        long.resize(600, b'x').unwrap();
        long.extend_from_slice(b"\n").unwrap();
        assert_eq!(tokenize(&long), Err(Error::OutOfMemory));
    }
}
