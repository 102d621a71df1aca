//! Character dictionary used by CTC decoding. Index 0 is the reserved blank
//! label, the dictionary file's lines occupy 1..N, and a trailing space
//! token sits at index N+1. Class 0 is never emitted by the decoder.
//!
//! Grounded on the blank/space bracketing documented in the pack's
//! `vendor-ocr-rs` recognizer (`rec.rs`) dictionary construction.

use crate::error::OcrError;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Dictionary {
    tokens: Vec<String>,
}

impl Dictionary {
    /// Loads a dictionary from a UTF-8 text file, one token per line. A
    /// trailing newline is tolerated and does not produce an empty token.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OcrError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| OcrError::config(format!("failed to read dictionary {}: {e}", path.as_ref().display())))?;
        Ok(Self::from_lines(contents.lines()))
    }

    pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut tokens = Vec::new();
        tokens.push(String::new()); // index 0: CTC blank placeholder, never emitted
        for line in lines {
            if line.is_empty() {
                continue;
            }
            tokens.push(line.to_string());
        }
        tokens.push(" ".to_string()); // trailing space
        Dictionary { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Maps a CTC class index to its token. Class 0 and out-of-range
    /// indices return `None` (dropped silently by the decoder).
    pub fn token(&self, class_index: usize) -> Option<&str> {
        if class_index == 0 {
            return None;
        }
        self.tokens.get(class_index).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_index_never_resolves() {
        let dict = Dictionary::from_lines(["a", "b", "c"].into_iter());
        assert_eq!(dict.token(0), None);
    }

    #[test]
    fn tokens_offset_by_one_with_trailing_space() {
        let dict = Dictionary::from_lines(["a", "b"].into_iter());
        assert_eq!(dict.token(1), Some("a"));
        assert_eq!(dict.token(2), Some("b"));
        assert_eq!(dict.token(3), Some(" "));
        assert_eq!(dict.token(4), None);
        assert_eq!(dict.len(), 4);
    }

    #[test]
    fn empty_lines_in_file_are_skipped() {
        let dict = Dictionary::from_lines(["a", "", "b"].into_iter());
        assert_eq!(dict.len(), 4);
    }
}
