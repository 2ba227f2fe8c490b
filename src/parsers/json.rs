//! Incremental JSON scanning shared by the JSON-based parsers.
//!
//! [`JsonScanner`] walks a byte stream forward exactly once, tracking
//! string/escape state and brace depth, and hands out one raw array element
//! at a time. Memory is bounded by the largest single record, never by the
//! file size.

use std::io::BufRead;

use crate::error::{ChatlensError, Result};

/// Forward-only scanner over a JSON document.
pub(crate) struct JsonScanner<R: BufRead> {
    reader: R,
    bytes_read: u64,
    peeked: Option<u8>,
}

impl<R: BufRead> JsonScanner<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            bytes_read: 0,
            peeked: None,
        }
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.bytes_read += 1;
        Ok(Some(buf[0]))
    }

    fn peek_byte(&mut self) -> std::io::Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = {
                let mut buf = [0u8; 1];
                let n = self.reader.read(&mut buf)?;
                if n == 0 {
                    None
                } else {
                    self.bytes_read += 1;
                    Some(buf[0])
                }
            };
        }
        Ok(self.peeked)
    }

    fn skip_whitespace(&mut self) -> std::io::Result<()> {
        while let Some(b) = self.peek_byte()? {
            if b.is_ascii_whitespace() {
                self.peeked = None;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Reads a JSON string assuming the opening quote was consumed, returning
    /// the raw (still escaped) content. Bounded by `max_len`.
    fn read_string_raw(&mut self, max_len: usize) -> Result<String> {
        let mut out = String::new();
        let mut escaped = false;
        loop {
            let Some(b) = self.next_byte()? else {
                return Err(ChatlensError::unexpected_eof("reading JSON string"));
            };
            if escaped {
                escaped = false;
                out.push(b as char);
                continue;
            }
            match b {
                b'\\' => {
                    escaped = true;
                    out.push('\\');
                }
                b'"' => return Ok(out),
                _ => out.push(b as char),
            }
            if out.len() > max_len {
                return Err(ChatlensError::record_too_large(max_len, out.len()));
            }
        }
    }

    /// Consumes the opening bracket when the document is a bare top-level
    /// array, positioning the scanner for [`next_array_object`].
    ///
    /// [`next_array_object`]: Self::next_array_object
    pub(crate) fn enter_top_level_array(&mut self) -> Result<bool> {
        self.skip_whitespace()?;
        if self.peek_byte()? == Some(b'[') {
            self.peeked = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Scans forward for `"key": [` at object depth 1 (counted from the
    /// document start) and consumes through the opening bracket. Returns
    /// `false` on EOF without a match.
    pub(crate) fn find_key_array(&mut self, key: &str) -> Result<bool> {
        self.find_key_array_at(key, 1)
    }

    /// Like [`find_key_array`], but with the key's depth counted relative
    /// to the current position. A scanner already inside the top-level
    /// object (after consuming an earlier array) sees its keys at relative
    /// depth 0.
    ///
    /// [`find_key_array`]: Self::find_key_array
    pub(crate) fn find_key_array_at(&mut self, key: &str, key_depth: i64) -> Result<bool> {
        let mut depth: i64 = 0;
        loop {
            self.skip_whitespace()?;
            let Some(b) = self.next_byte()? else {
                return Ok(false);
            };
            match b {
                b'{' | b'[' => depth += 1,
                b'}' | b']' => depth -= 1,
                b'"' => {
                    // Keys longer than any we search for can't match.
                    let candidate = match self.read_string_raw(256) {
                        Ok(s) => s,
                        Err(ChatlensError::RecordTooLarge { .. }) => continue,
                        Err(e) => return Err(e),
                    };
                    if depth == key_depth && candidate == key {
                        self.skip_whitespace()?;
                        if self.peek_byte()? == Some(b':') {
                            self.peeked = None;
                            self.skip_whitespace()?;
                            if self.peek_byte()? == Some(b'[') {
                                self.peeked = None;
                                return Ok(true);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Reads the next object from the array the scanner is positioned in.
    ///
    /// Skips separators and non-object scalars; returns `None` once the
    /// closing `]` is consumed.
    pub(crate) fn next_array_object(&mut self, max_size: usize) -> Result<Option<String>> {
        loop {
            self.skip_whitespace()?;
            let Some(b) = self.peek_byte()? else {
                return Err(ChatlensError::unexpected_eof("reading JSON array"));
            };
            match b {
                b',' => {
                    self.peeked = None;
                }
                b']' => {
                    self.peeked = None;
                    return Ok(None);
                }
                b'{' => {
                    self.peeked = None;
                    return self.read_object_body(max_size).map(Some);
                }
                b'"' => {
                    // String scalar in the array: skip it.
                    self.peeked = None;
                    self.read_string_raw(max_size)?;
                }
                _ => {
                    // Numbers, booleans, null: skip to the next separator.
                    self.peeked = None;
                }
            }
        }
    }

    /// Accumulates a raw object assuming the opening brace was consumed.
    ///
    /// Bytes are collected verbatim so multi-byte UTF-8 content survives;
    /// only the final buffer is validated.
    fn read_object_body(&mut self, max_size: usize) -> Result<String> {
        let mut out: Vec<u8> = vec![b'{'];
        let mut depth: i64 = 1;
        let mut in_string = false;
        let mut escaped = false;

        loop {
            let Some(b) = self.next_byte()? else {
                return Err(ChatlensError::unexpected_eof("reading JSON object"));
            };
            out.push(b);
            if out.len() > max_size {
                return Err(ChatlensError::record_too_large(max_size, out.len()));
            }

            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return String::from_utf8(out).map_err(|e| {
                            ChatlensError::parse_other(
                                "JSON",
                                format!("invalid UTF-8 in record: {e}"),
                                None,
                            )
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn scanner(input: &str) -> JsonScanner<BufReader<&[u8]>> {
        JsonScanner::new(BufReader::new(input.as_bytes()))
    }

    #[test]
    fn test_find_and_iterate_array() {
        let json = r#"{"name": "Chat", "messages": [{"a": 1}, {"b": 2}]}"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("messages").unwrap());
        assert_eq!(
            scan.next_array_object(1024).unwrap().as_deref(),
            Some(r#"{"a": 1}"#)
        );
        assert_eq!(
            scan.next_array_object(1024).unwrap().as_deref(),
            Some(r#"{"b": 2}"#)
        );
        assert!(scan.next_array_object(1024).unwrap().is_none());
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_depth() {
        let json = r#"{"messages": [{"text": "a } b { c"}, {"text": "\"quoted\""}]}"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("messages").unwrap());
        let first = scan.next_array_object(1024).unwrap().unwrap();
        assert!(first.contains("a } b { c"));
        let second = scan.next_array_object(1024).unwrap().unwrap();
        assert!(second.contains("quoted"));
        assert!(scan.next_array_object(1024).unwrap().is_none());
    }

    #[test]
    fn test_nested_key_does_not_match() {
        let json = r#"{"extra": {"messages": [1]}, "messages": [{"real": true}]}"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("messages").unwrap());
        let obj = scan.next_array_object(1024).unwrap().unwrap();
        assert!(obj.contains("real"));
    }

    #[test]
    fn test_value_that_looks_like_key_is_ignored() {
        let json = r#"{"note": "messages", "messages": [{"x": 1}]}"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("messages").unwrap());
        assert!(scan.next_array_object(1024).unwrap().is_some());
    }

    #[test]
    fn test_continuation_after_earlier_array() {
        let json = r#"{"members": [{"id": 1}], "messages": [{"x": 2}]}"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("members").unwrap());
        while scan.next_array_object(1024).unwrap().is_some() {}
        // The scanner now sits inside the top-level object: its keys are
        // at relative depth 0.
        assert!(scan.find_key_array_at("messages", 0).unwrap());
        let obj = scan.next_array_object(1024).unwrap().unwrap();
        assert!(obj.contains('2'));
    }

    #[test]
    fn test_missing_key_returns_false() {
        let mut scan = scanner(r#"{"name": "Chat"}"#);
        assert!(!scan.find_key_array("messages").unwrap());
    }

    #[test]
    fn test_top_level_array_iteration() {
        // WeChat dumps are a bare array.
        let json = r#"[{"talker": "a"}, null, 5, {"talker": "b"}]"#;
        let mut scan = scanner(json);
        assert!(scan.enter_top_level_array().unwrap());
        let mut count = 0;
        while scan.next_array_object(1024).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_oversized_object_errors() {
        let json = r#"{"messages": [{"text": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}]}"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("messages").unwrap());
        let err = scan.next_array_object(10).unwrap_err();
        assert!(matches!(err, ChatlensError::RecordTooLarge { .. }));
    }

    #[test]
    fn test_truncated_object_is_unexpected_eof() {
        let json = r#"{"messages": [{"text": "unterminated"#;
        let mut scan = scanner(json);
        assert!(scan.find_key_array("messages").unwrap());
        let err = scan.next_array_object(1024).unwrap_err();
        assert!(matches!(err, ChatlensError::UnexpectedEof { .. }));
    }
}
