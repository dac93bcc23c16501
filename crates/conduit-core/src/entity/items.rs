//! Incremental splitting of NDJSON and JSON array entities into items.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use super::readable::ChunkStream;
use crate::error::{ConduitError, ConduitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Unknown,
    Lines,
    Array,
}

/// Splits a byte stream into the raw bytes of top-level items.
///
/// Lines mode yields each non-blank line. Array mode expects a single
/// top-level JSON array and yields each element, tracking nesting and string
/// escapes so that elements can be cut without parsing them.
#[derive(Debug)]
pub(crate) struct ItemSplitter {
    buf: BytesMut,
    framing: Framing,
    max_item_size: usize,
    pos: usize,
    in_item: bool,
    depth: usize,
    in_string: bool,
    escape: bool,
    closed: bool,
}

impl ItemSplitter {
    pub(crate) fn new(ndjson: bool, max_item_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            framing: if ndjson { Framing::Lines } else { Framing::Unknown },
            max_item_size,
            pos: 0,
            in_item: false,
            depth: 0,
            in_string: false,
            escape: false,
            closed: false,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete item, if one is buffered.
    pub(crate) fn next_item(&mut self) -> ConduitResult<Option<Bytes>> {
        if self.framing == Framing::Unknown {
            self.skip_whitespace();
            match self.buf.first() {
                None => return Ok(None),
                Some(b'[') => {
                    self.buf.advance(1);
                    self.framing = Framing::Array;
                }
                Some(_) => self.framing = Framing::Lines,
            }
        }
        match self.framing {
            Framing::Lines => self.next_line(),
            _ => self.next_element(),
        }
    }

    /// Returns the trailing item once the input has ended.
    pub(crate) fn finish(&mut self) -> ConduitResult<Option<Bytes>> {
        match self.framing {
            Framing::Unknown => Ok(None),
            Framing::Lines => {
                let rest = self.buf.split().freeze();
                let trimmed = trim(&rest);
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(rest.slice_ref(trimmed)))
                }
            }
            Framing::Array if self.closed => Ok(None),
            Framing::Array => Err(ConduitError::entity_conversion(
                "JSON array entity ended before its closing bracket",
            )),
        }
    }

    fn skip_whitespace(&mut self) {
        let n = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buf.advance(n);
    }

    fn next_line(&mut self) -> ConduitResult<Option<Bytes>> {
        loop {
            let Some(offset) = self.buf[self.pos..].iter().position(|&b| b == b'\n') else {
                self.pos = self.buf.len();
                self.check_size(self.pos)?;
                return Ok(None);
            };
            let end = self.pos + offset;
            self.check_size(end)?;
            let line = self.buf.split_to(end + 1).freeze();
            self.pos = 0;
            let trimmed = trim(&line);
            if !trimmed.is_empty() {
                return Ok(Some(line.slice_ref(trimmed)));
            }
        }
    }

    fn next_element(&mut self) -> ConduitResult<Option<Bytes>> {
        if self.closed {
            return Ok(None);
        }
        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];
            if !self.in_item {
                match b {
                    b',' => {
                        self.buf.advance(1);
                        continue;
                    }
                    b']' => {
                        self.buf.advance(1);
                        self.closed = true;
                        return Ok(None);
                    }
                    _ if b.is_ascii_whitespace() => {
                        self.buf.advance(1);
                        continue;
                    }
                    _ => self.in_item = true,
                }
            }

            let end = if self.in_string {
                if self.escape {
                    self.escape = false;
                    None
                } else if b == b'\\' {
                    self.escape = true;
                    None
                } else if b == b'"' {
                    self.in_string = false;
                    (self.depth == 0).then_some(self.pos + 1)
                } else {
                    None
                }
            } else {
                match b {
                    b'"' => {
                        self.in_string = true;
                        None
                    }
                    b'{' | b'[' => {
                        self.depth += 1;
                        None
                    }
                    b'}' | b']' if self.depth == 0 => Some(self.pos),
                    b'}' | b']' => {
                        self.depth -= 1;
                        (self.depth == 0).then_some(self.pos + 1)
                    }
                    b',' if self.depth == 0 => Some(self.pos),
                    _ if self.depth == 0 && b.is_ascii_whitespace() => Some(self.pos),
                    _ => None,
                }
            };

            if let Some(end) = end {
                self.check_size(end)?;
                let item = self.buf.split_to(end).freeze();
                self.pos = 0;
                self.in_item = false;
                return Ok(Some(item));
            }
            self.pos += 1;
            self.check_size(self.pos)?;
        }
        Ok(None)
    }

    fn check_size(&self, len: usize) -> ConduitResult<()> {
        if len > self.max_item_size {
            return Err(ConduitError::entity_conversion(format!(
                "stream item exceeds the maximum size of {} bytes",
                self.max_item_size
            )));
        }
        Ok(())
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// A stream of structured items decoded from an inbound entity.
///
/// Produced by [`ReadableEntity::items`](crate::ReadableEntity::items). Items
/// are decoded as soon as their bytes are complete; the stream ends after the
/// first error.
pub struct ItemStream<T> {
    chunks: ChunkStream,
    splitter: ItemSplitter,
    input_done: bool,
    done: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ItemStream<T> {
    pub(crate) fn new(chunks: ChunkStream, ndjson: bool, max_item_size: usize) -> Self {
        Self {
            chunks,
            splitter: ItemSplitter::new(ndjson, max_item_size),
            input_done: false,
            done: false,
            _item: PhantomData,
        }
    }

    fn decode(bytes: &[u8]) -> ConduitResult<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| ConduitError::entity_conversion_with_source("invalid stream item", e))
    }

    fn fail(&mut self, error: ConduitError) -> Poll<Option<ConduitResult<T>>> {
        self.done = true;
        Poll::Ready(Some(Err(error)))
    }

    fn emit(&mut self, item: &[u8]) -> Poll<Option<ConduitResult<T>>> {
        match Self::decode(item) {
            Ok(value) => Poll::Ready(Some(Ok(value))),
            Err(e) => self.fail(e),
        }
    }
}

impl<T: DeserializeOwned> Stream for ItemStream<T> {
    type Item = ConduitResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match this.splitter.next_item() {
                Err(e) => return this.fail(e),
                Ok(Some(item)) => return this.emit(&item),
                Ok(None) => {}
            }
            if this.input_done {
                this.done = true;
                return match this.splitter.finish() {
                    Ok(Some(item)) => this.emit(&item),
                    Ok(None) => Poll::Ready(None),
                    Err(e) => Poll::Ready(Some(Err(e))),
                };
            }
            match ready!(this.chunks.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.splitter.push(&chunk),
                Some(Err(e)) => return this.fail(e),
                None => this.input_done = true,
            }
        }
    }
}

impl<T> std::fmt::Debug for ItemStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStream")
            .field("splitter", &self.splitter)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split_all(splitter: &mut ItemSplitter, input: &[&[u8]]) -> ConduitResult<Vec<String>> {
        let mut out = Vec::new();
        for chunk in input {
            splitter.push(chunk);
            while let Some(item) = splitter.next_item()? {
                out.push(String::from_utf8(item.to_vec()).unwrap());
            }
        }
        if let Some(item) = splitter.finish()? {
            out.push(String::from_utf8(item.to_vec()).unwrap());
        }
        Ok(out)
    }

    #[test]
    fn test_array_with_nested_values_and_strings() {
        let mut splitter = ItemSplitter::new(false, 1024);
        let items = split_all(
            &mut splitter,
            &[br#" [ {"a":[1,2]}, "x,]\"y", 42 , true,"#, br#"null,[[]]] "#],
        )
        .unwrap();
        assert_eq!(
            items,
            vec![r#"{"a":[1,2]}"#, r#""x,]\"y""#, "42", "true", "null", "[[]]"]
        );
    }

    #[test]
    fn test_empty_array() {
        let mut splitter = ItemSplitter::new(false, 16);
        assert!(split_all(&mut splitter, &[b"[", b" ]"]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_array_is_error() {
        let mut splitter = ItemSplitter::new(false, 64);
        let err = split_all(&mut splitter, &[b"[1, 2"]).unwrap_err();
        assert!(err.to_string().contains("closing bracket"));
    }

    #[test]
    fn test_lines_skip_blank_and_keep_last_unterminated() {
        let mut splitter = ItemSplitter::new(true, 64);
        let items = split_all(&mut splitter, &[b"{\"a\":1}\r\n\n  ", b"[1]\n{\"b\"", b":2}"]).unwrap();
        assert_eq!(items, vec![r#"{"a":1}"#, "[1]", r#"{"b":2}"#]);
    }

    #[test]
    fn test_oversized_item_is_rejected() {
        let mut splitter = ItemSplitter::new(false, 8);
        let err = split_all(&mut splitter, &[b"[\"0123456789\"]"]).unwrap_err();
        assert!(err.to_string().contains("maximum size"));

        let mut splitter = ItemSplitter::new(true, 8);
        assert!(split_all(&mut splitter, &[b"0123456789"]).is_err());
    }

    #[test]
    fn test_sniffs_lines_without_content_type() {
        let mut splitter = ItemSplitter::new(false, 64);
        let items = split_all(&mut splitter, &[b"1\n2\n"]).unwrap();
        assert_eq!(items, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_stream_stops_at_malformed_item() {
        let chunks: ChunkStream = Box::pin(futures_util::stream::iter(vec![
            Ok::<_, ConduitError>(Bytes::from_static(b"{\"id\":1}\nnot-")),
            Ok(Bytes::from_static(b"json\n{\"id\":3}\n")),
        ]));
        let items: Vec<ConduitResult<serde_json::Value>> =
            ItemStream::new(chunks, true, 1024).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap()["id"], 1);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EntityConversion);
    }

    proptest! {
        #[test]
        fn prop_array_split_at_any_chunking(
            values in proptest::collection::vec(any::<(i32, String)>(), 0..8),
            cut in 1usize..7,
        ) {
            let json = serde_json::to_vec(&values).unwrap();
            let chunks: Vec<&[u8]> = json.chunks(cut).collect();
            let mut splitter = ItemSplitter::new(false, 4096);
            let items = split_all(&mut splitter, &chunks).unwrap();
            let decoded: Vec<(i32, String)> = items
                .iter()
                .map(|i| serde_json::from_str(i).unwrap())
                .collect();
            prop_assert_eq!(decoded, values);
        }
    }
}
