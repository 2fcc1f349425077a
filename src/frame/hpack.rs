//! Header-block compression.
//!
//! Header lists travel compressed in HEADERS, PUSH_PROMISE and CONTINUATION
//! frames using the HPACK representation: a shared static table, a per-direction
//! dynamic table and prefix-coded integers. The [`Decoder`] understands every
//! representation, Huffman-coded strings included. The [`Encoder`] never inserts
//! into the peer's dynamic table, so its output is valid whatever table size
//! the peer advertises.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{FrameError, huffman};

/// Per-entry overhead counted against the dynamic table size.
const ENTRY_OVERHEAD: usize = 32;

static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// A single header field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Header {
    /// Field name, lower-case by convention.
    pub name: Bytes,
    /// Field value.
    pub value: Bytes,
}

impl Header {
    /// Create a header from anything convertible to [`Bytes`].
    ///
    /// # Examples
    ///
    /// ```
    /// use muxwire::frame::Header;
    ///
    /// let header = Header::new(":method", "GET");
    /// assert_eq!(&header.name[..], b":method");
    /// ```
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of the entry as counted against a dynamic table.
    #[must_use]
    pub fn table_size(&self) -> usize { self.name.len() + self.value.len() + ENTRY_OVERHEAD }

    fn from_static(index: usize) -> Self {
        let (name, value) = STATIC_TABLE[index];
        Self::new(Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes()))
    }
}

fn compression(message: impl Into<String>) -> FrameError { FrameError::Compression(message.into()) }

/// Decode an integer with an `n`-bit prefix whose first byte is `first`.
fn decode_int(first: u8, prefix_bits: u8, src: &mut Bytes) -> Result<usize, FrameError> {
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = usize::from(first) & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        if !src.has_remaining() {
            return Err(compression("truncated integer"));
        }
        let byte = src.get_u8();
        if shift > 28 {
            return Err(compression("integer overflow"));
        }
        value += usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Encode `value` with an `n`-bit prefix, or-ing `pattern` into the first byte.
fn encode_int(value: usize, prefix_bits: u8, pattern: u8, dst: &mut BytesMut) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        #[expect(clippy::cast_possible_truncation, reason = "value fits the prefix")]
        dst.put_u8(pattern | value as u8);
        return;
    }
    #[expect(clippy::cast_possible_truncation, reason = "prefix is at most 8 bits")]
    dst.put_u8(pattern | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        #[expect(clippy::cast_possible_truncation, reason = "masked to seven bits")]
        dst.put_u8((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    #[expect(clippy::cast_possible_truncation, reason = "loop leaves fewer than eight bits")]
    dst.put_u8(rest as u8);
}

fn decode_string(src: &mut Bytes) -> Result<Bytes, FrameError> {
    if !src.has_remaining() {
        return Err(compression("truncated string"));
    }
    let first = src.get_u8();
    let huffman_coded = first & 0x80 != 0;
    let length = decode_int(first, 7, src)?;
    if length > src.remaining() {
        return Err(compression("string length exceeds block"));
    }
    let raw = src.split_to(length);
    if huffman_coded { huffman::decode(&raw) } else { Ok(raw) }
}

fn encode_string(value: &[u8], dst: &mut BytesMut) {
    encode_int(value.len(), 7, 0x00, dst);
    dst.put_slice(value);
}

/// Dynamic table shared by one direction of a connection.
#[derive(Debug)]
struct DynamicTable {
    entries: VecDeque<Header>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn get(&self, index: usize) -> Option<&Header> { self.entries.get(index) }

    fn insert(&mut self, header: Header) {
        let entry_size = header.table_size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.size += entry_size;
        self.entries.push_front(header);
        self.evict();
    }

    fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.table_size(),
                None => break,
            }
        }
    }
}

/// Decodes header blocks received from the peer.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    max_table_size: usize,
}

impl Decoder {
    /// Create a decoder whose table may grow to `max_table_size` bytes.
    #[must_use]
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_table_size,
        }
    }

    /// Raise or lower the table size limit advertised to the peer.
    pub fn set_max_table_size(&mut self, max_table_size: usize) {
        self.max_table_size = max_table_size;
        if self.table.max_size > max_table_size {
            self.table.resize(max_table_size);
        }
    }

    fn lookup(&self, index: usize) -> Result<Header, FrameError> {
        match index {
            0 => Err(compression("index 0")),
            1..=61 => Ok(Header::from_static(index - 1)),
            _ => self
                .table
                .get(index - 62)
                .cloned()
                .ok_or_else(|| compression(format!("header index too large {index}"))),
        }
    }

    fn literal(&self, first: u8, prefix_bits: u8, src: &mut Bytes) -> Result<Header, FrameError> {
        let name_index = decode_int(first, prefix_bits, src)?;
        let name = if name_index == 0 {
            decode_string(src)?
        } else {
            self.lookup(name_index)?.name
        };
        let value = decode_string(src)?;
        Ok(Header { name, value })
    }

    /// Decode a complete header block.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Compression`] for malformed blocks, out-of-range
    /// indices, oversized table updates and malformed Huffman strings.
    pub fn decode(&mut self, mut block: Bytes) -> Result<Vec<Header>, FrameError> {
        let mut headers = Vec::new();
        while block.has_remaining() {
            let first = block.get_u8();
            if first & 0x80 != 0 {
                let index = decode_int(first, 7, &mut block)?;
                headers.push(self.lookup(index)?);
            } else if first & 0x40 != 0 {
                let header = self.literal(first, 6, &mut block)?;
                self.table.insert(header.clone());
                headers.push(header);
            } else if first & 0x20 != 0 {
                let size = decode_int(first, 5, &mut block)?;
                if size > self.max_table_size {
                    return Err(compression(format!("invalid dynamic table size update {size}")));
                }
                self.table.resize(size);
            } else {
                // Literal without indexing (0000) or never indexed (0001).
                headers.push(self.literal(first, 4, &mut block)?);
            }
        }
        Ok(headers)
    }
}

impl Default for Decoder {
    fn default() -> Self { Self::new(crate::settings::DEFAULT_HEADER_TABLE_SIZE as usize) }
}

/// Encodes header blocks sent to the peer.
#[derive(Debug, Default)]
pub struct Encoder;

impl Encoder {
    /// Create an encoder.
    #[must_use]
    pub fn new() -> Self { Self }

    /// Append the encoded form of `headers` to `dst`.
    pub fn encode(&mut self, headers: &[Header], dst: &mut BytesMut) {
        for header in headers {
            let mut name_index = None;
            let mut exact = None;
            for (index, (name, value)) in STATIC_TABLE.iter().enumerate() {
                if name.as_bytes() == &header.name[..] {
                    name_index.get_or_insert(index + 1);
                    if value.as_bytes() == &header.value[..] {
                        exact = Some(index + 1);
                        break;
                    }
                }
            }
            match (exact, name_index) {
                (Some(index), _) => encode_int(index, 7, 0x80, dst),
                (None, Some(index)) => {
                    encode_int(index, 4, 0x00, dst);
                    encode_string(&header.value, dst);
                }
                (None, None) => {
                    dst.put_u8(0x00);
                    encode_string(&header.name, dst);
                    encode_string(&header.value, dst);
                }
            }
        }
    }
}
