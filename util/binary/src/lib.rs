// Copyright (c) 2018-2022 The Botho Foundation

#![deny(missing_docs)]
#![deny(unsafe_code)]

//! Binary encoding helpers for the persisted wallet formats.
//!
//! All fixed-width integers are little-endian. Lengths use the Bitcoin
//! CompactSize encoding (`var_int`): values below `0xFD` take a single byte,
//! larger values are introduced by a `0xFD`, `0xFE` or `0xFF` marker followed
//! by a `u16`, `u32` or `u64`.

use displaydoc::Display;

/// An error which can occur when decoding binary data
#[derive(Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum FormatError {
    /// Unexpected end of data: needed {needed} bytes, {available} available
    Truncated {
        /// bytes requested by the read
        needed: usize,
        /// bytes left in the buffer
        available: usize,
    },
    /// Length mismatch: declared {declared}, found {found}
    LengthMismatch {
        /// length declared by the envelope
        declared: usize,
        /// length actually present
        found: usize,
    },
    /// Unknown prefix byte 0x{0:02x}
    UnknownPrefix(u8),
    /// Invalid data: {0}
    Invalid(String),
}

impl std::error::Error for FormatError {}

/// Number of bytes `value` occupies when written as a `var_int`.
pub fn var_int_size(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Wrap `data` as `var_int(len) || data`.
pub fn var_bytes(data: &[u8]) -> Vec<u8> {
    let mut writer = BinaryWriter::with_capacity(data.len() + 9);
    writer.put_var_bytes(data);
    writer.into_vec()
}

/// Strip a `var_int(len) || data` envelope, requiring that nothing follows it.
pub fn unwrap_var_bytes(data: &[u8]) -> Result<&[u8], FormatError> {
    let mut reader = BinaryReader::new(data);
    let inner = reader.get_var_bytes()?;
    if !reader.is_empty() {
        return Err(FormatError::LengthMismatch {
            declared: inner.len(),
            found: data.len() - var_int_size(inner.len() as u64),
        });
    }
    Ok(inner)
}

/// Append-only little-endian writer.
#[derive(Clone, Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Write a single byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Write a little-endian `u16`.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a little-endian `i32`.
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a little-endian `u64`.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a CompactSize integer.
    pub fn put_var_int(&mut self, value: u64) -> &mut Self {
        match value {
            0..=0xFC => self.put_u8(value as u8),
            0xFD..=0xFFFF => self.put_u8(0xFD).put_u16(value as u16),
            0x1_0000..=0xFFFF_FFFF => self.put_u8(0xFE).put_u32(value as u32),
            _ => self.put_u8(0xFF).put_u64(value),
        }
    }

    /// Write raw bytes with no length prefix.
    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Write `var_int(len) || data`.
    pub fn put_var_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.put_var_int(data.len() as u64).put_bytes(data)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Clone, Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read `len` raw bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if len > self.remaining() {
            return Err(FormatError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read everything that is left.
    pub fn get_rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.get_array::<1>()?[0])
    }

    /// Read a little-endian `u16`.
    pub fn get_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.get_array()?))
    }

    /// Read a little-endian `u32`.
    pub fn get_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.get_array()?))
    }

    /// Read a little-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_le_bytes(self.get_array()?))
    }

    /// Read a little-endian `u64`.
    pub fn get_u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.get_array()?))
    }

    /// Read a CompactSize integer.
    pub fn get_var_int(&mut self) -> Result<u64, FormatError> {
        match self.get_u8()? {
            0xFD => Ok(self.get_u16()? as u64),
            0xFE => Ok(self.get_u32()? as u64),
            0xFF => self.get_u64(),
            small => Ok(small as u64),
        }
    }

    /// Read a CompactSize length, rejecting values larger than the remaining
    /// buffer.
    pub fn get_var_len(&mut self) -> Result<usize, FormatError> {
        let len = self.get_var_int()?;
        if len > self.remaining() as u64 {
            return Err(FormatError::Truncated {
                needed: usize::try_from(len).unwrap_or(usize::MAX),
                available: self.remaining(),
            });
        }
        Ok(len as usize)
    }

    /// Read `var_int(len) || data`.
    pub fn get_var_bytes(&mut self) -> Result<&'a [u8], FormatError> {
        let len = self.get_var_len()?;
        self.get_bytes(len)
    }
}
