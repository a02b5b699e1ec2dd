//! Bounds-checked cursor over wire bytes
//!
//! Every read checks the remaining length first and fails with
//! [`CdcError::Decode`] instead of panicking, so a truncated or corrupt
//! payload terminates the session cleanly.

use crate::common::{CdcError, Result};

#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(CdcError::decode(format!(
                "read of {} bytes at offset {} overruns payload of {} bytes",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Everything not yet read.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u24_le(&mut self) -> Result<u32> {
        self.uint_le(3).map(|v| v as u32)
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Little-endian unsigned integer of `n` bytes (n <= 8).
    pub fn uint_le(&mut self, n: usize) -> Result<u64> {
        debug_assert!(n <= 8);
        Ok(self
            .bytes(n)?
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u24_be(&mut self) -> Result<u32> {
        self.uint_be(3).map(|v| v as u32)
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Big-endian unsigned integer of `n` bytes (n <= 8).
    pub fn uint_be(&mut self, n: usize) -> Result<u64> {
        debug_assert!(n <= 8);
        Ok(self
            .bytes(n)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    /// Bytes up to (not including) the next NUL, which is consumed.
    pub fn null_terminated(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CdcError::decode("missing NUL terminator"))?;
        let out = &rest[..len];
        self.pos += len + 1;
        Ok(out)
    }

    /// Length-encoded integer (protocol "packed integer").
    ///
    /// `0xFB` (NULL in text rows) and `0xFF` are rejected; callers that accept
    /// NULL check for it before calling.
    pub fn lenenc_int(&mut self) -> Result<u64> {
        match self.u8()? {
            v @ 0..=0xFA => Ok(v as u64),
            0xFC => self.uint_le(2),
            0xFD => self.uint_le(3),
            0xFE => self.u64_le(),
            other => Err(CdcError::decode(format!(
                "invalid length-encoded integer prefix 0x{:02X}",
                other
            ))),
        }
    }

    /// Length-encoded byte string.
    pub fn lenenc_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.lenenc_int()?;
        let len = usize::try_from(len)
            .map_err(|_| CdcError::decode(format!("length {} does not fit in memory", len)))?;
        self.bytes(len)
    }

    /// Peek at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }
}
