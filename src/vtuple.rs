//! Variable-length record wire format ("vtuple").
//!
//! Every attribute value is framed as a length header followed by its payload
//! bytes. A whole record is the concatenation of its framed fields, wrapped in
//! a leading length header and a trailing *mirrored* header (the same bytes in
//! reverse order) so a backward scan can find the record start by reading the
//! file tail first. The single byte `0x00` is reserved as the end-of-run
//! sentinel: a record body always contains at least one field header byte, so
//! a record's leading length is never zero and never collides with EOR.

use crate::error::{SortError, SortResult};

/// End-of-run sentinel. Never a valid record header byte.
pub const EOR_BYTE: u8 = 0x00;

/// Largest length representable in a single header byte.
pub const LEN1_MAX: usize = 0xF9;
/// Header tag for a 16-bit big-endian length.
pub const LEN2_TAG: u8 = 0xFA;
/// Header tag for a 32-bit big-endian length.
pub const LEN4_TAG: u8 = 0xFB;

/// Largest encodable record body.
pub const MAX_RECORD_LEN: usize = u32::MAX as usize;

/// Number of header bytes used to encode `len`.
pub fn header_size(len: usize) -> usize {
    if len <= LEN1_MAX {
        1
    } else if len <= u16::MAX as usize {
        3
    } else {
        5
    }
}

/// Number of header bytes, determined from the first header byte alone.
pub fn header_size_from_first(first: u8) -> usize {
    match first {
        LEN2_TAG => 3,
        LEN4_TAG => 5,
        _ => 1,
    }
}

/// Appends the forward length header for `len` to `out`.
pub fn write_len(out: &mut Vec<u8>, len: usize) {
    if len <= LEN1_MAX {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(LEN2_TAG);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(LEN4_TAG);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Appends the trailing mirrored header for `len`: the forward header bytes in
/// reverse order, so the tag byte is the last byte of the record frame and is
/// the first byte seen by a backward reader.
pub fn write_len_mirrored(out: &mut Vec<u8>, len: usize) {
    let start = out.len();
    write_len(out, len);
    out[start..].reverse();
}

/// Decodes a forward length header at the start of `bytes`.
/// Returns `(length, header_size)`.
pub fn read_len(bytes: &[u8]) -> SortResult<(usize, usize)> {
    let first = *bytes.first().ok_or(SortError::Corrupt(0))?;
    let need = header_size_from_first(first);
    if bytes.len() < need {
        return Err(SortError::Corrupt(0));
    }
    let len = match first {
        LEN2_TAG => u16::from_be_bytes([bytes[1], bytes[2]]) as usize,
        LEN4_TAG => u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize,
        b => b as usize,
    };
    Ok((len, need))
}

/// Decodes a mirrored header given the `header_size_from_first(last)` bytes
/// that precede the frame end, `tail`, where `tail[tail.len()-1]` is the last
/// byte of the frame.
pub fn read_len_mirrored(tail: &[u8]) -> SortResult<(usize, usize)> {
    let last = *tail.last().ok_or(SortError::Corrupt(0))?;
    let need = header_size_from_first(last);
    if tail.len() < need {
        return Err(SortError::Corrupt(0));
    }
    let body = &tail[tail.len() - need..];
    // Mirrored bytes: reversing restores the forward header.
    let len = match last {
        LEN2_TAG => u16::from_be_bytes([body[1], body[0]]) as usize,
        LEN4_TAG => u32::from_be_bytes([body[3], body[2], body[1], body[0]]) as usize,
        b => b as usize,
    };
    Ok((len, need))
}

/// Appends one framed field (header + payload) to `out`.
pub fn write_field(out: &mut Vec<u8>, payload: &[u8]) {
    write_len(out, payload.len());
    out.extend_from_slice(payload);
}

/// Returns the payload of the `n`-th framed field inside a record body, or an
/// error when the body ends early.
pub fn nth_field(body: &[u8], n: usize) -> SortResult<&[u8]> {
    let mut off = 0usize;
    for i in 0..=n {
        if off >= body.len() {
            return Err(SortError::Corrupt(off as u64));
        }
        let (len, hdr) = read_len(&body[off..])?;
        if off + hdr + len > body.len() {
            return Err(SortError::Corrupt(off as u64));
        }
        if i == n {
            return Ok(&body[off + hdr..off + hdr + len]);
        }
        off += hdr + len;
    }
    unreachable!()
}

/// Iterates the framed fields of a record body.
pub fn fields(body: &[u8]) -> FieldIter<'_> {
    FieldIter { body, off: 0 }
}

pub struct FieldIter<'a> {
    body: &'a [u8],
    off: usize,
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = SortResult<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.off >= self.body.len() {
            return None;
        }
        match read_len(&self.body[self.off..]) {
            Ok((len, hdr)) => {
                if self.off + hdr + len > self.body.len() {
                    self.off = self.body.len();
                    Some(Err(SortError::Corrupt(self.off as u64)))
                } else {
                    let field = &self.body[self.off + hdr..self.off + hdr + len];
                    self.off += hdr + len;
                    Some(Ok(field))
                }
            }
            Err(e) => {
                self.off = self.body.len();
                Some(Err(e))
            }
        }
    }
}
