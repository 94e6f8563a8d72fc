/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use rand_core::RngCore;

use crate::proto::*;

/// Bounds checked reader over a received message. Every read past the end returns `None`.
#[derive(Clone)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    /// Start reading at a fixed offset.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }
    pub fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }
    pub fn u8(&mut self) -> Option<u8> {
        Some(self.array::<1>()?[0])
    }
    pub fn u16(&mut self) -> Option<u16> {
        Some(u16::from_be_bytes(self.array()?))
    }
    pub fn u32(&mut self) -> Option<u32> {
        Some(u32::from_be_bytes(self.array()?))
    }
}

/// Builds a ZRTP message. The header is written up front and its length field is filled in
/// by `finish`.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(message_type: &[u8; 8]) -> Self {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(message_type);
        Self { buf }
    }
    pub fn put(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }
    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }
    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.put(&v.to_be_bytes())
    }
    pub fn put_random<R: RngCore>(&mut self, rng: &mut R, n: usize) -> &mut Self {
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        rng.fill_bytes(&mut self.buf[start..]);
        self
    }
    /// Write the length field for a message whose final size is the current size plus
    /// `trailing` bytes still to be appended, and return the bytes written so far.
    pub fn finish(mut self, trailing: usize) -> Vec<u8> {
        let words = ((self.buf.len() + trailing) / 4) as u16;
        self.buf[2..4].copy_from_slice(&words.to_be_bytes());
        self.buf
    }
}

/// Check the framing of a received message and return its type tag.
///
/// The length field must match the actual length, which must be a whole number of words.
pub(crate) fn parse_header(msg: &[u8]) -> Option<&[u8; 8]> {
    let mut r = Reader::new(msg);
    if r.array::<2>()? != MAGIC {
        return None;
    }
    let words = r.u16()? as usize;
    if words * 4 != msg.len() {
        return None;
    }
    r.take(8)?.try_into().ok()
}
