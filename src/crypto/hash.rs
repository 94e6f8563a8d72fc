/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/// The size of a SHA-256 hash, which is always 32 bytes.
pub const SHA256_HASH_SIZE: usize = 32;
/// The size of a SHA-384 hash, which is always 48 bytes.
pub const SHA384_HASH_SIZE: usize = 48;
/// The size of an untruncated HMAC-SHA1 output.
pub const SHA1_HMAC_SIZE: usize = 20;

/// A SHA-256 implementation.
///
/// SHA-256 is used for the ZRTP hash chain, the implicit message MACs and the hello hash, and
/// is also the default negotiated hash.
/// Does not need to be threadsafe.
pub trait Sha256Hash: Sized {
    /// Create a new instance of SHA-256 for streaming data to.
    fn new() -> Self;
    /// Update the instance with input `data`.
    /// This must update the state as if `data` was appended to the previous input.
    fn update(&mut self, data: &[u8]);
    /// Finish streaming input and output the final hash.
    fn finish(self) -> [u8; SHA256_HASH_SIZE];
    /// Pure function for computing a single HMAC-SHA-256. Repeat invocations of this function
    /// should have no effect on each other.
    fn hmac(key: &[u8], data: &[u8]) -> [u8; SHA256_HASH_SIZE];
}

/// A SHA-384 implementation, negotiated together with ECDH P-384.
/// Does not need to be threadsafe.
pub trait Sha384Hash: Sized {
    fn new() -> Self;
    fn update(&mut self, data: &[u8]);
    fn finish(self) -> [u8; SHA384_HASH_SIZE];
    fn hmac(key: &[u8], data: &[u8]) -> [u8; SHA384_HASH_SIZE];
}

/// An HMAC-SHA1 implementation for SRTP packet authentication.
///
/// Unlike the hashes above this is keyed up front and streamed, since SRTP authenticates the
/// packet followed by the rollover counter without copying the packet.
pub trait Sha1Hmac: Sized + Send {
    /// Create a new HMAC-SHA1 instance with the given key.
    fn new(key: &[u8]) -> Self;
    fn update(&mut self, data: &[u8]);
    /// Finish streaming input and output the full 20 byte MAC.
    fn finish(self) -> [u8; SHA1_HMAC_SIZE];
}
