/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/// The specified size of an AES-128 key.
pub const AES_128_KEY_SIZE: usize = 16;
/// The specified size of an AES-256 key.
pub const AES_256_KEY_SIZE: usize = 32;
/// The specified size of an AES block.
pub const AES_BLOCK_SIZE: usize = 16;

/// A trait for AES-128 or AES-256 in counter mode, selected by key length.
/// This is the SRTP payload cipher and the SRTP key derivation PRF.
///
/// Instances must securely delete their keys when dropped.
pub trait AesCtr: Sized + Send + Sync {
    /// Create a new instance keyed with `key`.
    /// Must return `None` unless `key` is 16 or 32 bytes long.
    fn new(key: &[u8]) -> Option<Self>;

    /// XOR into `data` the keystream whose first counter block is `iv`.
    /// The whole 128-bit block is incremented big-endian from one block to the next.
    fn apply_keystream(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]);
}

/// A trait for AES-128 or AES-256 in 128-bit cipher feedback mode, selected by key length.
/// This encrypts the body of ZRTP Confirm messages.
///
/// Instances must securely delete their keys when dropped.
pub trait AesCfb: Sized + Send + Sync {
    /// Create a new instance keyed with `key`.
    /// Must return `None` unless `key` is 16 or 32 bytes long.
    fn new(key: &[u8]) -> Option<Self>;

    fn encrypt_in_place(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]);

    fn decrypt_in_place(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]);
}
