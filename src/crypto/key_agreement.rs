/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// An ephemeral Diffie-Hellman or ECDH key pair of one of the ZRTP key agreement types.
///
/// Instances must securely delete the private key when dropped.
pub trait KeyAgreement<Rng: RngCore + CryptoRng>: Sized + Send {
    /// The size in bytes of the public value as it appears on the wire in a DHPart message.
    /// For the NIST curves this is the uncompressed X coordinate followed by the Y coordinate,
    /// each big-endian and padded to half this size.
    const PUBLIC_VALUE_SIZE: usize;

    /// Randomly generate a new key pair.
    ///
    /// Return `None` if this key agreement type is not available from this provider. ZRTP will
    /// then fail any session which negotiates it.
    fn generate(rng: &mut Rng) -> Option<Self>;

    /// Output the public value in its wire encoding, exactly `PUBLIC_VALUE_SIZE` bytes.
    fn public_value(&self) -> Vec<u8>;

    /// Perform key agreement with the peer's wire encoded public value and return the raw
    /// (un-hashed!) shared secret at its natural width.
    ///
    /// **CRITICAL**: This function must return `None` if the peer's public value is malformed,
    /// not on the curve, or would otherwise produce a predictable secret.
    fn agree(&self, peer_public_value: &[u8]) -> Option<Zeroizing<Vec<u8>>>;
}

/// A key agreement slot for which no implementation is available.
/// Generation always fails, so any session negotiating it fails cleanly.
pub struct Unavailable;

impl<Rng: RngCore + CryptoRng> KeyAgreement<Rng> for Unavailable {
    const PUBLIC_VALUE_SIZE: usize = 0;

    fn generate(_: &mut Rng) -> Option<Self> {
        None
    }

    fn public_value(&self) -> Vec<u8> {
        Vec::new()
    }

    fn agree(&self, _: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        None
    }
}
