/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
#[cfg(feature = "sha2")]
mod sha2_impl;
#[cfg(feature = "sha2")]
pub use hmac;
#[cfg(feature = "sha2")]
pub use sha2;
#[cfg(feature = "sha2")]
pub use sha2_impl::*;

#[cfg(feature = "sha1")]
mod sha1_impl;
#[cfg(feature = "sha1")]
pub use sha1;
#[cfg(feature = "sha1")]
pub use sha1_impl::*;

#[cfg(feature = "aes")]
mod aes_impl;
#[cfg(feature = "aes")]
pub use aes;
#[cfg(feature = "aes")]
pub use cfb_mode;
#[cfg(feature = "aes")]
pub use ctr;
#[cfg(feature = "aes")]
pub use aes_impl::*;

#[cfg(any(feature = "p256", feature = "p384"))]
mod ecdh_impl;
#[cfg(any(feature = "p256", feature = "p384"))]
pub use ecdh_impl::*;
#[cfg(feature = "p256")]
pub use p256;
#[cfg(feature = "p384")]
pub use p384;

/// Implement this marker trait to get a `CryptoLayer` backed by the RustCrypto crates.
///
/// DH3K is not provided, so the default settings only offer the elliptic curve key agreements.
#[cfg(feature = "default-crypto")]
pub trait DefaultCrypto {}

#[cfg(feature = "default-crypto")]
impl<C: DefaultCrypto> crate::application::CryptoLayer for C {
    type Rng = rand_core::OsRng;
    type Sha256 = CrateSha256;
    type Sha384 = CrateSha384;
    type HmacSha1 = CrateHmacSha1;
    type AesCtr = CrateAes;
    type AesCfb = CrateAes;
    type Ec25 = CrateP256KeyPair;
    type Ec38 = CrateP384KeyPair;
    type Dh3k = crate::crypto::Unavailable;
}
