/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::*;

/// SEC1 tag of an uncompressed point. ZRTP carries X‖Y without it.
const SEC1_UNCOMPRESSED: u8 = 0x04;

/// Rebuild the SEC1 uncompressed encoding from a ZRTP public value.
fn to_sec1(public_value: &[u8], expected: usize) -> Option<Vec<u8>> {
    if public_value.len() != expected {
        return None;
    }
    let mut sec1 = Vec::with_capacity(expected + 1);
    sec1.push(SEC1_UNCOMPRESSED);
    sec1.extend_from_slice(public_value);
    Some(sec1)
}

#[cfg(feature = "p256")]
mod nist_p256 {
    use super::*;
    use p256::ecdh::EphemeralSecret;
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::PublicKey;

    /// An alias for the ephemeral P-256 secret type from the p256 crate.
    pub type CrateP256KeyPair = EphemeralSecret;
    impl<Rng: RngCore + CryptoRng> KeyAgreement<Rng> for CrateP256KeyPair {
        const PUBLIC_VALUE_SIZE: usize = 64;

        fn generate(rng: &mut Rng) -> Option<Self> {
            Some(EphemeralSecret::random(rng))
        }

        fn public_value(&self) -> Vec<u8> {
            self.public_key().to_encoded_point(false).as_bytes()[1..].to_vec()
        }

        fn agree(&self, peer_public_value: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
            let sec1 = to_sec1(peer_public_value, <Self as KeyAgreement<Rng>>::PUBLIC_VALUE_SIZE)?;
            let peer = PublicKey::from_sec1_bytes(&sec1).ok()?;
            Some(Zeroizing::new(self.diffie_hellman(&peer).raw_secret_bytes().to_vec()))
        }
    }
}
#[cfg(feature = "p256")]
pub use nist_p256::*;

#[cfg(feature = "p384")]
mod nist_p384 {
    use super::*;
    use p384::ecdh::EphemeralSecret;
    use p384::elliptic_curve::sec1::ToEncodedPoint;
    use p384::PublicKey;

    /// An alias for the ephemeral P-384 secret type from the p384 crate.
    pub type CrateP384KeyPair = EphemeralSecret;
    impl<Rng: RngCore + CryptoRng> KeyAgreement<Rng> for CrateP384KeyPair {
        const PUBLIC_VALUE_SIZE: usize = 96;

        fn generate(rng: &mut Rng) -> Option<Self> {
            Some(EphemeralSecret::random(rng))
        }

        fn public_value(&self) -> Vec<u8> {
            self.public_key().to_encoded_point(false).as_bytes()[1..].to_vec()
        }

        fn agree(&self, peer_public_value: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
            let sec1 = to_sec1(peer_public_value, <Self as KeyAgreement<Rng>>::PUBLIC_VALUE_SIZE)?;
            let peer = PublicKey::from_sec1_bytes(&sec1).ok()?;
            Some(Zeroizing::new(self.diffie_hellman(&peer).raw_secret_bytes().to_vec()))
        }
    }
}
#[cfg(feature = "p384")]
pub use nist_p384::*;
