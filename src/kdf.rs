/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use zeroize::Zeroizing;

use crate::algorithm::*;
use crate::application::CryptoLayer;
use crate::proto::*;

/// The KDF of RFC 6189 section 4.5.1, a single block of the NIST SP 800-108 counter mode KDF
/// with the negotiated HMAC as the PRF.
///
/// Output is the leftmost `bits` bits of `HMAC(ki, 0x00000001 ‖ label ‖ 0x00 ‖ context ‖ bits)`.
pub fn kdf<C: CryptoLayer>(
    hash: HashAlgorithm,
    ki: &[u8],
    label: &[u8],
    context: &[u8],
    bits: u32,
) -> Zeroizing<Digest> {
    debug_assert!(bits % 8 == 0 && bits <= hash.bits());
    let mut buffer = Zeroizing::new(Vec::with_capacity(4 + label.len() + 1 + context.len() + 4));
    buffer.extend_from_slice(&1u32.to_be_bytes());
    buffer.extend_from_slice(label);
    buffer.push(0x00);
    buffer.extend_from_slice(context);
    buffer.extend_from_slice(&bits.to_be_bytes());

    let mut out = Zeroizing::new(hash.hmac::<C>(ki, &buffer));
    out.truncate((bits / 8) as usize);
    out
}

/// `KDF_Context = ZIDi ‖ ZIDr ‖ total_hash`.
pub fn kdf_context(zid_i: &[u8; ZID_SIZE], zid_r: &[u8; ZID_SIZE], total_hash: &[u8]) -> Vec<u8> {
    let mut ctx = Vec::with_capacity(2 * ZID_SIZE + total_hash.len());
    ctx.extend_from_slice(zid_i);
    ctx.extend_from_slice(zid_r);
    ctx.extend_from_slice(total_hash);
    ctx
}

/// Compute the session root secret s0 from the DH result and the optional retained secret s1.
/// s2 and s3 (auxiliary and PBX secrets) are never present and contribute only a zero length.
pub fn compute_s0<C: CryptoLayer>(
    hash: HashAlgorithm,
    dh_result: &[u8],
    context: &[u8],
    s1: Option<&[u8]>,
) -> Zeroizing<Digest> {
    let s1_len = (s1.map_or(0, |s| s.len()) as u32).to_be_bytes();
    let absent = 0u32.to_be_bytes();
    Zeroizing::new(hash.hash::<C>(&[
        &1u32.to_be_bytes(),
        dh_result,
        KDF_S0_LABEL,
        context,
        &s1_len,
        s1.unwrap_or(&[]),
        &absent,
        &absent,
    ]))
}

/// The 8-byte identifier of a retained secret sent in DHPart messages:
/// the leftmost 64 bits of `HMAC(secret, role)`.
pub fn secret_id<C: CryptoLayer>(hash: HashAlgorithm, secret: &[u8], role: &[u8]) -> [u8; SECRET_ID_SIZE] {
    let mac = hash.hmac::<C>(secret, role);
    let mut id = [0u8; SECRET_ID_SIZE];
    id.copy_from_slice(&mac[..SECRET_ID_SIZE]);
    id
}

/// Everything derived from s0 once both DHParts are known.
pub struct SessionKeys {
    pub initiator_master_key: Zeroizing<Digest>,
    pub initiator_master_salt: Zeroizing<Digest>,
    pub responder_master_key: Zeroizing<Digest>,
    pub responder_master_salt: Zeroizing<Digest>,
    pub sas_hash: Zeroizing<Digest>,
    pub new_retained_secret: Zeroizing<Digest>,
}

impl SessionKeys {
    pub fn derive<C: CryptoLayer>(set: &NegotiatedSet, s0: &[u8], context: &[u8]) -> Self {
        let key_bits = set.cipher.key_bits();
        Self {
            initiator_master_key: kdf::<C>(set.hash, s0, LABEL_INITIATOR_MASTER_KEY, context, key_bits),
            initiator_master_salt: kdf::<C>(set.hash, s0, LABEL_INITIATOR_MASTER_SALT, context, MASTER_SALT_BITS),
            responder_master_key: kdf::<C>(set.hash, s0, LABEL_RESPONDER_MASTER_KEY, context, key_bits),
            responder_master_salt: kdf::<C>(set.hash, s0, LABEL_RESPONDER_MASTER_SALT, context, MASTER_SALT_BITS),
            sas_hash: kdf::<C>(set.hash, s0, LABEL_SAS, context, SAS_BITS),
            new_retained_secret: kdf::<C>(set.hash, s0, LABEL_RETAINED_SECRET, context, RETAINED_SECRET_BITS),
        }
    }
}

/// Keys protecting one direction's Confirm message.
pub struct ConfirmKeys {
    pub zrtp_key: Zeroizing<Digest>,
    pub hmac_key: Zeroizing<Digest>,
}

impl ConfirmKeys {
    /// Keys for the Confirm sent by the initiator (`initiator == true`) or by the responder.
    pub fn derive<C: CryptoLayer>(set: &NegotiatedSet, s0: &[u8], context: &[u8], initiator: bool) -> Self {
        let (zrtp_label, hmac_label) = if initiator {
            (LABEL_INITIATOR_ZRTP_KEY, LABEL_INITIATOR_HMAC_KEY)
        } else {
            (LABEL_RESPONDER_ZRTP_KEY, LABEL_RESPONDER_HMAC_KEY)
        };
        Self {
            zrtp_key: kdf::<C>(set.hash, s0, zrtp_label, context, set.cipher.key_bits()),
            hmac_key: kdf::<C>(set.hash, s0, hmac_label, context, set.hash.bits()),
        }
    }
}

#[cfg(all(test, feature = "default-crypto"))]
mod test {
    use super::*;
    use crate::crypto_impl::DefaultCrypto;

    struct C;
    impl DefaultCrypto for C {}

    #[test]
    fn kdf_is_deterministic_and_sensitive() {
        let key = [7u8; 32];
        let ctx = [1u8; 56];
        let base = kdf::<C>(HashAlgorithm::S256, &key, b"SAS", &ctx, 256);
        assert_eq!(*base, *kdf::<C>(HashAlgorithm::S256, &key, b"SAS", &ctx, 256));
        assert_eq!(base.len(), 32);

        let mut seen = vec![base.to_vec()];
        let mut key2 = key;
        key2[31] ^= 1;
        seen.push(kdf::<C>(HashAlgorithm::S256, &key2, b"SAS", &ctx, 256).to_vec());
        seen.push(kdf::<C>(HashAlgorithm::S256, &key, b"SAT", &ctx, 256).to_vec());
        let mut ctx2 = ctx;
        ctx2[0] ^= 0x80;
        seen.push(kdf::<C>(HashAlgorithm::S256, &key, b"SAS", &ctx2, 256).to_vec());
        seen.push(kdf::<C>(HashAlgorithm::S384, &key, b"SAS", &ctx, 256).to_vec());
        for i in 0..seen.len() {
            for j in (i + 1)..seen.len() {
                assert_ne!(seen[i], seen[j]);
            }
        }
    }

    #[test]
    fn kdf_length_is_part_of_the_input() {
        let full = kdf::<C>(HashAlgorithm::S384, &[3u8; 48], b"Responder HMAC key", &[9u8; 72], 384);
        let short = kdf::<C>(HashAlgorithm::S384, &[3u8; 48], b"Responder HMAC key", &[9u8; 72], 112);
        assert_eq!(full.len(), 48);
        assert_eq!(short.len(), 14);
        assert_ne!(&full[..14], &short[..]);
    }

    #[test]
    fn s0_depends_on_retained_secret() {
        let ctx = kdf_context(&[1; 12], &[2; 12], &[3; 32]);
        assert_eq!(ctx.len(), 56);
        let without = compute_s0::<C>(HashAlgorithm::S256, &[5; 64], &ctx, None);
        let with = compute_s0::<C>(HashAlgorithm::S256, &[5; 64], &ctx, Some(&[6; 32]));
        assert_ne!(*without, *with);
        assert_eq!(secret_id::<C>(HashAlgorithm::S256, &[6; 32], ROLE_INITIATOR).len(), 8);
        assert_ne!(
            secret_id::<C>(HashAlgorithm::S256, &[6; 32], ROLE_INITIATOR),
            secret_id::<C>(HashAlgorithm::S256, &[6; 32], ROLE_RESPONDER)
        );
    }
}
