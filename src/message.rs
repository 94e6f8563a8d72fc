/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use arrayvec::ArrayVec;
use rand_core::RngCore;
use zeroize::Zeroizing;

use crate::algorithm::*;
use crate::application::{CryptoLayer, KeyAgreementSet};
use crate::codec::{Reader, Writer};
use crate::crypto::*;
use crate::kdf::ConfirmKeys;
use crate::proto::*;
use crate::result::FaultType;

/// A 32-byte hash chain image.
pub(crate) type Image = [u8; HASH_IMAGE_SIZE];

/// Room for any count a 4-bit Hello list length field can express.
type SymbolList = ArrayVec<Symbol, 16>;

pub(crate) fn sha256<C: CryptoLayer>(data: &[u8]) -> Image {
    let mut h = C::Sha256::new();
    h.update(data);
    h.finish()
}

/// Lowercase hex SHA-256 of a whole message, as exchanged out of band in `a=zrtp-hash`.
pub(crate) fn hex_sha256<C: CryptoLayer>(msg: &[u8]) -> String {
    hex::encode(sha256::<C>(msg))
}

/// The hash chain of one session. Each image is the SHA-256 of the one before it, and they are
/// revealed in reverse order: H3 in Hello, H2 in Commit, H1 in DHPart, H0 in Confirm.
pub(crate) struct HashChain {
    pub h0: Secret<HASH_IMAGE_SIZE>,
    pub h1: Secret<HASH_IMAGE_SIZE>,
    pub h2: Secret<HASH_IMAGE_SIZE>,
    pub h3: Secret<HASH_IMAGE_SIZE>,
}

impl HashChain {
    pub fn generate<C: CryptoLayer>(rng: &mut C::Rng) -> Self {
        let mut h0 = Secret::new();
        rng.fill_bytes(h0.as_mut());
        let h1 = Secret(sha256::<C>(h0.as_ref()));
        let h2 = Secret(sha256::<C>(h1.as_ref()));
        let h3 = Secret(sha256::<C>(h2.as_ref()));
        Self { h0, h1, h2, h3 }
    }
}

/// The truncated HMAC-SHA256 that Hello, Commit and DHPart messages carry in their last 8 bytes,
/// keyed by the next image down the hash chain.
pub(crate) fn implicit_mac<C: CryptoLayer>(key: &[u8], body: &[u8]) -> [u8; MAC_SIZE] {
    let full = C::Sha256::hmac(key, body);
    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&full[..MAC_SIZE]);
    mac
}

/// Verify the trailing implicit MAC of a whole message.
pub(crate) fn check_implicit_mac<C: CryptoLayer>(key: &[u8], msg: &[u8]) -> bool {
    if msg.len() < HEADER_SIZE + MAC_SIZE {
        return false;
    }
    let (body, mac) = msg.split_at(msg.len() - MAC_SIZE);
    secure_eq(&implicit_mac::<C>(key, body), mac)
}

fn seal<C: CryptoLayer>(w: Writer, key: &[u8]) -> Vec<u8> {
    let mut msg = w.finish(MAC_SIZE);
    let mac = implicit_mac::<C>(key, &msg);
    msg.extend_from_slice(&mac);
    msg
}

/// A message consisting of the header only: HelloACK, Conf2ACK, ErrorACK and friends.
pub(crate) fn build_simple(message_type: &[u8; 8]) -> Vec<u8> {
    Writer::new(message_type).finish(0)
}

pub(crate) fn build_hello<C: CryptoLayer>(
    zid: &[u8; ZID_SIZE],
    chain: &HashChain,
    offered: KeyAgreementSet,
    client_id: &[u8; CLIENT_ID_SIZE],
) -> Vec<u8> {
    let mut hashes = SymbolList::new();
    if offered.ec38 {
        hashes.push(*HashAlgorithm::S384.symbol());
    }
    if offered.ec25 || offered.dh3k {
        hashes.push(*HashAlgorithm::S256.symbol());
    }
    let ciphers = [*CipherAlgorithm::Aes1.symbol(), *CipherAlgorithm::Aes3.symbol()];
    let auths = [*AuthTagAlgorithm::Hs32.symbol()];
    let mut key_agreements = SymbolList::new();
    for (enabled, ka) in [
        (offered.ec38, KeyAgreementAlgorithm::Ec38),
        (offered.ec25, KeyAgreementAlgorithm::Ec25),
        (offered.dh3k, KeyAgreementAlgorithm::Dh3k),
    ] {
        if enabled {
            key_agreements.push(*ka.symbol());
        }
    }
    let sas = [*SasAlgorithm::B256.symbol()];

    let mut w = Writer::new(MSG_HELLO);
    w.put(VERSION).put(client_id).put(chain.h3.as_ref()).put(zid);
    w.put_u8(0)
        .put_u8(hashes.len() as u8)
        .put_u8(((ciphers.len() as u8) << 4) | auths.len() as u8)
        .put_u8(((key_agreements.len() as u8) << 4) | sas.len() as u8);
    for s in hashes.iter().chain(&ciphers).chain(&auths).chain(&key_agreements).chain(&sas) {
        w.put(s);
    }
    seal::<C>(w, chain.h2.as_ref())
}

/// The parsed fixed fields and algorithm lists of a peer's Hello.
pub(crate) struct Hello {
    pub version: [u8; 4],
    pub client_id: [u8; CLIENT_ID_SIZE],
    pub h3: Image,
    pub zid: [u8; ZID_SIZE],
    hashes: SymbolList,
    ciphers: SymbolList,
    key_agreements: SymbolList,
    sas: SymbolList,
}

impl Hello {
    pub fn parse(msg: &[u8]) -> Option<Self> {
        if msg.len() < HELLO_MIN_SIZE {
            return None;
        }
        let mut r = Reader::at(msg, HELLO_VERSION);
        let version = r.array()?;
        let client_id = r.array()?;
        let h3 = r.array()?;
        let zid = r.array()?;
        let _flags = r.u8()?;
        let hc = r.u8()? & 0x0f;
        let cc_ac = r.u8()?;
        let kc_sc = r.u8()?;
        let mut list = |n: u8| -> Option<SymbolList> { (0..n).map(|_| r.array::<4>()).collect() };
        let hashes = list(hc)?;
        let ciphers = list(cc_ac >> 4)?;
        // HS32 is the only auth tag, so that list is skipped over.
        let _auths = list(cc_ac & 0x0f)?;
        let key_agreements = list(kc_sc >> 4)?;
        let sas = list(kc_sc & 0x0f)?;
        r.skip(MAC_SIZE)?;
        Some(Self { version, client_id, h3, zid, hashes, ciphers, key_agreements, sas })
    }

    fn offers(list: &SymbolList, symbol: &Symbol) -> bool {
        list.iter().any(|s| s == symbol)
    }

    /// Choose the algorithms for this session from what the peer offers and what we enabled.
    pub fn negotiate(&self, enabled: KeyAgreementSet) -> NegotiatedSet {
        let key_agreement = if enabled.ec38 && Self::offers(&self.key_agreements, KeyAgreementAlgorithm::Ec38.symbol()) {
            KeyAgreementAlgorithm::Ec38
        } else if enabled.ec25 && Self::offers(&self.key_agreements, KeyAgreementAlgorithm::Ec25.symbol()) {
            KeyAgreementAlgorithm::Ec25
        } else {
            KeyAgreementAlgorithm::Dh3k
        };
        let hash = if key_agreement == KeyAgreementAlgorithm::Ec38
            && Self::offers(&self.hashes, HashAlgorithm::S384.symbol())
        {
            HashAlgorithm::S384
        } else {
            HashAlgorithm::S256
        };
        let cipher = if Self::offers(&self.ciphers, CipherAlgorithm::Aes3.symbol()) {
            CipherAlgorithm::Aes3
        } else {
            CipherAlgorithm::Aes1
        };
        let sas = if Self::offers(&self.sas, SasAlgorithm::B256.symbol()) {
            SasAlgorithm::B256
        } else {
            SasAlgorithm::B32
        };
        NegotiatedSet { hash, cipher, key_agreement, sas, auth: AuthTagAlgorithm::Hs32 }
    }

    /// Older clients hash an unpadded ECDH result into s0. They are recognized by their client
    /// id, or by their exact algorithm lists when the client id is garbage.
    pub fn is_legacy(&self) -> bool {
        if &self.client_id == CLIENT_ID_LEGACY {
            return true;
        }
        if &self.client_id == CLIENT_ID {
            return false;
        }
        let printable = self.client_id.iter().all(|b| (32..127).contains(b));
        !printable
            && self.hashes.as_slice() == [*b"S256", *b"S384"]
            && self.ciphers.as_slice() == [*b"AES3", *b"AES1"]
            && self.key_agreements.as_slice() == [*b"EC38", *b"EC25", *b"DH3k", *b"DH2k"]
            && self.sas.as_slice() == [*b"B256", *b"B32 "]
    }
}

pub(crate) fn build_commit<C: CryptoLayer>(
    zid: &[u8; ZID_SIZE],
    chain: &HashChain,
    set: &NegotiatedSet,
    hvi: &[u8; HVI_SIZE],
) -> Vec<u8> {
    let mut w = Writer::new(MSG_COMMIT);
    w.put(chain.h2.as_ref())
        .put(zid)
        .put(set.hash.symbol())
        .put(set.cipher.symbol())
        .put(set.auth.symbol())
        .put(set.key_agreement.symbol())
        .put(set.sas.symbol())
        .put(hvi);
    seal::<C>(w, chain.h1.as_ref())
}

pub(crate) struct Commit {
    pub h2: Image,
    pub zid: [u8; ZID_SIZE],
    pub set: NegotiatedSet,
    pub hvi: [u8; HVI_SIZE],
}

impl Commit {
    pub fn parse(msg: &[u8]) -> Result<Self, FaultType> {
        if msg.len() != COMMIT_SIZE {
            return Err(FaultType::InvalidPacket);
        }
        let mut r = Reader::at(msg, COMMIT_H2);
        let h2 = r.array().ok_or(FaultType::InvalidPacket)?;
        let zid = r.array().ok_or(FaultType::InvalidPacket)?;
        let mut symbol = || r.take(4).ok_or(FaultType::InvalidPacket);
        let hash = HashAlgorithm::from_symbol(symbol()?);
        let cipher = CipherAlgorithm::from_symbol(symbol()?);
        let auth = AuthTagAlgorithm::from_symbol(symbol()?);
        let key_agreement = KeyAgreementAlgorithm::from_symbol(symbol()?);
        let sas = SasAlgorithm::from_symbol(symbol()?);
        let hvi = r.array().ok_or(FaultType::InvalidPacket)?;
        match (hash, cipher, auth, key_agreement, sas) {
            (Some(hash), Some(cipher), Some(auth), Some(key_agreement), Some(sas)) => {
                Ok(Self { h2, zid, set: NegotiatedSet { hash, cipher, key_agreement, sas, auth }, hvi })
            }
            _ => Err(FaultType::UnsupportedAlgorithm),
        }
    }
}

/// `Hash_neg(DHPart2 ‖ responder Hello)` truncated to 32 bytes.
pub(crate) fn hvi<C: CryptoLayer>(hash: HashAlgorithm, dhpart2: &[u8], responder_hello: &[u8]) -> [u8; HVI_SIZE] {
    let digest = hash.hash::<C>(&[dhpart2, responder_hello]);
    let mut out = [0u8; HVI_SIZE];
    out.copy_from_slice(&digest[..HVI_SIZE]);
    out
}

pub(crate) fn build_dhpart<C: CryptoLayer>(
    rng: &mut C::Rng,
    message_type: &[u8; 8],
    chain: &HashChain,
    rs1_id: &[u8; SECRET_ID_SIZE],
    rs2_id: &[u8; SECRET_ID_SIZE],
    public_value: &[u8],
) -> Vec<u8> {
    let mut w = Writer::new(message_type);
    w.put(chain.h1.as_ref()).put(rs1_id).put(rs2_id);
    // Auxiliary and PBX secrets are never held, so their IDs are always random.
    w.put_random(rng, 2 * SECRET_ID_SIZE);
    w.put(public_value);
    seal::<C>(w, chain.h0.as_ref())
}

pub(crate) struct DhPart<'a> {
    pub h1: Image,
    pub rs1_id: [u8; SECRET_ID_SIZE],
    pub rs2_id: [u8; SECRET_ID_SIZE],
    pub public_value: &'a [u8],
}

impl<'a> DhPart<'a> {
    /// The message must be exactly the size the negotiated key agreement implies.
    pub fn parse(msg: &'a [u8], key_agreement: KeyAgreementAlgorithm) -> Option<Self> {
        if msg.len() != key_agreement.dhpart_size() {
            return None;
        }
        let mut r = Reader::at(msg, DHPART_H1);
        let h1 = r.array()?;
        let rs1_id = r.array()?;
        let rs2_id = r.array()?;
        r.skip(2 * SECRET_ID_SIZE)?;
        let public_value = r.take(key_agreement.public_value_size())?;
        Some(Self { h1, rs1_id, rs2_id, public_value })
    }

    pub fn secret_ids(&self) -> [&[u8; SECRET_ID_SIZE]; 2] {
        [&self.rs1_id, &self.rs2_id]
    }
}

/// The encrypted part of Confirm1 and Confirm2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfirmBody {
    pub h0: Image,
    pub sig_len: u16,
    pub flags: u8,
    /// Cache expiry interval in seconds, `0xFFFFFFFF` for never.
    pub expiry: u32,
}

impl ConfirmBody {
    fn encode(&self) -> Zeroizing<[u8; CONFIRM_PLAINTEXT_SIZE]> {
        let mut p = Zeroizing::new([0u8; CONFIRM_PLAINTEXT_SIZE]);
        p[..HASH_IMAGE_SIZE].copy_from_slice(&self.h0);
        p[33] = ((self.sig_len >> 8) & 1) as u8;
        p[34] = (self.sig_len & 0xff) as u8;
        p[35] = self.flags;
        p[36..40].copy_from_slice(&self.expiry.to_be_bytes());
        p
    }

    fn decode(plaintext: &[u8]) -> Option<Self> {
        let mut r = Reader::new(plaintext);
        let h0 = r.array()?;
        r.skip(1)?;
        let sig = r.array::<2>()?;
        let flags = r.u8()?;
        let expiry = r.u32()?;
        Some(Self { h0, sig_len: ((sig[0] as u16 & 1) << 8) | sig[1] as u16, flags, expiry })
    }
}

pub(crate) fn build_confirm<C: CryptoLayer>(
    rng: &mut C::Rng,
    message_type: &[u8; 8],
    hash: HashAlgorithm,
    keys: &ConfirmKeys,
    body: &ConfirmBody,
) -> Option<Vec<u8>> {
    let cipher = C::AesCfb::new(&keys.zrtp_key)?;
    let mut iv = [0u8; CFB_IV_SIZE];
    rng.fill_bytes(&mut iv);
    let mut ciphertext = *body.encode();
    cipher.encrypt_in_place(&iv, &mut ciphertext);
    let mac = hash.hmac::<C>(&keys.hmac_key, &ciphertext);

    let mut w = Writer::new(message_type);
    w.put(&mac[..MAC_SIZE]).put(&iv).put(&ciphertext);
    Some(w.finish(0))
}

/// Check the MAC over the ciphertext, then decrypt.
pub(crate) fn open_confirm<C: CryptoLayer>(
    msg: &[u8],
    hash: HashAlgorithm,
    keys: &ConfirmKeys,
) -> Result<ConfirmBody, FaultType> {
    if msg.len() < CONFIRM_MIN_SIZE {
        return Err(FaultType::InvalidPacket);
    }
    let mut r = Reader::at(msg, CONFIRM_MAC);
    let mac = r.take(MAC_SIZE).ok_or(FaultType::InvalidPacket)?;
    let iv = r.array::<CFB_IV_SIZE>().ok_or(FaultType::InvalidPacket)?;
    let ciphertext = &msg[CONFIRM_BODY..];
    if !secure_eq(&hash.hmac::<C>(&keys.hmac_key, ciphertext)[..MAC_SIZE], mac) {
        return Err(FaultType::FailedAuth);
    }
    let cipher = C::AesCfb::new(&keys.zrtp_key).ok_or(FaultType::InvalidPacket)?;
    let mut plaintext = Zeroizing::new(ciphertext.to_vec());
    cipher.decrypt_in_place(&iv, &mut plaintext);
    ConfirmBody::decode(&plaintext).ok_or(FaultType::InvalidPacket)
}

pub(crate) fn build_error(code: u16) -> Vec<u8> {
    let mut w = Writer::new(MSG_ERROR);
    w.put_u16(0).put_u16(code);
    w.finish(0)
}

pub(crate) fn parse_error(msg: &[u8]) -> Option<u16> {
    if msg.len() != ERROR_SIZE {
        return None;
    }
    Reader::at(msg, HEADER_SIZE + 2).u16()
}

#[test]
fn confirm_signature_length() {
    let body = ConfirmBody { h0: [9; 32], sig_len: 0x1ab, flags: FLAG_SAS_VERIFIED, expiry: 0xffff_ffff };
    let plain = body.encode();
    assert_eq!(plain[33], 1);
    assert_eq!(plain[34], 0xab);
    assert_eq!(ConfirmBody::decode(&*plain), Some(body));

    // Only the low bit of byte 33 counts.
    let mut p = *plain;
    p[33] = 0xfe;
    assert_eq!(ConfirmBody::decode(&p).unwrap().sig_len, 0xab);
    assert!(ConfirmBody::decode(&p[..39]).is_none());
}

#[test]
fn error_message_layout() {
    let msg = build_error(error_code::PROTOCOL_TIMEOUT);
    assert_eq!(msg.len(), ERROR_SIZE);
    assert_eq!(&msg[..4], &[0x50, 0x5a, 0x00, 0x04]);
    assert_eq!(&msg[4..12], MSG_ERROR);
    assert_eq!(parse_error(&msg), Some(0xb0));
    assert_eq!(parse_error(&msg[..12]), None);
    assert_eq!(build_simple(MSG_CONF2_ACK).len(), HEADER_SIZE);
}
