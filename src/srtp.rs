/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use zeroize::Zeroizing;

use crate::antireplay::ReplayWindow;
use crate::application::CryptoLayer;
use crate::codec::Reader;
use crate::crypto::*;
use crate::result::{SrtpError, SrtpStartError};

/// Size of an SRTP master salt and of the derived session salt.
pub const SRTP_SALT_SIZE: usize = 14;
/// Size of the derived HMAC-SHA1 session authentication key.
pub const SRTP_AUTH_KEY_SIZE: usize = 20;
/// Size of the truncated HMAC-SHA1 tag appended to each packet.
pub const SRTP_TAG_SIZE: usize = 4;
pub const RTP_HEADER_MIN_SIZE: usize = 12;
/// Default key derivation rate.
pub const SRTP_DEFAULT_KDR: u32 = 48;

const LABEL_ENCRYPTION: u8 = 0x00;
const LABEL_AUTHENTICATION: u8 = 0x01;
const LABEL_SALT: u8 = 0x02;

/// The rollover counter is kept pre-shifted by 16 bits so that `roc + seq` is the packet index.
const ROC_STEP: u64 = 0x10000;

/// The AES counter mode PRF of RFC 3711 section 4.3.3, for packet index zero.
///
/// Fills `out` with keystream from `IV = (master_salt XOR label << 48) * 2^16`.
pub fn prf<C: CryptoLayer>(master_key: &[u8], master_salt: &[u8; SRTP_SALT_SIZE], label: u8, out: &mut [u8]) -> bool {
    let Some(cipher) = C::AesCtr::new(master_key) else {
        return false;
    };
    let mut iv = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
    iv[..SRTP_SALT_SIZE].copy_from_slice(master_salt);
    iv[7] ^= label;
    out.fill(0);
    cipher.apply_keystream(&iv, out);
    true
}

/// Session keys derived for one direction.
struct StreamKeys<C: CryptoLayer> {
    cipher: C::AesCtr,
    auth_key: Zeroizing<[u8; SRTP_AUTH_KEY_SIZE]>,
    salt: Zeroizing<[u8; SRTP_SALT_SIZE]>,
}

impl<C: CryptoLayer> StreamKeys<C> {
    fn derive(master: &MasterKey) -> Option<Self> {
        let salt = master.salt.as_ref()?;
        let key = master.key.as_ref()?;
        let mut enc_key = Zeroizing::new(vec![0u8; key.len()]);
        let mut auth_key = Zeroizing::new([0u8; SRTP_AUTH_KEY_SIZE]);
        let mut session_salt = Zeroizing::new([0u8; SRTP_SALT_SIZE]);
        if !(prf::<C>(key, salt, LABEL_ENCRYPTION, &mut enc_key)
            && prf::<C>(key, salt, LABEL_AUTHENTICATION, auth_key.as_mut())
            && prf::<C>(key, salt, LABEL_SALT, session_salt.as_mut()))
        {
            return None;
        }
        Some(Self { cipher: C::AesCtr::new(&enc_key)?, auth_key, salt: session_salt })
    }

    fn packet_iv(&self, ssrc: u32, seq: u16, roc: u64) -> [u8; AES_BLOCK_SIZE] {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        iv[..SRTP_SALT_SIZE].copy_from_slice(self.salt.as_ref());
        for (b, s) in iv[4..8].iter_mut().zip(ssrc.to_be_bytes()) {
            *b ^= s;
        }
        for (b, r) in iv[8..12].iter_mut().zip(((roc >> 16) as u32).to_be_bytes()) {
            *b ^= r;
        }
        for (b, s) in iv[12..14].iter_mut().zip(seq.to_be_bytes()) {
            *b ^= s;
        }
        iv
    }

    fn tag(&self, authenticated: &[u8], roc: u64) -> [u8; SRTP_TAG_SIZE] {
        let mut mac = C::HmacSha1::new(self.auth_key.as_ref());
        mac.update(authenticated);
        mac.update(&((roc >> 16) as u32).to_be_bytes());
        let full = mac.finish();
        let mut tag = [0u8; SRTP_TAG_SIZE];
        tag.copy_from_slice(&full[..SRTP_TAG_SIZE]);
        tag
    }
}

#[derive(Default)]
struct MasterKey {
    key: Option<Zeroizing<Vec<u8>>>,
    salt: Option<Zeroizing<[u8; SRTP_SALT_SIZE]>>,
}

impl MasterKey {
    fn set_key(&mut self, key: &[u8]) -> bool {
        if key.len() == AES_128_KEY_SIZE || key.len() == AES_256_KEY_SIZE {
            self.key = Some(Zeroizing::new(key.to_vec()));
            true
        } else {
            false
        }
    }
    fn set_salt(&mut self, salt: &[u8]) -> bool {
        match salt.try_into() {
            Ok(salt) => {
                self.salt = Some(Zeroizing::new(salt));
                true
            }
            Err(_) => false,
        }
    }
}

/// The fields of an RTP header the transform needs.
struct RtpHeader {
    len: usize,
    seq: u16,
    ssrc: u32,
}

/// Parse the fixed header, CSRC list and header extension.
fn parse_rtp_header(packet: &[u8]) -> Option<RtpHeader> {
    let mut r = Reader::new(packet);
    let flags = r.u8()?;
    r.skip(1)?;
    let seq = r.u16()?;
    r.skip(4)?;
    let ssrc = r.u32()?;
    r.skip(4 * (flags & 0x0f) as usize)?;
    if flags & 0x10 != 0 {
        r.skip(2)?;
        let words = r.u16()? as usize;
        r.skip(4 * words)?;
    }
    Some(RtpHeader { len: packet.len() - r.remaining(), seq, ssrc })
}

/// The sending half of an SRTP session.
pub struct SrtpSender<C: CryptoLayer> {
    master: MasterKey,
    keys: Option<StreamKeys<C>>,
    roc: u64,
}

impl<C: CryptoLayer> SrtpSender<C> {
    fn new() -> Self {
        Self { master: MasterKey::default(), keys: None, roc: 0 }
    }

    /// Encrypt the payload of the RTP packet in place and append the authentication tag.
    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        let keys = self.keys.as_ref().ok_or(SrtpError::NotStarted)?;
        if packet.is_empty() {
            return Err(SrtpError::NullPacket);
        }
        let header = parse_rtp_header(packet).ok_or(SrtpError::NullPacket)?;
        if header.seq == 0 {
            self.roc += ROC_STEP;
        }
        let iv = keys.packet_iv(header.ssrc, header.seq, self.roc);
        keys.cipher.apply_keystream(&iv, &mut packet[header.len..]);
        let tag = keys.tag(packet, self.roc);
        packet.extend_from_slice(&tag);
        Ok(())
    }
}

/// The receiving half of an SRTP session.
pub struct SrtpReceiver<C: CryptoLayer> {
    master: MasterKey,
    keys: Option<StreamKeys<C>>,
    started: bool,
    received_first: bool,
    previous_ssrc: u32,
    roc: u64,
    seq: u16,
    window: ReplayWindow,
}

impl<C: CryptoLayer> SrtpReceiver<C> {
    fn new() -> Self {
        Self {
            master: MasterKey::default(),
            keys: None,
            started: false,
            received_first: false,
            previous_ssrc: 0,
            roc: 0,
            seq: 0,
            window: ReplayWindow::new(),
        }
    }

    /// The rollover counter estimate `v` for a received sequence number, RFC 3711 appendix A.
    /// `None` if the estimate would precede the very first rollover period.
    fn estimate_roc(&self, seq: u16) -> Option<u64> {
        let (seq, last) = (seq as i32, self.seq as i32);
        if last < 0x8000 {
            if seq - last > 0x8000 {
                return self.roc.checked_sub(ROC_STEP);
            }
        } else if last - 0x8000 > seq {
            return Some(self.roc + ROC_STEP);
        }
        Some(self.roc)
    }

    /// Authenticate the RTP packet, check it against the replay window, then decrypt its
    /// payload in place and strip the tag.
    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if !self.started {
            return Err(SrtpError::NotStarted);
        }
        if packet.is_empty() {
            return Err(SrtpError::NullPacket);
        }
        let header = parse_rtp_header(packet).ok_or(SrtpError::NullPacket)?;
        if packet.len() < header.len + SRTP_TAG_SIZE {
            return Err(SrtpError::InvalidAuth);
        }

        if self.previous_ssrc != header.ssrc {
            self.previous_ssrc = header.ssrc;
            self.roc = 0;
            self.seq = header.seq;
            self.window.reset(header.seq as u64);
        }
        if !self.received_first {
            self.received_first = true;
            self.seq = header.seq;
            self.window.reset(self.roc + header.seq as u64);
            self.keys = Some(StreamKeys::derive(&self.master).ok_or(SrtpError::KeyDerivation)?);
        }
        let keys = self.keys.as_ref().ok_or(SrtpError::KeyDerivation)?;

        let v = self.estimate_roc(header.seq).ok_or(SrtpError::Replayed)?;
        let index = v + header.seq as u64;
        if !self.window.check(index) {
            return Err(SrtpError::Replayed);
        }

        let body_end = packet.len() - SRTP_TAG_SIZE;
        let expected = keys.tag(&packet[..body_end], v);
        if !secure_eq(&expected, &packet[body_end..]) {
            return Err(SrtpError::InvalidAuth);
        }
        let iv = keys.packet_iv(header.ssrc, header.seq, v);
        keys.cipher.apply_keystream(&iv, &mut packet[header.len..body_end]);
        packet.truncate(body_end);

        self.window.update(index);
        if v == self.roc {
            if header.seq > self.seq {
                self.seq = header.seq;
            }
        } else if v == self.roc + ROC_STEP {
            self.roc = v;
            self.seq = header.seq;
        }
        Ok(())
    }
}

/// An SRTP packet transform for one call leg: AES counter mode encryption with 32-bit
/// HMAC-SHA1 authentication tags and replay protection.
///
/// Master keys come from ZRTP's `key_exchange_completed` callback. Transmit session keys are
/// derived when the session starts, receive session keys when the first packet arrives.
pub struct SrtpSession<C: CryptoLayer> {
    tx: SrtpSender<C>,
    rx: SrtpReceiver<C>,
    kdr: u32,
    first_rtp_seq: u16,
}

impl<C: CryptoLayer> SrtpSession<C> {
    pub fn new() -> Self {
        Self { tx: SrtpSender::new(), rx: SrtpReceiver::new(), kdr: SRTP_DEFAULT_KDR, first_rtp_seq: 1 }
    }

    /// Set all four master values at once, in the order `key_exchange_completed` reports them.
    /// Returns false if any has the wrong length: keys must be 16 or 32 bytes, salts 14.
    pub fn set_master_keys(&mut self, tx_key: &[u8], tx_salt: &[u8], rx_key: &[u8], rx_salt: &[u8]) -> bool {
        self.set_tx_master_key(tx_key)
            & self.set_tx_master_salt(tx_salt)
            & self.set_rx_master_key(rx_key)
            & self.set_rx_master_salt(rx_salt)
    }
    pub fn set_tx_master_key(&mut self, key: &[u8]) -> bool {
        self.tx.master.set_key(key)
    }
    pub fn set_tx_master_salt(&mut self, salt: &[u8]) -> bool {
        self.tx.master.set_salt(salt)
    }
    pub fn set_rx_master_key(&mut self, key: &[u8]) -> bool {
        self.rx.master.set_key(key)
    }
    pub fn set_rx_master_salt(&mut self, salt: &[u8]) -> bool {
        self.rx.master.set_salt(salt)
    }

    /// Derive the transmit session keys and reset both directions.
    pub fn start_new_session(&mut self) -> Result<(), SrtpStartError> {
        if self.tx.keys.is_some() {
            return Err(SrtpStartError::AlreadyActive);
        }
        if self.tx.master.salt.is_none() || self.rx.master.salt.is_none() {
            return Err(SrtpStartError::SaltUndefined);
        }
        if self.tx.master.key.is_none() || self.rx.master.key.is_none() {
            return Err(SrtpStartError::KeyUndefined);
        }
        self.tx.keys = Some(StreamKeys::derive(&self.tx.master).ok_or(SrtpStartError::KeyDerivationFailed)?);
        self.tx.roc = 0;
        self.rx.keys = None;
        self.rx.started = true;
        self.rx.received_first = false;
        self.rx.roc = 0;
        self.rx.window.reset(0);
        Ok(())
    }

    /// Drop the session keys and replay state. Master keys are kept so that a new session can
    /// be started from them.
    pub fn end_session(&mut self) {
        self.tx.keys = None;
        self.tx.roc = 0;
        self.rx.keys = None;
        self.rx.started = false;
        self.rx.received_first = false;
        self.rx.roc = 0;
        self.rx.window.reset(0);
        self.first_rtp_seq = 1;
    }

    pub fn is_active(&self) -> bool {
        self.tx.keys.is_some()
    }

    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        self.tx.protect(packet)
    }

    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        self.rx.unprotect(packet)
    }

    /// Borrow the two directions separately, for example to hand them to different threads.
    pub fn split(&mut self) -> (&mut SrtpSender<C>, &mut SrtpReceiver<C>) {
        (&mut self.tx, &mut self.rx)
    }

    /// Set the key derivation rate, 1 through 64. Session keys are only derived once per
    /// direction, so this is recorded for the application but does not trigger rekeying.
    pub fn set_kdr(&mut self, kdr: u32) -> bool {
        if (1..=64).contains(&kdr) {
            self.kdr = kdr;
            true
        } else {
            false
        }
    }
    pub fn kdr(&self) -> u32 {
        self.kdr
    }

    /// Preset the sequence number of the first transmitted packet. Ignored while a session is
    /// active.
    pub fn set_first_rtp_seq_num(&mut self, seq: u16) {
        if self.tx.keys.is_none() {
            self.first_rtp_seq = seq;
        }
    }
    pub fn first_rtp_seq_num(&self) -> u16 {
        self.first_rtp_seq
    }
}

impl<C: CryptoLayer> Default for SrtpSession<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_parsing() {
        let mut p = vec![0x80, 0x00, 0x12, 0x34, 0, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef, 1, 2];
        let h = parse_rtp_header(&p).unwrap();
        assert_eq!((h.len, h.seq, h.ssrc), (12, 0x1234, 0xdeadbeef));

        // Two CSRCs and a one word extension.
        p[0] = 0x92;
        p.truncate(12);
        p.extend_from_slice(&[0; 8]);
        p.extend_from_slice(&[0xbe, 0xde, 0x00, 0x01, 9, 9, 9, 9, 7]);
        assert_eq!(parse_rtp_header(&p).unwrap().len, 28);
        p.truncate(25);
        assert!(parse_rtp_header(&p).is_none());
        assert!(parse_rtp_header(&[0x80; 11]).is_none());
    }
}

#[cfg(all(test, feature = "default-crypto"))]
mod crypto_test {
    use super::*;
    use crate::crypto_impl::*;

    struct C;
    impl DefaultCrypto for C {}

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap()).collect()
    }

    fn rtp(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x80, 0x60];
        p.extend_from_slice(&seq.to_be_bytes());
        p.extend_from_slice(&0x1122_3344u32.to_be_bytes());
        p.extend_from_slice(&ssrc.to_be_bytes());
        p.extend_from_slice(payload);
        p
    }

    fn pair() -> (SrtpSession<C>, SrtpSession<C>) {
        let (ka, sa, kb, sb) = ([1u8; 32], [2u8; 14], [3u8; 32], [4u8; 14]);
        let mut a = SrtpSession::<C>::new();
        let mut b = SrtpSession::<C>::new();
        assert!(a.set_master_keys(&ka, &sa, &kb, &sb));
        assert!(b.set_master_keys(&kb, &sb, &ka, &sa));
        assert_eq!(a.start_new_session(), Ok(()));
        assert_eq!(b.start_new_session(), Ok(()));
        (a, b)
    }

    #[test]
    fn rfc3711_keystream() {
        // RFC 3711 appendix B.2.
        let key = unhex("2B7E151628AED2A6ABF7158809CF4F3C");
        let salt: [u8; 14] = unhex("F0F1F2F3F4F5F6F7F8F9FAFBFCFD").try_into().unwrap();
        let cipher = <<C as CryptoLayer>::AesCtr as AesCtr>::new(&key).unwrap();
        let mut iv = [0u8; 16];
        iv[..14].copy_from_slice(&salt);
        let mut out = [0u8; 48];
        cipher.apply_keystream(&iv, &mut out);
        assert_eq!(
            out.to_vec(),
            unhex("E03EAD0935C95E80E166B16DD92B4EB4D23513162B02D0F72A43A2FE4A5F97AB41E95B3BB0A2E8DD477901E4FCA894C0")
        );
    }

    #[test]
    fn rfc3711_key_derivation() {
        // RFC 3711 appendix B.3.
        let key = unhex("E1F97A0D3E018BE0D64FA32C06DE4139");
        let salt: [u8; 14] = unhex("0EC675AD498AFEEBB6960B3AABE6").try_into().unwrap();
        let mut enc = [0u8; 16];
        let mut session_salt = [0u8; 14];
        assert!(prf::<C>(&key, &salt, LABEL_ENCRYPTION, &mut enc));
        assert!(prf::<C>(&key, &salt, LABEL_SALT, &mut session_salt));
        assert_eq!(enc.to_vec(), unhex("C61E7A93744F39EE10734AFE3FF7A087"));
        assert_eq!(session_salt.to_vec(), unhex("30CBBC08863D8C85D49DB34A9AE1"));
    }

    #[test]
    fn round_trip_every_length() {
        let (mut a, mut b) = pair();
        for len in 0..=80usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let original = rtp(100 + len as u16, 0xcafe, &payload);
            let mut p = original.clone();
            a.protect(&mut p).unwrap();
            assert_eq!(p.len(), original.len() + SRTP_TAG_SIZE);
            if len >= 16 {
                assert_ne!(&p[12..12 + len], &payload[..]);
            }
            b.unprotect(&mut p).unwrap();
            assert_eq!(p, original);
        }
    }

    #[test]
    fn tampering_and_replay() {
        let (mut a, mut b) = pair();
        let mut p = rtp(7, 1, b"hello srtp");
        a.protect(&mut p).unwrap();

        let mut bad = p.clone();
        bad[14] ^= 1;
        assert_eq!(b.unprotect(&mut bad), Err(SrtpError::InvalidAuth));

        let mut first = p.clone();
        b.unprotect(&mut first).unwrap();
        let mut again = p.clone();
        assert_eq!(b.unprotect(&mut again), Err(SrtpError::Replayed));

        assert_eq!(b.unprotect(&mut Vec::new()), Err(SrtpError::NullPacket));
        let mut short = rtp(8, 1, &[1, 2]);
        assert_eq!(b.unprotect(&mut short), Err(SrtpError::InvalidAuth));
    }

    #[test]
    fn sequence_wrap_and_reordering() {
        let (mut a, mut b) = pair();
        let seqs: Vec<u16> = (0xfff0..=0xffffu16).chain(0..16).collect();
        let mut sent = Vec::new();
        for &s in &seqs {
            let mut p = rtp(s, 9, &[s as u8; 20]);
            a.protect(&mut p).unwrap();
            sent.push((s, p));
        }
        // Deliver pairwise swapped.
        for pair in sent.chunks(2) {
            for (s, p) in pair.iter().rev() {
                let mut p = p.clone();
                b.unprotect(&mut p).unwrap();
                assert_eq!(&p[12..], &[*s as u8; 20]);
            }
        }
    }

    #[test]
    fn session_lifecycle_codes() {
        let mut s = SrtpSession::<C>::new();
        let mut p = rtp(1, 1, &[0; 4]);
        assert_eq!(s.protect(&mut p), Err(SrtpError::NotStarted));
        assert_eq!(s.unprotect(&mut p), Err(SrtpError::NotStarted));
        assert_eq!(s.start_new_session(), Err(SrtpStartError::SaltUndefined));
        assert!(s.set_tx_master_salt(&[0; 14]) && s.set_rx_master_salt(&[0; 14]));
        assert_eq!(s.start_new_session(), Err(SrtpStartError::KeyUndefined));
        assert!(!s.set_tx_master_key(&[0; 24]));
        assert!(s.set_tx_master_key(&[0; 16]) && s.set_rx_master_key(&[0; 32]));
        assert_eq!(s.start_new_session(), Ok(()));
        assert_eq!(s.start_new_session(), Err(SrtpStartError::AlreadyActive));
        assert_eq!(SrtpStartError::AlreadyActive.code(), -3);
        assert_eq!(SrtpError::Replayed.code(), -5);
        assert_eq!(s.protect(&mut Vec::new()), Err(SrtpError::NullPacket));

        s.set_first_rtp_seq_num(77);
        assert_eq!(s.first_rtp_seq_num(), 1);
        s.end_session();
        s.set_first_rtp_seq_num(77);
        assert_eq!(s.first_rtp_seq_num(), 77);
        assert!(!s.set_kdr(0) && !s.set_kdr(65) && s.set_kdr(64));
        assert_eq!(s.kdr(), 64);
        assert_eq!(s.start_new_session(), Ok(()));
    }

    /// A provider whose counter mode refuses every key.
    struct NoAes;
    struct RefusingCtr;
    impl AesCtr for RefusingCtr {
        fn new(_: &[u8]) -> Option<Self> {
            None
        }
        fn apply_keystream(&self, _: &[u8; AES_BLOCK_SIZE], _: &mut [u8]) {}
    }
    impl CryptoLayer for NoAes {
        type Rng = rand_core::OsRng;
        type Sha256 = CrateSha256;
        type Sha384 = CrateSha384;
        type HmacSha1 = CrateHmacSha1;
        type AesCtr = RefusingCtr;
        type AesCfb = CrateAes;
        type Ec25 = CrateP256KeyPair;
        type Ec38 = CrateP384KeyPair;
        type Dh3k = Unavailable;
    }

    #[test]
    fn failed_key_derivation_is_reported() {
        let mut s = SrtpSession::<NoAes>::new();
        assert!(s.set_master_keys(&[1; 16], &[2; 14], &[3; 16], &[4; 14]));
        assert_eq!(s.start_new_session(), Err(SrtpStartError::KeyDerivationFailed));
        assert_eq!(SrtpStartError::KeyDerivationFailed.code(), -99);
        let mut p = rtp(1, 1, &[0; 4]);
        assert_eq!(s.protect(&mut p), Err(SrtpError::NotStarted));
    }
}
