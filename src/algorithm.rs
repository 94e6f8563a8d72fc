/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use arrayvec::ArrayVec;

use crate::application::CryptoLayer;
use crate::crypto::*;

/// Largest output of any negotiable hash.
pub const MAX_HASH_SIZE: usize = SHA384_HASH_SIZE;

/// Output of a negotiated hash or HMAC, sized by the algorithm that produced it.
pub type Digest = ArrayVec<u8, MAX_HASH_SIZE>;

/// 4-byte algorithm symbol as it appears in Hello and Commit.
pub type Symbol = [u8; 4];

/// Negotiated hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    S256,
    S384,
}

impl HashAlgorithm {
    pub const fn symbol(self) -> &'static Symbol {
        match self {
            Self::S256 => b"S256",
            Self::S384 => b"S384",
        }
    }
    pub fn from_symbol(symbol: &[u8]) -> Option<Self> {
        match symbol {
            b"S256" => Some(Self::S256),
            b"S384" => Some(Self::S384),
            _ => None,
        }
    }
    pub const fn output_size(self) -> usize {
        match self {
            Self::S256 => SHA256_HASH_SIZE,
            Self::S384 => SHA384_HASH_SIZE,
        }
    }
    pub const fn bits(self) -> u32 {
        self.output_size() as u32 * 8
    }

    /// Hash the concatenation of `parts`.
    pub fn hash<C: CryptoLayer>(self, parts: &[&[u8]]) -> Digest {
        let mut out = Digest::new();
        match self {
            Self::S256 => {
                let mut h = C::Sha256::new();
                for p in parts {
                    h.update(p);
                }
                out.try_extend_from_slice(&h.finish()).ok();
            }
            Self::S384 => {
                let mut h = C::Sha384::new();
                for p in parts {
                    h.update(p);
                }
                out.try_extend_from_slice(&h.finish()).ok();
            }
        }
        out
    }

    pub fn hmac<C: CryptoLayer>(self, key: &[u8], data: &[u8]) -> Digest {
        let mut out = Digest::new();
        match self {
            Self::S256 => out.try_extend_from_slice(&C::Sha256::hmac(key, data)).ok(),
            Self::S384 => out.try_extend_from_slice(&C::Sha384::hmac(key, data)).ok(),
        };
        out
    }
}

/// Negotiated block cipher, used for Confirm encryption and as the SRTP cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes1,
    Aes3,
}

impl CipherAlgorithm {
    pub const fn symbol(self) -> &'static Symbol {
        match self {
            Self::Aes1 => b"AES1",
            Self::Aes3 => b"AES3",
        }
    }
    pub fn from_symbol(symbol: &[u8]) -> Option<Self> {
        match symbol {
            b"AES1" => Some(Self::Aes1),
            b"AES3" => Some(Self::Aes3),
            _ => None,
        }
    }
    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes1 => AES_128_KEY_SIZE,
            Self::Aes3 => AES_256_KEY_SIZE,
        }
    }
    pub const fn key_bits(self) -> u32 {
        self.key_size() as u32 * 8
    }
}

/// Negotiated key agreement type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAgreementAlgorithm {
    Dh3k,
    Ec25,
    Ec38,
}

impl KeyAgreementAlgorithm {
    pub const fn symbol(self) -> &'static Symbol {
        match self {
            Self::Dh3k => b"DH3k",
            Self::Ec25 => b"EC25",
            Self::Ec38 => b"EC38",
        }
    }
    pub fn from_symbol(symbol: &[u8]) -> Option<Self> {
        match symbol {
            b"DH3k" => Some(Self::Dh3k),
            b"EC25" => Some(Self::Ec25),
            b"EC38" => Some(Self::Ec38),
            _ => None,
        }
    }
    /// Length of the public value in 4-byte words.
    pub const fn public_value_words(self) -> usize {
        match self {
            Self::Dh3k => 96,
            Self::Ec25 => 16,
            Self::Ec38 => 24,
        }
    }
    pub const fn public_value_size(self) -> usize {
        self.public_value_words() * 4
    }
    /// Total DHPart1/2 size in bytes for this key agreement.
    pub const fn dhpart_size(self) -> usize {
        (self.public_value_words() + crate::proto::DHPART_FIXED_WORDS) * 4
    }
    /// Width older clients left-zero-pad the shared secret to before hashing it into s0.
    pub const fn legacy_secret_size(self) -> usize {
        self.public_value_size()
    }
}

/// Negotiated short authentication string rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SasAlgorithm {
    B32,
    B256,
}

impl SasAlgorithm {
    pub const fn symbol(self) -> &'static Symbol {
        match self {
            Self::B32 => b"B32 ",
            Self::B256 => b"B256",
        }
    }
    pub fn from_symbol(symbol: &[u8]) -> Option<Self> {
        match symbol {
            b"B32 " => Some(Self::B32),
            b"B256" => Some(Self::B256),
            _ => None,
        }
    }
}

/// SRTP authentication tag type. Only the 32-bit HMAC-SHA1 tag is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTagAlgorithm {
    Hs32,
}

impl AuthTagAlgorithm {
    pub const fn symbol(self) -> &'static Symbol {
        b"HS32"
    }
    pub fn from_symbol(symbol: &[u8]) -> Option<Self> {
        (symbol == b"HS32").then_some(Self::Hs32)
    }
    pub const fn tag_size(self) -> usize {
        4
    }
}

/// The algorithm set in use for one session. Frozen once a Commit is accepted or sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NegotiatedSet {
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub key_agreement: KeyAgreementAlgorithm,
    pub sas: SasAlgorithm,
    pub auth: AuthTagAlgorithm,
}

impl Default for NegotiatedSet {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::S256,
            cipher: CipherAlgorithm::Aes1,
            key_agreement: KeyAgreementAlgorithm::Dh3k,
            sas: SasAlgorithm::B32,
            auth: AuthTagAlgorithm::Hs32,
        }
    }
}

#[test]
fn symbols_round_trip() {
    for h in [HashAlgorithm::S256, HashAlgorithm::S384] {
        assert_eq!(HashAlgorithm::from_symbol(h.symbol()), Some(h));
    }
    for k in [KeyAgreementAlgorithm::Dh3k, KeyAgreementAlgorithm::Ec25, KeyAgreementAlgorithm::Ec38] {
        assert_eq!(KeyAgreementAlgorithm::from_symbol(k.symbol()), Some(k));
    }
    assert_eq!(SasAlgorithm::from_symbol(b"B32 "), Some(SasAlgorithm::B32));
    assert_eq!(CipherAlgorithm::from_symbol(b"AES2"), None);
    assert_eq!(KeyAgreementAlgorithm::Ec25.dhpart_size(), 148);
    assert_eq!(KeyAgreementAlgorithm::Ec38.dhpart_size(), 180);
    assert_eq!(KeyAgreementAlgorithm::Dh3k.dhpart_size(), 468);
}
