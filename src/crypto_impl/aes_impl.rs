/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use aes::cipher::{generic_array::GenericArray, AsyncStreamCipher, InnerIvInit, KeyInit, StreamCipher};
use aes::{Aes128, Aes256};

use crate::crypto::*;

/// AES from the RustCrypto `aes` crate, keyed as AES-128 or AES-256 by key length.
/// The modes come from the `ctr` and `cfb-mode` crates. Each call clones the expanded key
/// into a fresh mode instance.
#[derive(Clone)]
pub enum CrateAes {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl CrateAes {
    fn keyed(key: &[u8]) -> Option<Self> {
        match key.len() {
            AES_128_KEY_SIZE => Some(Self::Aes128(Aes128::new(GenericArray::from_slice(key)))),
            AES_256_KEY_SIZE => Some(Self::Aes256(Aes256::new(GenericArray::from_slice(key)))),
            _ => None,
        }
    }
}

impl AesCtr for CrateAes {
    fn new(key: &[u8]) -> Option<Self> {
        Self::keyed(key)
    }

    fn apply_keystream(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) {
        let iv = GenericArray::from_slice(iv);
        match self {
            Self::Aes128(c) => ctr::Ctr128BE::<Aes128>::from_core(ctr::CtrCore::inner_iv_init(c.clone(), iv)).apply_keystream(data),
            Self::Aes256(c) => ctr::Ctr128BE::<Aes256>::from_core(ctr::CtrCore::inner_iv_init(c.clone(), iv)).apply_keystream(data),
        }
    }
}

impl AesCfb for CrateAes {
    fn new(key: &[u8]) -> Option<Self> {
        Self::keyed(key)
    }

    fn encrypt_in_place(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) {
        let iv = GenericArray::from_slice(iv);
        match self {
            Self::Aes128(c) => cfb_mode::Encryptor::<Aes128>::inner_iv_init(c.clone(), iv).encrypt(data),
            Self::Aes256(c) => cfb_mode::Encryptor::<Aes256>::inner_iv_init(c.clone(), iv).encrypt(data),
        }
    }

    fn decrypt_in_place(&self, iv: &[u8; AES_BLOCK_SIZE], data: &mut [u8]) {
        let iv = GenericArray::from_slice(iv);
        match self {
            Self::Aes128(c) => cfb_mode::Decryptor::<Aes128>::inner_iv_init(c.clone(), iv).decrypt(data),
            Self::Aes256(c) => cfb_mode::Decryptor::<Aes256>::inner_iv_init(c.clone(), iv).decrypt(data),
        }
    }
}
