/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use crate::crypto::*;

/// The version and type of the sha2 crate that the `Sha256Hash` trait is implemented for.
pub type CrateSha256 = Sha256;
impl Sha256Hash for CrateSha256 {
    fn new() -> Self {
        Digest::new()
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(self, data)
    }

    fn finish(self) -> [u8; SHA256_HASH_SIZE] {
        self.finalize().into()
    }

    fn hmac(key: &[u8], data: &[u8]) -> [u8; SHA256_HASH_SIZE] {
        let mut hm = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
        hm.update(data);
        hm.finalize().into_bytes().into()
    }
}

/// The version and type of the sha2 crate that the `Sha384Hash` trait is implemented for.
pub type CrateSha384 = Sha384;
impl Sha384Hash for CrateSha384 {
    fn new() -> Self {
        Digest::new()
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(self, data)
    }

    fn finish(self) -> [u8; SHA384_HASH_SIZE] {
        self.finalize().into()
    }

    fn hmac(key: &[u8], data: &[u8]) -> [u8; SHA384_HASH_SIZE] {
        let mut hm = <Hmac<Sha384> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
        hm.update(data);
        hm.finalize().into_bytes().into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex(b: &[u8]) -> String {
        b.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn sha256_abc() {
        let mut h = <CrateSha256 as Sha256Hash>::new();
        Sha256Hash::update(&mut h, b"abc");
        assert_eq!(
            hex(&Sha256Hash::finish(h)),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case2() {
        let mac = <CrateSha256 as Sha256Hash>::hmac(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(hex(&mac), "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }
}
