/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::crypto::*;

/// HMAC-SHA1 from the RustCrypto `hmac` and `sha1` crates.
pub struct CrateHmacSha1(Hmac<Sha1>);

impl Sha1Hmac for CrateHmacSha1 {
    fn new(key: &[u8]) -> Self {
        Self(<Hmac<Sha1> as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length"))
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self) -> [u8; SHA1_HMAC_SIZE] {
        self.0.finalize().into_bytes().into()
    }
}

#[test]
fn hmac_sha1_rfc2202_case2() {
    let mut mac = CrateHmacSha1::new(b"Jefe");
    mac.update(b"what do ya ");
    mac.update(b"want for nothing?");
    let out = mac.finish();
    let expected = [
        0xef, 0xfc, 0xdf, 0x6a, 0xe5, 0xeb, 0x2f, 0xa2, 0xd2, 0x74, 0x16, 0xd5, 0xf1, 0x84, 0xdf, 0x9c, 0x25, 0x9a, 0x7c,
        0x79,
    ];
    assert_eq!(out, expected);
}
