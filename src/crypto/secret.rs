/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use zeroize::Zeroize;

/// Compare two byte strings without branching on their contents.
/// Strings of different length are unequal.
pub fn secure_eq<A: AsRef<[u8]> + ?Sized, B: AsRef<[u8]> + ?Sized>(a: &A, b: &B) -> bool {
    let (a, b) = (a.as_ref(), b.as_ref());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A fixed size secret such as a hash chain link or a retained secret, wiped when dropped.
#[derive(Clone)]
pub struct Secret<const L: usize>(pub [u8; L]);

impl<const L: usize> Secret<L> {
    pub fn new() -> Self {
        Self([0; L])
    }

    /// `None` unless `b` is exactly `L` bytes.
    pub fn from_slice(b: &[u8]) -> Option<Self> {
        Some(Self(b.try_into().ok()?))
    }

    pub fn as_bytes(&self) -> &[u8; L] {
        &self.0
    }
}

impl<const L: usize> Default for Secret<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const L: usize> Drop for Secret<L> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<const L: usize> AsRef<[u8]> for Secret<L> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const L: usize> AsMut<[u8]> for Secret<L> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl<const L: usize> PartialEq for Secret<L> {
    fn eq(&self, other: &Self) -> bool {
        secure_eq(&self.0, &other.0)
    }
}
impl<const L: usize> Eq for Secret<L> {}

impl<const L: usize> std::fmt::Debug for Secret<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret<{}>(..)", L)
    }
}

#[test]
fn secure_eq_lengths() {
    assert!(secure_eq(&[1u8, 2, 3], &[1u8, 2, 3]));
    assert!(!secure_eq(&[1u8, 2, 3], &[1u8, 2, 4]));
    assert!(!secure_eq(&[1u8, 2, 3], &[1u8, 2]));
    assert!(Secret::<4>::from_slice(&[0u8; 3]).is_none());
    assert_eq!(Secret::<4>::from_slice(&[7u8; 4]).unwrap().as_bytes(), &[7u8; 4]);
}
