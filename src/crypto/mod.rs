/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
mod aes;
mod hash;
mod key_agreement;
mod secret;

pub use aes::*;
pub use hash::*;
pub use key_agreement::*;
pub use secret::*;

// We re-export our dependencies so it is less of a headache for the implementor to use the same
// exact version of them.
pub use rand_core;
pub use zeroize;
