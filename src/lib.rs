/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
pub mod crypto;
pub mod crypto_impl;

pub mod algorithm;
mod antireplay;
pub mod application;
mod cache;
mod codec;
mod kdf;
mod log_event;
mod message;
pub mod proto;
pub mod result;
pub mod sas;
mod session;
pub mod srtp;
mod zrtp;

pub use crate::algorithm::NegotiatedSet;
pub use crate::application::{ApplicationLayer, CryptoLayer, KeyAgreementSet, Rs2Policy, Settings, StoredRecord};
pub use crate::cache::{zid_key, CacheRecord};
pub use crate::log_event::*;
pub use crate::proto::{SecurityWarning, ZrtpState};
pub use crate::result::{FaultType, ReceiveError, ReceiveOk, SessionEvent, SrtpError, SrtpStartError};
pub use crate::session::{Session, TimerToken};
pub use crate::srtp::SrtpSession;
