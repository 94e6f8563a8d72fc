/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use rand_core::{CryptoRng, RngCore};

use crate::crypto::*;
use crate::proto::{SecurityWarning, CLIENT_ID, CLIENT_ID_SIZE};

/// Which retained secret becomes the new `rs2` when the cache is updated after a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rs2Policy {
    /// Keep the previous `rs1` as the new `rs2`. This is the behavior described by RFC 6189.
    PreviousRs1,
    /// Keep the retained secret that was actually matched during this session (`s1`) as the new
    /// `rs2`, falling back to the previous `rs1` when nothing matched. This variant avoids one
    /// rare cache desynchronization at the cost of another.
    MatchedSecret,
}

/// The set of key agreement types this endpoint will offer in its Hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyAgreementSet {
    pub ec38: bool,
    pub ec25: bool,
    pub dh3k: bool,
}

/// A container for the dynamic settings of a ZRTP session, including all time-based settings.
/// If the user wishes to measure time in units other than milliseconds for some reason, then they
/// can create an adjusted version of this struct with those units, and use it instead of the
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// First Hello retransmission interval.
    pub t1_initial: i64,
    /// Ceiling the doubling Hello retransmission interval never exceeds.
    pub t1_maximum: i64,
    /// How many times Hello is resent without a HelloACK before the session fails.
    pub t1_max_retransmissions: u32,
    /// First retransmission interval of the initiator's Commit, DHPart2 and Confirm2.
    pub t2_initial: i64,
    /// Ceiling the doubling initiator retransmission interval never exceeds.
    pub t2_maximum: i64,
    /// How many times the initiator resends a message before the session fails.
    pub t2_max_retransmissions: u32,
    /// The responder does not retransmit. Instead it fails the session if nothing is received
    /// from the initiator for this long.
    pub responder_timeout: i64,
    /// Cache expiration interval advertised to the peer in our Confirm message, in seconds.
    /// `0xFFFFFFFF` means the retained secret never expires.
    pub cache_expiry_seconds: u32,
    /// Key agreement types to offer.
    pub key_agreements: KeyAgreementSet,
    /// Never send Commit; wait for the peer to commit so that we are always the responder.
    pub force_responder: bool,
    /// Retained secret rotation policy.
    pub rs2_policy: Rs2Policy,
    /// Client identifier announced in our Hello. A peer that sees the legacy identifier pads
    /// the ECDH result before hashing it into s0.
    pub client_id: [u8; CLIENT_ID_SIZE],
}
impl Settings {
    /// Default value for `t1_initial`, 50 ms.
    pub const T1_INITIAL_MS: i64 = 50;
    /// Default value for `t1_maximum`, 200 ms.
    pub const T1_MAXIMUM_MS: i64 = 200;
    /// Default value for `t1_max_retransmissions`.
    pub const T1_MAX_RETRANSMISSIONS: u32 = 200;
    /// Default value for `t2_initial`, 150 ms.
    pub const T2_INITIAL_MS: i64 = 150;
    /// Default value for `t2_maximum`, 1.2 seconds.
    pub const T2_MAXIMUM_MS: i64 = 1200;
    /// Default value for `t2_max_retransmissions`.
    pub const T2_MAX_RETRANSMISSIONS: u32 = 10;
    /// Default value for `responder_timeout`, 40 seconds in ms.
    pub const RESPONDER_TIMEOUT_MS: i64 = 40 * 1000;
    /// Default value for `cache_expiry_seconds`, never expire.
    pub const CACHE_EXPIRY_NEVER: u32 = 0xffff_ffff;

    /// Create an instance of Settings with all default values.
    /// These defaults are in units of milliseconds, so if these defaults are used, `App::time`
    /// must return timestamps in units of milliseconds as well.
    pub const fn new_ms() -> Self {
        Self {
            t1_initial: Self::T1_INITIAL_MS,
            t1_maximum: Self::T1_MAXIMUM_MS,
            t1_max_retransmissions: Self::T1_MAX_RETRANSMISSIONS,
            t2_initial: Self::T2_INITIAL_MS,
            t2_maximum: Self::T2_MAXIMUM_MS,
            t2_max_retransmissions: Self::T2_MAX_RETRANSMISSIONS,
            responder_timeout: Self::RESPONDER_TIMEOUT_MS,
            cache_expiry_seconds: Self::CACHE_EXPIRY_NEVER,
            key_agreements: KeyAgreementSet { ec38: true, ec25: true, dh3k: false },
            force_responder: false,
            rs2_policy: Rs2Policy::PreviousRs1,
            client_id: *CLIENT_ID,
        }
    }
}
impl Default for Settings {
    fn default() -> Self {
        Self::new_ms()
    }
}

/// Trait to implement to supply the cryptographic primitives.
///
/// ZRTP only composes these into the protocol. The `default-crypto` feature provides an
/// implementation for any type implementing `crypto_impl::DefaultCrypto`.
pub trait CryptoLayer: Sized {
    /// Settings used by `Session::new`. `Session::with_settings` overrides them per session.
    const SETTINGS: Settings = Settings::new_ms();

    /// The random number generator used for ZIDs, hash chains, key pairs and IVs.
    type Rng: CryptoRng + RngCore;

    /// SHA-256, used for the hash chain and implicit MACs and as the default negotiated hash.
    type Sha256: Sha256Hash;
    /// SHA-384, negotiated alongside ECDH P-384.
    type Sha384: Sha384Hash;
    /// HMAC-SHA1 for SRTP authentication tags.
    type HmacSha1: Sha1Hmac;
    /// AES-128/256 counter mode for the SRTP keystream and key derivation.
    type AesCtr: AesCtr;
    /// AES-128/256 cipher feedback mode for Confirm messages.
    type AesCfb: AesCfb;

    /// ECDH over NIST P-256 ("EC25").
    type Ec25: KeyAgreement<Self::Rng>;
    /// ECDH over NIST P-384 ("EC38").
    type Ec38: KeyAgreement<Self::Rng>;
    /// Finite field Diffie-Hellman over the 3072-bit MODP group ("DH3k").
    type Dh3k: KeyAgreement<Self::Rng>;
}

/// A shared secret cache record as held by the application's persistent store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Opaque record bytes. The application must return them exactly as they were saved.
    pub data: Vec<u8>,
    /// Phone number bound to the record, if any.
    pub phone_number: Option<String>,
}

/// Trait to implement to integrate a ZRTP session into an application.
///
/// Templating the session on this trait lets the code here be almost entirely transport, OS,
/// and use case independent.
pub trait ApplicationLayer<C: CryptoLayer>: Sized {
    /// Should return the current time in milliseconds. Used for retransmission, the responder
    /// timeout and retained secret expiry, so it should not jump backwards.
    fn time(&mut self) -> i64;

    /// Send a fully formed ZRTP message to the peer. This must not block.
    fn send_zrtp(&mut self, message: &[u8]);

    /// Seed the sequence number of the first outgoing ZRTP packet.
    #[allow(unused)]
    fn set_next_zrtp_sequence_number(&mut self, sequence_number: u16) {}
    /// The peer has been seen masquerading ZRTP packets as RTP; the transport should do the same.
    fn set_masquerading_active(&mut self) {}
    /// The transport should send ZRTP packets both plainly and masqueraded.
    fn set_masquerading_dual(&mut self) {}

    /// Load the record stored under `key`, or `Ok(None)` if there is none.
    fn load_record(&mut self, key: &str) -> Result<Option<StoredRecord>, std::io::Error>;
    /// Store `data` under `key`, replacing any previous record.
    fn save_record(&mut self, key: &str, data: &[u8], phone_number: Option<&str>) -> Result<(), std::io::Error>;
    /// Remove the record stored under `key`.
    fn remove_record(&mut self, key: &str) -> Result<(), std::io::Error>;
    /// List every key currently in the store.
    fn record_keys(&mut self) -> Result<Vec<String>, std::io::Error>;

    /// Whether `number` is a contact the user has independently verified. A retained secret is only
    /// reported as trusted if its bound phone number passes this check.
    #[allow(unused)]
    fn is_in_address_book(&mut self, number: &str) -> bool {
        false
    }
    /// Fuzzy phone number equality, for example ignoring country prefixes and formatting.
    fn matching_numbers(&mut self, a: &str, b: &str) -> bool {
        a == b
    }

    /// Called once the key exchange has produced SRTP master keys. Both key/salt pairs are from
    /// this endpoint's point of view. Returning `false` fails the session.
    fn key_exchange_completed(
        &mut self,
        tx_master_key: &[u8],
        tx_master_salt: &[u8],
        rx_master_key: &[u8],
        rx_master_salt: &[u8],
        first_sequence_number: u16,
    ) -> bool;

    /// A security relevant event occurred. Each kind is reported at most once per session.
    fn security_warning(&mut self, warning: SecurityWarning, text: &str);

    /// The session ended, successfully or not. Called exactly once per started session.
    fn session_completed(&mut self, success: bool, message: Option<&str>);

    /// Receives a stream of events that occur during ZRTP negotiation.
    /// These are provided for debugging, logging or metrics purposes, and must be used for
    /// nothing else. Do not base protocol-level decisions upon the events passed to this function.
    #[cfg(feature = "logging")]
    #[allow(unused)]
    fn event_log(&mut self, event: crate::LogEvent<'_>) {}
}
