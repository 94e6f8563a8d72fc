/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::io;

use arrayvec::ArrayVec;
use rand_core::RngCore;
use zeroize::Zeroizing;

use crate::algorithm::*;
use crate::application::{ApplicationLayer, CryptoLayer, Rs2Policy, Settings};
use crate::cache::{local_zid, RetainedSecret, SecretCache};
use crate::codec::parse_header;
use crate::crypto::*;
use crate::kdf::*;
use crate::log_event::log;
use crate::message::*;
use crate::proto::*;
use crate::result::{fault, FaultType::*, ReceiveError, ReceiveOk, SessionEvent};
use crate::sas;
#[cfg(feature = "logging")]
use crate::LogEvent::*;

/// How long `service` asks to be left alone when no timer is armed.
pub(crate) const IDLE_SERVICE_INTERVAL: i64 = 1000;

/// Identifies one arming of the retransmission timer. Tokens from an earlier arming are inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// The single retransmission timer slot of a session.
#[derive(Default)]
struct Timer {
    generation: u64,
    deadline: Option<i64>,
    interval: i64,
    count: u32,
}

impl Timer {
    fn arm(&mut self, deadline: i64) {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Some(deadline);
    }
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = None;
    }
}

/// The ephemeral key pair of the negotiated key agreement.
enum KeyPair<C: CryptoLayer> {
    Ec25(C::Ec25),
    Ec38(C::Ec38),
    Dh3k(C::Dh3k),
}

impl<C: CryptoLayer> KeyPair<C> {
    fn generate(algorithm: KeyAgreementAlgorithm, rng: &mut C::Rng) -> Option<Self> {
        Some(match algorithm {
            KeyAgreementAlgorithm::Ec25 => Self::Ec25(<C::Ec25 as KeyAgreement<C::Rng>>::generate(rng)?),
            KeyAgreementAlgorithm::Ec38 => Self::Ec38(<C::Ec38 as KeyAgreement<C::Rng>>::generate(rng)?),
            KeyAgreementAlgorithm::Dh3k => Self::Dh3k(<C::Dh3k as KeyAgreement<C::Rng>>::generate(rng)?),
        })
    }
    fn public_value(&self) -> Vec<u8> {
        match self {
            Self::Ec25(k) => k.public_value(),
            Self::Ec38(k) => k.public_value(),
            Self::Dh3k(k) => k.public_value(),
        }
    }
    fn agree(&self, peer_public_value: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        match self {
            Self::Ec25(k) => k.agree(peer_public_value),
            Self::Ec38(k) => k.agree(peer_public_value),
            Self::Dh3k(k) => k.agree(peer_public_value),
        }
    }
}

/// Send a message and log its type.
fn send<C: CryptoLayer, App: ApplicationLayer<C>>(app: &mut App, msg: &[u8]) {
    #[cfg(feature = "logging")]
    if let Some(message_type) = parse_header(msg) {
        app.event_log(SentMessage(message_type));
    }
    app.send_zrtp(msg);
}

/// The ZRTP negotiation state of one call leg, together with the application it reports to.
///
/// Every method expects to be called with the session lock held. Nothing here blocks.
pub(crate) struct Protocol<C: CryptoLayer, App: ApplicationLayer<C>> {
    pub app: App,
    settings: Settings,
    rng: C::Rng,
    started: bool,
    /// `Some(success)` once `session_completed` has been invoked.
    completed: Option<bool>,
    state: ZrtpState,
    initiator: bool,
    local_zid: Option<[u8; ZID_SIZE]>,
    far_zid: Option<[u8; ZID_SIZE]>,
    far_client_id: Option<[u8; CLIENT_ID_SIZE]>,
    chain: HashChain,
    set: NegotiatedSet,
    legacy: bool,
    key_pair: Option<KeyPair<C>>,
    cache: SecretCache,
    phone_number: Option<String>,
    sdp_hello_hash: Option<Vec<u8>>,
    first_sequence_number: u16,

    tx_hello: Option<Vec<u8>>,
    rx_hello: Option<Vec<u8>>,
    tx_commit: Option<Vec<u8>>,
    rx_commit: Option<Vec<u8>>,
    /// DHPart2 while initiator, DHPart1 while responder.
    tx_dhpart: Option<Vec<u8>>,
    rx_dhpart: Option<Vec<u8>>,
    tx_confirm: Option<Vec<u8>>,
    rx_confirm: Option<Vec<u8>>,
    tx_error: Option<Vec<u8>>,
    error_code: u16,

    dh_result: Option<Zeroizing<Vec<u8>>>,
    s0: Option<Zeroizing<Digest>>,
    kdf_context: Vec<u8>,
    keys: Option<SessionKeys>,
    sas: Option<String>,

    delayed: bool,
    remote_trust: bool,
    new_rs: Option<RetainedSecret>,
    keep_rs2: Option<RetainedSecret>,
    peer_cache_expiry: u32,
    confirm1_timestamp: i64,
    last_arrival: i64,
    dos_raised: bool,
    mismatch_raised: bool,
    timer: Timer,
}

impl<C: CryptoLayer, App: ApplicationLayer<C>> Protocol<C, App> {
    pub fn new(app: App, mut rng: C::Rng, settings: Settings) -> Self {
        let chain = HashChain::generate::<C>(&mut rng);
        Self {
            app,
            settings,
            rng,
            started: false,
            completed: None,
            state: ZrtpState::Inactive,
            initiator: false,
            local_zid: None,
            far_zid: None,
            far_client_id: None,
            chain,
            set: NegotiatedSet::default(),
            legacy: false,
            key_pair: None,
            cache: SecretCache::new(),
            phone_number: None,
            sdp_hello_hash: None,
            first_sequence_number: 0,
            tx_hello: None,
            rx_hello: None,
            tx_commit: None,
            rx_commit: None,
            tx_dhpart: None,
            rx_dhpart: None,
            tx_confirm: None,
            rx_confirm: None,
            tx_error: None,
            error_code: 0,
            dh_result: None,
            s0: None,
            kdf_context: Vec::new(),
            keys: None,
            sas: None,
            delayed: false,
            remote_trust: false,
            new_rs: None,
            keep_rs2: None,
            peer_cache_expiry: 0,
            confirm1_timestamp: 0,
            last_arrival: 0,
            dos_raised: false,
            mismatch_raised: false,
            timer: Timer::default(),
        }
    }

    pub fn state(&self) -> ZrtpState {
        self.state
    }
    pub fn is_started(&self) -> bool {
        self.started
    }
    pub fn completed(&self) -> Option<bool> {
        self.completed
    }
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }
    pub fn remote_trust(&self) -> bool {
        self.remote_trust
    }
    pub fn sas(&self) -> Option<&str> {
        self.sas.as_deref()
    }
    pub fn negotiated(&self) -> Option<NegotiatedSet> {
        self.rx_hello.is_some().then_some(self.set)
    }
    pub fn far_end_client_id(&self) -> Option<String> {
        self.far_client_id.map(|id| String::from_utf8_lossy(&id).into_owned())
    }
    pub fn set_phone_number(&mut self, number: Option<&str>) {
        self.phone_number = number.map(str::to_string);
    }

    pub fn set_sdp_hello_hash(&mut self, version: &str, hash: &str) {
        if !version.starts_with(VERSION_PREFIX) {
            log!(self.app, SdpVersionMismatch(version));
        }
        // A hash that does not decode matches no Hello.
        self.sdp_hello_hash = Some(hex::decode(hash).unwrap_or_default());
    }

    /// Build our Hello if this session does not have one yet. Its hash is published out of band
    /// before the session starts, so the same message must then be sent.
    fn ensure_hello(&mut self) -> io::Result<&[u8]> {
        let zid = match self.local_zid {
            Some(zid) => zid,
            None => {
                let zid = local_zid::<C, App>(&mut self.app, &mut self.rng)?;
                self.local_zid = Some(zid);
                zid
            }
        };
        let (chain, settings) = (&self.chain, &self.settings);
        Ok(self
            .tx_hello
            .get_or_insert_with(|| build_hello::<C>(&zid, chain, settings.key_agreements, &settings.client_id))
            .as_slice())
    }

    pub fn hello_hash(&mut self) -> io::Result<String> {
        Ok(hex_sha256::<C>(self.ensure_hello()?))
    }

    pub fn start(&mut self) -> io::Result<()> {
        if self.started {
            return Ok(());
        }
        self.ensure_hello()?;
        self.completed = None;
        self.initiator = false;
        self.far_zid = None;
        self.far_client_id = None;
        self.set = NegotiatedSet::default();
        self.legacy = false;
        self.cache = SecretCache::new();
        self.sas = None;
        self.delayed = false;
        self.remote_trust = false;
        self.new_rs = None;
        self.keep_rs2 = None;
        self.peer_cache_expiry = 0;
        self.confirm1_timestamp = 0;
        self.dos_raised = false;
        self.mismatch_raised = false;

        self.first_sequence_number = (self.rng.next_u32() & 0xffff) as u16;
        let zrtp_sequence_number = (self.rng.next_u32() & 0xffff) as u16;
        self.app.set_next_zrtp_sequence_number(zrtp_sequence_number);
        self.last_arrival = self.app.time();
        self.started = true;
        self.state = ZrtpState::Inactive;
        self.set_state(ZrtpState::SendingHello);
        if let Some(hello) = self.tx_hello.as_deref() {
            send::<C, App>(&mut self.app, hello);
        }
        self.timer.count = 0;
        self.timer.interval = self.settings.t1_initial;
        self.arm(self.settings.t1_initial);
        Ok(())
    }

    /// Forget everything secret about the current session. What the cache still needs for
    /// `trust` and `untrust` is kept.
    pub fn end_session(&mut self) {
        if self.state != ZrtpState::Inactive {
            self.set_state(ZrtpState::Inactive);
        }
        self.started = false;
        self.timer.cancel();
        self.chain = HashChain::generate::<C>(&mut self.rng);
        self.tx_hello = None;
        self.rx_hello = None;
        self.tx_commit = None;
        self.rx_commit = None;
        self.tx_dhpart = None;
        self.rx_dhpart = None;
        self.tx_confirm = None;
        self.rx_confirm = None;
        self.tx_error = None;
        self.error_code = 0;
        self.key_pair = None;
        self.dh_result = None;
        self.s0 = None;
        self.kdf_context.clear();
        self.keys = None;
        self.sdp_hello_hash = None;
    }

    fn set_state(&mut self, next: ZrtpState) {
        log!(self.app, StateChanged(self.state, next));
        self.state = next;
    }

    fn arm(&mut self, delay: i64) {
        let now = self.app.time();
        self.timer.arm(now + delay);
    }

    fn schedule_t2(&mut self) {
        self.timer.count = 0;
        self.timer.interval = self.settings.t2_initial;
        self.arm(self.settings.t2_initial);
    }

    fn schedule_responder_timeout(&mut self) {
        self.timer.arm(self.last_arrival + self.settings.responder_timeout);
    }

    fn warn_dos(&mut self, text: &str) {
        if !self.dos_raised {
            self.dos_raised = true;
            log!(self.app, crate::LogEvent::SecurityWarning(crate::proto::SecurityWarning::DenialOfService, text));
            self.app.security_warning(crate::proto::SecurityWarning::DenialOfService, text);
        }
    }

    fn warn_cache_mismatch(&mut self, text: &str) {
        if !self.mismatch_raised {
            self.mismatch_raised = true;
            log!(self.app, crate::LogEvent::SecurityWarning(crate::proto::SecurityWarning::CacheMismatch, text));
            self.app.security_warning(crate::proto::SecurityWarning::CacheMismatch, text);
        }
    }

    fn complete(&mut self, success: bool, message: Option<&str>) {
        if self.completed.is_some() {
            return;
        }
        self.completed = Some(success);
        self.timer.cancel();
        log!(self.app, SessionCompleted(success));
        self.app.session_completed(success, message);
    }

    fn fail(&mut self, message: &str) -> ReceiveOk {
        self.complete(false, Some(message));
        self.end_session();
        ReceiveOk::Session(SessionEvent::Failed)
    }

    fn send_error(&mut self, code: u16) {
        let msg = build_error(code);
        log!(self.app, SentError(code));
        send::<C, App>(&mut self.app, &msg);
        self.error_code = code;
        self.tx_error = Some(msg);
        self.schedule_t2();
    }

    /// Stop the session, as asked by the application.
    pub fn stop(&mut self) {
        if self.started {
            self.end_session();
        }
    }

    /// Returns the token and absolute deadline of the armed timer, if any.
    pub fn next_timer(&self) -> Option<(TimerToken, i64)> {
        self.timer.deadline.map(|deadline| (TimerToken(self.timer.generation), deadline))
    }

    /// Fire the armed timer if it is due, and return how long until this should be called again.
    pub fn service(&mut self) -> i64 {
        let now = self.app.time();
        if matches!(self.timer.deadline, Some(deadline) if deadline <= now) {
            self.on_timer(TimerToken(self.timer.generation));
        }
        match self.timer.deadline {
            Some(deadline) => (deadline - self.app.time()).max(1),
            None => IDLE_SERVICE_INTERVAL,
        }
    }

    /// Run the retransmission or timeout logic for the timer identified by `token`.
    pub fn on_timer(&mut self, token: TimerToken) {
        if self.timer.deadline.is_none() || token.0 != self.timer.generation {
            log!(self.app, StaleTimer);
            return;
        }
        self.timer.deadline = None;
        if !self.started || self.completed.is_some() {
            return;
        }
        if self.error_code != 0 || (self.initiator && self.state != ZrtpState::SendingHello) {
            self.retransmit_t2();
        } else if self.state == ZrtpState::SendingHello {
            self.retransmit_hello();
        } else {
            self.check_responder_timeout();
        }
    }

    fn retransmit_hello(&mut self) {
        if self.timer.count >= self.settings.t1_max_retransmissions {
            log!(self.app, TimeoutHello);
            self.fail(TEXT_NO_HELLO);
            return;
        }
        self.timer.count += 1;
        self.timer.interval = (self.timer.interval * 2).min(self.settings.t1_maximum);
        log!(self.app, Resent(self.state, self.timer.count));
        if let Some(hello) = self.tx_hello.as_deref() {
            send::<C, App>(&mut self.app, hello);
        }
        self.arm(self.timer.interval);
    }

    fn retransmit_t2(&mut self) {
        if self.timer.count >= self.settings.t2_max_retransmissions {
            log!(self.app, TimeoutNoResponse(self.state));
            self.fail(&format!("{} ({})", TEXT_NO_RESPONSE, self.state.text()));
            return;
        }
        let msg = if self.error_code != 0 {
            self.tx_error.as_deref()
        } else {
            match self.state {
                ZrtpState::CommitSent => self.tx_commit.as_deref(),
                ZrtpState::DhPart2Sent => self.tx_dhpart.as_deref(),
                ZrtpState::Confirm2Sent => self.tx_confirm.as_deref(),
                _ => None,
            }
        };
        let Some(msg) = msg else {
            return;
        };
        self.timer.count += 1;
        self.timer.interval = (self.timer.interval * 2).min(self.settings.t2_maximum);
        log!(self.app, Resent(self.state, self.timer.count));
        send::<C, App>(&mut self.app, msg);
        self.arm(self.timer.interval);
    }

    fn check_responder_timeout(&mut self) {
        let idle = self.app.time() - self.last_arrival;
        if idle >= self.settings.responder_timeout {
            log!(self.app, ResponderTimeout(self.state));
            let msg = build_error(error_code::PROTOCOL_TIMEOUT);
            log!(self.app, SentError(error_code::PROTOCOL_TIMEOUT));
            send::<C, App>(&mut self.app, &msg);
            self.fail(&format!("{} ({})", TEXT_RESPONDER_TIMEOUT, self.state.text()));
        } else {
            self.arm(self.settings.responder_timeout - idle);
        }
    }

    pub fn receive(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if !self.started {
            log!(self.app, DroppedNotStarted);
            return Err(ReceiveError::SessionNotStarted);
        }
        let Some(message_type) = parse_header(msg) else {
            log!(self.app, DroppedMalformed);
            return Err(fault!(InvalidPacket, true));
        };
        self.last_arrival = self.app.time();
        log!(self.app, ReceivedMessage(message_type));
        match message_type {
            MSG_HELLO => self.received_hello(msg),
            MSG_HELLO_ACK => self.received_hello_ack(),
            MSG_COMMIT => self.received_commit(msg),
            MSG_DHPART1 => self.received_dhpart1(msg),
            MSG_DHPART2 => self.received_dhpart2(msg),
            MSG_CONFIRM1 => self.received_confirm1(msg),
            MSG_CONFIRM2 => self.received_confirm2(msg),
            MSG_CONF2_ACK => self.received_conf2ack(),
            MSG_ERROR => self.received_error(msg),
            MSG_ERROR_ACK => Ok(self.received_error_ack()),
            MSG_GO_CLEAR | MSG_CLEAR_ACK | MSG_SAS_RELAY | MSG_RELAY_ACK | MSG_PING | MSG_PING_ACK => {
                log!(self.app, IgnoredMessage(message_type));
                Ok(ReceiveOk::Ignored)
            }
            _ => {
                log!(self.app, UnknownMessageType(message_type));
                Err(fault!(InvalidPacket, true))
            }
        }
    }

    fn unexpected(&mut self, message_type: &[u8; 8]) -> ReceiveError {
        log!(self.app, DroppedUnexpected(message_type, self.state));
        #[cfg(not(feature = "logging"))]
        let _ = message_type;
        fault!(OutOfSequence, false)
    }

    fn received_hello(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if msg.len() < HELLO_MIN_SIZE {
            return Err(fault!(InvalidPacket, true));
        }
        if let Some(accepted) = self.rx_hello.as_deref() {
            if accepted != msg {
                self.warn_dos("Hello message differs from the accepted Hello");
                return Err(fault!(ConflictingRetransmission, true));
            }
            log!(self.app, ReceivedRetransmission(MSG_HELLO));
            send::<C, App>(&mut self.app, &build_simple(MSG_HELLO_ACK));
            return Ok(ReceiveOk::Session(SessionEvent::Retransmission));
        }
        if let Some(expected) = self.sdp_hello_hash.as_deref() {
            if !secure_eq(expected, &sha256::<C>(msg)) {
                self.warn_dos("Hello H3 does not match zrtp-hash");
                return Err(fault!(FailedAuth, true));
            }
        }
        let hello = Hello::parse(msg).ok_or(fault!(InvalidPacket, true))?;

        let (major, minor) = (hello.version[0], hello.version[2]);
        if major != VERSION[0] || minor != VERSION[2] {
            log!(self.app, IncorrectVersion(major, minor));
            if (major, minor) < (VERSION[0], VERSION[2]) {
                self.send_error(error_code::INCORRECT_VERSION);
                return Err(fault!(Rejected, false));
            }
            // A newer peer will fall back to our version once it sees our Hello.
            return Ok(ReceiveOk::Ignored);
        }
        if Some(hello.zid) == self.local_zid {
            self.send_error(error_code::EQUAL_ZIDS_IN_HELLO);
            return Err(fault!(Rejected, false));
        }

        self.far_zid = Some(hello.zid);
        self.far_client_id = Some(hello.client_id);
        self.set = hello.negotiate(self.settings.key_agreements);
        self.legacy = hello.is_legacy();
        log!(self.app, NegotiatedAlgorithms(&self.set, self.legacy));
        self.key_pair = KeyPair::generate(self.set.key_agreement, &mut self.rng);
        if self.key_pair.is_none() {
            self.send_error(error_code::UNSUPPORTED_KEY_EXCHANGE);
            return Err(fault!(UnsupportedAlgorithm, false));
        }
        let dhpart2 = self.create_dhpart(MSG_DHPART2)?;
        self.tx_dhpart = Some(dhpart2);
        self.rx_hello = Some(msg.to_vec());
        send::<C, App>(&mut self.app, &build_simple(MSG_HELLO_ACK));

        if self.state == ZrtpState::GotHelloAck && !self.settings.force_responder {
            self.send_commit()?;
        }
        Ok(ReceiveOk::Session(SessionEvent::Control))
    }

    fn received_hello_ack(&mut self) -> Result<ReceiveOk, ReceiveError> {
        if self.state != ZrtpState::SendingHello {
            return Err(self.unexpected(MSG_HELLO_ACK));
        }
        self.timer.cancel();
        self.set_state(ZrtpState::GotHelloAck);
        if self.rx_hello.is_some() && !self.settings.force_responder {
            self.send_commit()?;
        }
        Ok(ReceiveOk::Session(SessionEvent::Control))
    }

    /// Select the cache entry of the peer, check its bound phone number and build our DHPart.
    fn create_dhpart(&mut self, message_type: &[u8; 8]) -> Result<Vec<u8>, ReceiveError> {
        let far_zid = self.far_zid.ok_or(fault!(OutOfSequence, false))?;
        self.cache.select::<C, App>(&mut self.app, &far_zid)?;
        self.check_phone_number()?;

        let role = if message_type == MSG_DHPART2 { ROLE_INITIATOR } else { ROLE_RESPONDER };
        let mut ids = [[0u8; SECRET_ID_SIZE]; 2];
        for (id, secret) in ids.iter_mut().zip([self.cache.rs1(), self.cache.rs2()]) {
            match secret {
                Some(secret) => *id = secret_id::<C>(self.set.hash, secret.as_ref(), role),
                None => self.rng.fill_bytes(id),
            }
        }
        let public_value = self.key_pair.as_ref().ok_or(fault!(UnsupportedAlgorithm, false))?.public_value();
        Ok(build_dhpart::<C>(&mut self.rng, message_type, &self.chain, &ids[0], &ids[1], &public_value))
    }

    fn check_phone_number(&mut self) -> io::Result<()> {
        let Some(number) = self.phone_number.clone() else {
            return Ok(());
        };
        match self.cache.number().map(str::to_string) {
            Some(cached) => {
                if !self.app.matching_numbers(&cached, &number) {
                    self.cache.update_number::<C, App>(&mut self.app, Some(&number))?;
                    self.warn_dos("Phone number differs from the one cached for this ZID");
                }
            }
            None => {
                if self.cache.is_new_zid_for_trusted_user::<C, App>(&mut self.app, Some(&number))? {
                    self.warn_dos("Trusted phone number appeared with a new ZID");
                }
            }
        }
        Ok(())
    }

    fn send_commit(&mut self) -> Result<(), ReceiveError> {
        let (Some(zid), Some(rx_hello), Some(dhpart2)) = (self.local_zid, &self.rx_hello, &self.tx_dhpart) else {
            return Err(fault!(OutOfSequence, false));
        };
        let hvi = hvi::<C>(self.set.hash, dhpart2, rx_hello);
        let commit = build_commit::<C>(&zid, &self.chain, &self.set, &hvi);
        self.initiator = true;
        send::<C, App>(&mut self.app, &commit);
        self.tx_commit = Some(commit);
        self.schedule_t2();
        self.set_state(ZrtpState::CommitSent);
        Ok(())
    }

    fn received_commit(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if let Some(accepted) = self.rx_commit.as_deref() {
            if accepted != msg {
                self.warn_dos("Commit message differs from the accepted Commit");
                return Err(fault!(ConflictingRetransmission, true));
            }
            log!(self.app, ReceivedRetransmission(MSG_COMMIT));
            if !self.initiator && self.state == ZrtpState::DhPart1Sent {
                if let Some(dhpart1) = self.tx_dhpart.as_deref() {
                    send::<C, App>(&mut self.app, dhpart1);
                }
            }
            return Ok(ReceiveOk::Session(SessionEvent::Retransmission));
        }

        let commit = Commit::parse(msg).map_err(|e| fault!(e, true))?;
        if Some(commit.zid) != self.far_zid {
            return Err(fault!(InvalidPacket, true));
        }
        let Some(hello) = self.rx_hello.as_deref() else {
            return Err(self.unexpected(MSG_COMMIT));
        };
        let h3_matches = Hello::parse(hello).map_or(false, |h| h.h3 == sha256::<C>(&commit.h2));
        let mac_matches = check_implicit_mac::<C>(&commit.h2, hello);
        if !h3_matches {
            self.warn_dos("Commit H2 is not the preimage of the accepted Hello H3");
            return Err(fault!(FailedAuth, true));
        }
        if !mac_matches {
            self.warn_dos("Using Commit H2 to hash the accepted Hello gives wrong MAC");
            return Err(fault!(FailedAuth, true));
        }

        match self.state {
            ZrtpState::SendingHello | ZrtpState::GotHelloAck => {
                self.timer.cancel();
                self.become_responder(commit, msg, false);
            }
            ZrtpState::CommitSent => {
                let ours = self.tx_commit.as_deref().and_then(|c| c.get(COMMIT_HVI..COMMIT_HVI + HVI_SIZE));
                let we_win = ours.map_or(false, |ours| ours >= &commit.hvi[..]);
                log!(self.app, CommitContention(we_win));
                if we_win {
                    return Ok(ReceiveOk::Session(SessionEvent::Control));
                }
                self.timer.cancel();
                self.become_responder(commit, msg, true);
            }
            _ => return Err(self.unexpected(MSG_COMMIT)),
        }

        if self.key_pair.is_none() {
            return Ok(self.fail(TEXT_ERROR_SENDING_DH));
        }
        let dhpart1 = self.create_dhpart(MSG_DHPART1)?;
        send::<C, App>(&mut self.app, &dhpart1);
        self.tx_dhpart = Some(dhpart1);
        self.set_state(ZrtpState::DhPart1Sent);
        Ok(ReceiveOk::Session(SessionEvent::Control))
    }

    /// Accept the peer's Commit and its algorithm set. A fresh key pair is made when the key
    /// agreement changes or when our own Commit lost the contention.
    fn become_responder(&mut self, commit: Commit, msg: &[u8], lost_contention: bool) {
        self.initiator = false;
        self.tx_commit = None;
        self.tx_dhpart = None;
        let regenerate = lost_contention || commit.set.key_agreement != self.set.key_agreement;
        self.set = commit.set;
        log!(self.app, NegotiatedAlgorithms(&self.set, self.legacy));
        if regenerate || self.key_pair.is_none() {
            self.key_pair = KeyPair::generate(self.set.key_agreement, &mut self.rng);
        }
        self.rx_commit = Some(msg.to_vec());
        self.schedule_responder_timeout();
        self.set_state(ZrtpState::GotCommit);
    }

    fn received_dhpart1(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if let Some(accepted) = self.rx_dhpart.as_deref().filter(|_| self.initiator) {
            if accepted != msg {
                self.warn_dos("DHPart1 message differs from the accepted DHPart1");
                return Err(fault!(ConflictingRetransmission, true));
            }
            log!(self.app, ReceivedRetransmission(MSG_DHPART1));
            return Ok(ReceiveOk::Session(SessionEvent::Retransmission));
        }
        if !self.initiator || self.state != ZrtpState::CommitSent {
            return Err(self.unexpected(MSG_DHPART1));
        }
        let dhpart = DhPart::parse(msg, self.set.key_agreement).ok_or(fault!(InvalidPacket, true))?;
        let hello = self.rx_hello.as_deref().ok_or(fault!(OutOfSequence, false))?;
        let h2 = sha256::<C>(&dhpart.h1);
        let h3_matches = Hello::parse(hello).map_or(false, |h| h.h3 == sha256::<C>(&h2));
        let mac_matches = check_implicit_mac::<C>(&h2, hello);
        if !h3_matches {
            self.warn_dos("DHPart1 H1 is not the second preimage of the accepted Hello H3");
            return Err(fault!(FailedAuth, true));
        }
        if !mac_matches {
            self.warn_dos("Using DHPart1 H1 to hash the accepted Hello gives wrong MAC");
            return Err(fault!(FailedAuth, true));
        }
        let dh_result = self
            .key_pair
            .as_ref()
            .and_then(|k| k.agree(dhpart.public_value))
            .ok_or(fault!(InvalidPublicValue, true))?;

        self.timer.cancel();
        self.dh_result = Some(dh_result);
        self.rx_dhpart = Some(msg.to_vec());
        if let Some(dhpart2) = self.tx_dhpart.as_deref() {
            send::<C, App>(&mut self.app, dhpart2);
        }
        self.schedule_t2();
        self.calculate_shared_keys()?;
        self.set_state(ZrtpState::DhPart2Sent);
        Ok(ReceiveOk::Session(SessionEvent::Control))
    }

    fn received_dhpart2(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if self.initiator {
            return Err(self.unexpected(MSG_DHPART2));
        }
        if let Some(accepted) = self.rx_dhpart.as_deref() {
            if accepted != msg {
                self.warn_dos("DHPart2 message differs from the accepted DHPart2");
                return Err(fault!(ConflictingRetransmission, true));
            }
            log!(self.app, ReceivedRetransmission(MSG_DHPART2));
            if self.state == ZrtpState::Confirm1Sent {
                if let Some(confirm1) = self.tx_confirm.as_deref() {
                    send::<C, App>(&mut self.app, confirm1);
                }
            }
            return Ok(ReceiveOk::Session(SessionEvent::Retransmission));
        }
        if self.state != ZrtpState::DhPart1Sent {
            return Err(self.unexpected(MSG_DHPART2));
        }
        let dhpart = DhPart::parse(msg, self.set.key_agreement).ok_or(fault!(InvalidPacket, true))?;
        let rx_commit = self.rx_commit.as_deref().ok_or(fault!(OutOfSequence, false))?;
        let tx_hello = self.tx_hello.as_deref().ok_or(fault!(OutOfSequence, false))?;
        let commit = Commit::parse(rx_commit).map_err(|e| fault!(e, false))?;
        let h2_matches = sha256::<C>(&dhpart.h1) == commit.h2;
        let mac_matches = check_implicit_mac::<C>(&dhpart.h1, rx_commit);
        let hvi_matches = secure_eq(&hvi::<C>(self.set.hash, msg, tx_hello), &commit.hvi);
        if !h2_matches {
            self.warn_dos("DHPart2 H1 is not the preimage of the accepted Commit H2");
            return Err(fault!(FailedAuth, true));
        }
        if !mac_matches {
            self.warn_dos("Using DHPart2 H1 to hash the accepted Commit gives wrong MAC");
            return Err(fault!(FailedAuth, true));
        }
        if !hvi_matches {
            self.warn_dos("DHPart2 does not match the HVI of the accepted Commit");
            return Err(fault!(FailedAuth, true));
        }
        let dh_result = self
            .key_pair
            .as_ref()
            .and_then(|k| k.agree(dhpart.public_value))
            .ok_or(fault!(InvalidPublicValue, true))?;

        self.dh_result = Some(dh_result);
        self.rx_dhpart = Some(msg.to_vec());
        self.calculate_shared_keys()?;
        self.confirm1_timestamp = self.app.time();
        let Some(confirm1) = self.build_own_confirm(MSG_CONFIRM1) else {
            return Ok(self.fail(TEXT_KEY_EXCHANGE_NOT_COMPLETED));
        };
        send::<C, App>(&mut self.app, &confirm1);
        self.tx_confirm = Some(confirm1);
        self.set_state(ZrtpState::Confirm1Sent);
        Ok(ReceiveOk::Session(SessionEvent::Control))
    }

    /// Find which of our retained secrets, if any, the peer's DHPart refers to.
    fn calculate_s1(&mut self) -> Option<RetainedSecret> {
        let ids = DhPart::parse(self.rx_dhpart.as_deref()?, self.set.key_agreement)?.secret_ids().map(|id| *id);
        // The peer computed its IDs with its own role string.
        let peer_role = if self.initiator { ROLE_RESPONDER } else { ROLE_INITIATOR };
        let mut candidates = ArrayVec::<(u8, [u8; SECRET_ID_SIZE], &RetainedSecret), 2>::new();
        for (n, secret) in [(1, self.cache.rs1()), (2, self.cache.rs2())] {
            if let Some(secret) = secret {
                candidates.push((n, secret_id::<C>(self.set.hash, secret.as_ref(), peer_role), secret));
            }
        }

        let matched = if self.initiator {
            candidates.iter().find(|(_, mac, _)| ids.iter().any(|id| secure_eq(id, mac)))
        } else {
            ids.iter().find_map(|id| candidates.iter().find(|(_, mac, _)| secure_eq(id, mac)))
        };
        let matched = matched.map(|(n, _, secret)| (*n, (*secret).clone()));
        let had_secrets = !candidates.is_empty();
        drop(candidates);
        match matched {
            Some((n, secret)) => {
                log!(self.app, RetainedSecretMatched(n));
                #[cfg(not(feature = "logging"))]
                let _ = n;
                Some(secret)
            }
            None => {
                if had_secrets {
                    self.delayed = true;
                    self.warn_cache_mismatch("No retained secret matches the peer's");
                } else {
                    log!(self.app, NoRetainedSecrets);
                }
                None
            }
        }
    }

    /// Derive s0 and everything that comes from it once both DHParts are known.
    fn calculate_shared_keys(&mut self) -> Result<(), ReceiveError> {
        let s1 = self.calculate_s1();
        self.keep_rs2 = match (self.settings.rs2_policy, &s1) {
            (Rs2Policy::MatchedSecret, Some(s1)) => Some(s1.clone()),
            _ => self.cache.rs1().cloned(),
        };

        let (local_zid, far_zid) = match (self.local_zid, self.far_zid) {
            (Some(local), Some(far)) => (local, far),
            _ => return Err(fault!(OutOfSequence, false)),
        };
        let transcript = if self.initiator {
            [&self.rx_hello, &self.tx_commit, &self.rx_dhpart, &self.tx_dhpart]
        } else {
            [&self.tx_hello, &self.rx_commit, &self.tx_dhpart, &self.rx_dhpart]
        };
        let mut parts: ArrayVec<&[u8], 4> = ArrayVec::new();
        for part in transcript {
            parts.push(part.as_deref().ok_or(fault!(OutOfSequence, false))?);
        }
        let total_hash = self.set.hash.hash::<C>(&parts);
        let context = if self.initiator {
            kdf_context(&local_zid, &far_zid, &total_hash)
        } else {
            kdf_context(&far_zid, &local_zid, &total_hash)
        };

        let mut dh_result = self.dh_result.take().ok_or(fault!(OutOfSequence, false))?;
        let legacy_size = self.set.key_agreement.legacy_secret_size();
        if self.legacy && dh_result.len() < legacy_size {
            let mut padded = Zeroizing::new(vec![0u8; legacy_size - dh_result.len()]);
            padded.extend_from_slice(&dh_result);
            dh_result = padded;
        }
        let s0 = compute_s0::<C>(self.set.hash, &dh_result, &context, s1.as_ref().map(|s| s.as_ref()));
        let keys = SessionKeys::derive::<C>(&self.set, &s0, &context);
        self.sas = sas::render(self.set.sas, &keys.sas_hash);
        self.new_rs = RetainedSecret::from_slice(&keys.new_retained_secret);
        self.s0 = Some(s0);
        self.kdf_context = context;
        self.keys = Some(keys);
        Ok(())
    }

    fn build_own_confirm(&mut self, message_type: &[u8; 8]) -> Option<Vec<u8>> {
        let keys = ConfirmKeys::derive::<C>(&self.set, self.s0.as_ref()?, &self.kdf_context, self.initiator);
        let flags = if !self.delayed && self.cache.trust() { FLAG_SAS_VERIFIED } else { 0 };
        let body = ConfirmBody { h0: *self.chain.h0.as_bytes(), sig_len: 0, flags, expiry: self.settings.cache_expiry_seconds };
        build_confirm::<C>(&mut self.rng, message_type, self.set.hash, &keys, &body)
    }

    /// Check a peer Confirm against the keys of the peer's role and the DHPart it sent.
    fn open_peer_confirm(&mut self, msg: &[u8], name: &str) -> Result<ConfirmBody, ReceiveError> {
        let s0 = self.s0.as_ref().ok_or(fault!(OutOfSequence, false))?;
        let keys = ConfirmKeys::derive::<C>(&self.set, s0, &self.kdf_context, !self.initiator);
        let body = match open_confirm::<C>(msg, self.set.hash, &keys) {
            Ok(body) => body,
            Err(FailedAuth) => {
                self.warn_dos(&format!("{} MAC is wrong", name));
                return Err(fault!(FailedAuth, true));
            }
            Err(e) => return Err(fault!(e, true)),
        };
        let peer_dhpart = self.rx_dhpart.as_deref().ok_or(fault!(OutOfSequence, false))?;
        let h1_matches = DhPart::parse(peer_dhpart, self.set.key_agreement)
            .map_or(false, |dh| dh.h1 == sha256::<C>(&body.h0));
        let mac_matches = check_implicit_mac::<C>(&body.h0, peer_dhpart);
        if !h1_matches {
            self.warn_dos(&format!("{} H0 is not the preimage of the accepted DHPart H1", name));
            return Err(fault!(FailedAuth, true));
        }
        if !mac_matches {
            self.warn_dos(&format!("Using {} H0 to hash the accepted DHPart gives wrong MAC", name));
            return Err(fault!(FailedAuth, true));
        }
        Ok(body)
    }

    fn apply_peer_confirm(&mut self, body: &ConfirmBody) -> io::Result<()> {
        self.remote_trust = body.flags & FLAG_SAS_VERIFIED != 0;
        self.peer_cache_expiry = body.expiry;
        if !self.remote_trust {
            if let Some(far_zid) = self.far_zid {
                self.cache.reset_trust::<C, App>(&mut self.app, &far_zid)?;
            }
        }
        Ok(())
    }

    fn key_exchange_completed(&mut self) -> bool {
        let Some(keys) = &self.keys else {
            return false;
        };
        let (tx_key, tx_salt, rx_key, rx_salt) = if self.initiator {
            (&keys.initiator_master_key, &keys.initiator_master_salt, &keys.responder_master_key, &keys.responder_master_salt)
        } else {
            (&keys.responder_master_key, &keys.responder_master_salt, &keys.initiator_master_key, &keys.initiator_master_salt)
        };
        self.app.key_exchange_completed(tx_key, tx_salt, rx_key, rx_salt, self.first_sequence_number)
    }

    fn cache_expiry_time(&self) -> i64 {
        match self.peer_cache_expiry {
            0xffff_ffff => i64::MAX,
            0 => 0,
            seconds => self.confirm1_timestamp + 1000 * seconds as i64,
        }
    }

    fn update_cache(&mut self, trust: bool, number: Option<String>) -> io::Result<()> {
        let Some(new_rs) = self.new_rs.clone() else {
            return Ok(());
        };
        let expiry = self.cache_expiry_time();
        let keep_rs2 = self.keep_rs2.clone();
        self.cache.update::<C, App>(&mut self.app, expiry, trust, new_rs, keep_rs2, number.as_deref())
    }

    fn received_confirm1(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if !self.initiator {
            return Err(self.unexpected(MSG_CONFIRM1));
        }
        if let Some(accepted) = self.rx_confirm.as_deref() {
            if accepted != msg {
                self.warn_dos("Confirm1 message differs from the accepted Confirm1");
                return Err(fault!(ConflictingRetransmission, true));
            }
            log!(self.app, ReceivedRetransmission(MSG_CONFIRM1));
            return Ok(ReceiveOk::Session(SessionEvent::Retransmission));
        }
        if self.state != ZrtpState::DhPart2Sent {
            return Err(self.unexpected(MSG_CONFIRM1));
        }
        let body = self.open_peer_confirm(msg, "Confirm1")?;
        self.confirm1_timestamp = self.app.time();
        self.apply_peer_confirm(&body)?;

        self.timer.cancel();
        self.rx_confirm = Some(msg.to_vec());
        let Some(confirm2) = self.build_own_confirm(MSG_CONFIRM2) else {
            return Ok(self.fail(TEXT_KEY_EXCHANGE_NOT_COMPLETED));
        };
        send::<C, App>(&mut self.app, &confirm2);
        self.tx_confirm = Some(confirm2);
        self.schedule_t2();
        self.s0 = None;
        if !self.key_exchange_completed() {
            return Ok(self.fail(TEXT_KEY_EXCHANGE_NOT_COMPLETED));
        }
        self.set_state(ZrtpState::Confirm2Sent);
        Ok(ReceiveOk::Session(SessionEvent::KeysAvailable))
    }

    fn received_confirm2(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        if self.initiator {
            return Err(self.unexpected(MSG_CONFIRM2));
        }
        if let Some(accepted) = self.rx_confirm.as_deref() {
            if accepted != msg {
                self.warn_dos("Confirm2 message differs from the accepted Confirm2");
                return Err(fault!(ConflictingRetransmission, true));
            }
            log!(self.app, ReceivedRetransmission(MSG_CONFIRM2));
            send::<C, App>(&mut self.app, &build_simple(MSG_CONF2_ACK));
            return Ok(ReceiveOk::Session(SessionEvent::Retransmission));
        }
        if self.state != ZrtpState::Confirm1Sent {
            return Err(self.unexpected(MSG_CONFIRM2));
        }
        let body = self.open_peer_confirm(msg, "Confirm2")?;
        self.apply_peer_confirm(&body)?;
        self.s0 = None;
        if !self.delayed {
            let (trust, number) = (self.cache.trust(), self.phone_number.clone());
            self.update_cache(trust, number)?;
        }
        self.rx_confirm = Some(msg.to_vec());
        send::<C, App>(&mut self.app, &build_simple(MSG_CONF2_ACK));
        self.set_state(ZrtpState::Conf2AckSent);
        if !self.key_exchange_completed() {
            return Ok(self.fail(TEXT_KEY_EXCHANGE_NOT_COMPLETED));
        }
        self.complete(true, None);
        Ok(ReceiveOk::Session(SessionEvent::Established))
    }

    fn received_conf2ack(&mut self) -> Result<ReceiveOk, ReceiveError> {
        if self.state != ZrtpState::Confirm2Sent {
            return Err(self.unexpected(MSG_CONF2_ACK));
        }
        self.set_state(ZrtpState::GotConf2Ack);
        self.timer.cancel();
        if !self.delayed {
            let (trust, number) = (self.cache.trust(), self.phone_number.clone());
            self.update_cache(trust, number)?;
        }
        self.complete(true, None);
        Ok(ReceiveOk::Session(SessionEvent::Established))
    }

    /// SRTP from the responder authenticated, so it must have received our Confirm2 even if
    /// its Conf2ACK got lost.
    pub fn successful_srtp_unprotect(&mut self) -> io::Result<bool> {
        if self.started && self.state == ZrtpState::Confirm2Sent {
            match self.received_conf2ack() {
                Err(ReceiveError::StorageError(e)) => return Err(e),
                other => return Ok(other.is_ok()),
            }
        }
        Ok(false)
    }

    fn received_error(&mut self, msg: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        let code = parse_error(msg).ok_or(fault!(InvalidPacket, true))?;
        log!(self.app, ReceivedError(code));
        send::<C, App>(&mut self.app, &build_simple(MSG_ERROR_ACK));
        Ok(self.fail(&format!("{} ({})", TEXT_GENERIC_ERROR, error_code::name(code))))
    }

    fn received_error_ack(&mut self) -> ReceiveOk {
        if self.error_code != 0 {
            self.error_code = 0;
            self.tx_error = None;
            self.timer.cancel();
        }
        ReceiveOk::Session(SessionEvent::Control)
    }

    /// The user verified the SAS: store the new retained secret as trusted.
    pub fn trust(&mut self) -> io::Result<()> {
        let number = self.phone_number.clone();
        self.update_cache(true, number)?;
        self.delayed = false;
        Ok(())
    }

    /// The user revoked trust: store the new retained secret untrusted and without a number.
    pub fn untrust(&mut self) -> io::Result<()> {
        self.update_cache(false, None)?;
        self.delayed = true;
        Ok(())
    }

    pub fn is_trusted(&mut self) -> io::Result<bool> {
        let Some(far_zid) = self.far_zid.filter(|_| !self.delayed) else {
            return Ok(false);
        };
        self.cache.select::<C, App>(&mut self.app, &far_zid)?;
        Ok(self.cache.trust())
    }
}
