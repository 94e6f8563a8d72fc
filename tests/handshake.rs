/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
#![cfg(feature = "default-crypto")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use zrtp::crypto_impl::DefaultCrypto;
use zrtp::proto::*;
use zrtp::*;

struct Crypto;
impl DefaultCrypto for Crypto {}

type TestSession = Session<Crypto, Endpoint>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Keys {
    tx_key: Vec<u8>,
    tx_salt: Vec<u8>,
    rx_key: Vec<u8>,
    rx_salt: Vec<u8>,
    first_seq: u16,
}

/// One side of a call. The store outlives sessions so retained secrets carry over.
struct Endpoint {
    clock: Arc<AtomicI64>,
    store: Arc<Mutex<HashMap<String, StoredRecord>>>,
    contacts: Vec<String>,
    outbox: Vec<Vec<u8>>,
    keys: Option<Keys>,
    completed: Vec<(bool, Option<String>)>,
    warnings: Vec<SecurityWarning>,
    masquerading: bool,
}

impl Endpoint {
    fn new(clock: &Arc<AtomicI64>, store: &Arc<Mutex<HashMap<String, StoredRecord>>>) -> Self {
        Self {
            clock: clock.clone(),
            store: store.clone(),
            contacts: Vec::new(),
            outbox: Vec::new(),
            keys: None,
            completed: Vec::new(),
            warnings: Vec::new(),
            masquerading: false,
        }
    }
}

impl ApplicationLayer<Crypto> for Endpoint {
    fn time(&mut self) -> i64 {
        self.clock.load(Ordering::Relaxed)
    }
    fn send_zrtp(&mut self, message: &[u8]) {
        self.outbox.push(message.to_vec());
    }
    fn set_masquerading_active(&mut self) {
        self.masquerading = true;
    }
    fn load_record(&mut self, key: &str) -> Result<Option<StoredRecord>, std::io::Error> {
        Ok(self.store.lock().unwrap().get(key).cloned())
    }
    fn save_record(&mut self, key: &str, data: &[u8], phone_number: Option<&str>) -> Result<(), std::io::Error> {
        let record = StoredRecord { data: data.to_vec(), phone_number: phone_number.map(str::to_string) };
        self.store.lock().unwrap().insert(key.to_string(), record);
        Ok(())
    }
    fn remove_record(&mut self, key: &str) -> Result<(), std::io::Error> {
        self.store.lock().unwrap().remove(key);
        Ok(())
    }
    fn record_keys(&mut self) -> Result<Vec<String>, std::io::Error> {
        Ok(self.store.lock().unwrap().keys().cloned().collect())
    }
    fn is_in_address_book(&mut self, number: &str) -> bool {
        self.contacts.iter().any(|c| c == number)
    }
    fn key_exchange_completed(&mut self, tx_key: &[u8], tx_salt: &[u8], rx_key: &[u8], rx_salt: &[u8], first_seq: u16) -> bool {
        self.keys = Some(Keys {
            tx_key: tx_key.to_vec(),
            tx_salt: tx_salt.to_vec(),
            rx_key: rx_key.to_vec(),
            rx_salt: rx_salt.to_vec(),
            first_seq,
        });
        true
    }
    fn security_warning(&mut self, warning: SecurityWarning, _: &str) {
        self.warnings.push(warning);
    }
    fn session_completed(&mut self, success: bool, message: Option<&str>) {
        self.completed.push((success, message.map(str::to_string)));
    }
}

struct Call {
    clock: Arc<AtomicI64>,
    alice_store: Arc<Mutex<HashMap<String, StoredRecord>>>,
    bob_store: Arc<Mutex<HashMap<String, StoredRecord>>>,
}

impl Call {
    fn new() -> Self {
        Self {
            clock: Arc::new(AtomicI64::new(1_000_000)),
            alice_store: Default::default(),
            bob_store: Default::default(),
        }
    }
    fn alice(&self, settings: Settings) -> TestSession {
        Session::with_settings(Endpoint::new(&self.clock, &self.alice_store), rand_core::OsRng, settings)
    }
    fn bob(&self, settings: Settings) -> TestSession {
        Session::with_settings(Endpoint::new(&self.clock, &self.bob_store), rand_core::OsRng, settings)
    }
    fn advance(&self, ms: i64) {
        self.clock.fetch_add(ms, Ordering::Relaxed);
    }
}

fn responder_settings() -> Settings {
    Settings { force_responder: true, ..Settings::default() }
}

fn take_outbox(s: &TestSession) -> Vec<Vec<u8>> {
    s.with_app(|app| std::mem::take(&mut app.outbox))
}

/// Deliver everything `from` has sent so far to `to`, returning the results.
fn deliver(from: &TestSession, to: &TestSession) -> Vec<Result<ReceiveOk, ReceiveError>> {
    take_outbox(from).iter().map(|m| to.receive(m)).collect()
}

/// Shuttle messages both ways until nobody has anything left to say.
fn run(a: &TestSession, b: &TestSession) {
    for _ in 0..32 {
        let n = deliver(a, b).len() + deliver(b, a).len();
        if n == 0 {
            return;
        }
    }
    panic!("negotiation did not settle");
}

fn message_type(msg: &[u8]) -> &[u8] {
    &msg[4..12]
}

fn assert_fault(result: &Result<ReceiveOk, ReceiveError>, expected: FaultType) {
    match result {
        Err(ReceiveError::ByzantineFault { error, .. }) => assert_eq!(*error, expected),
        other => panic!("expected {:?}, got {:?}", expected, other),
    }
}

fn assert_converged(a: &TestSession, b: &TestSession) {
    assert_eq!(a.with_app(|app| app.completed.clone()), vec![(true, None)]);
    assert_eq!(b.with_app(|app| app.completed.clone()), vec![(true, None)]);
    let ka = a.with_app(|app| app.keys.clone()).unwrap();
    let kb = b.with_app(|app| app.keys.clone()).unwrap();
    assert_eq!(ka.tx_key, kb.rx_key);
    assert_eq!(ka.tx_salt, kb.rx_salt);
    assert_eq!(ka.rx_key, kb.tx_key);
    assert_eq!(ka.rx_salt, kb.tx_salt);
    assert_ne!(ka.tx_key, ka.rx_key);
    assert_eq!(ka.tx_salt.len(), 14);
    assert!(a.sas().is_some());
    assert_eq!(a.sas(), b.sas());
    assert_ne!(a.is_initiator(), b.is_initiator());
}

#[test]
fn forced_responder_handshake() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();

    // Hello exchange: alice learns bob's Hello and HelloACK, and commits.
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    assert_eq!(alice.state(), ZrtpState::CommitSent);
    assert!(alice.is_initiator());

    deliver(&alice, &bob);
    assert_eq!(bob.state(), ZrtpState::DhPart1Sent);
    deliver(&bob, &alice);
    assert_eq!(alice.state(), ZrtpState::DhPart2Sent);
    deliver(&alice, &bob);
    assert_eq!(bob.state(), ZrtpState::Confirm1Sent);

    let results = deliver(&bob, &alice);
    assert!(matches!(results[..], [Ok(ReceiveOk::Session(SessionEvent::KeysAvailable))]));
    assert_eq!(alice.state(), ZrtpState::Confirm2Sent);

    let results = deliver(&alice, &bob);
    assert!(matches!(results[..], [Ok(ReceiveOk::Session(SessionEvent::Established))]));
    let results = deliver(&bob, &alice);
    assert!(matches!(results[..], [Ok(ReceiveOk::Session(SessionEvent::Established))]));
    assert_eq!(alice.state(), ZrtpState::GotConf2Ack);

    assert_converged(&alice, &bob);
    assert_eq!(alice.far_end_client_id().as_deref(), Some("PWaveIPrivateGSM"));
    let set = alice.negotiated().unwrap();
    assert_eq!(Some(set), bob.negotiated());
    assert_eq!(alice.wait_completed(), Some(true));
    assert!(alice.next_timer().is_none());
    assert!(alice.with_app(|app| app.warnings.is_empty()));
    assert!(!alice.is_trusted().unwrap());
}

#[test]
fn commit_contention_resolves_to_one_initiator() {
    for _ in 0..8 {
        let call = Call::new();
        let alice = call.alice(Settings::default());
        let bob = call.bob(Settings::default());
        alice.start().unwrap();
        bob.start().unwrap();
        run(&alice, &bob);
        assert_converged(&alice, &bob);
    }
}

#[test]
fn keys_drive_srtp() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);

    let ka = alice.with_app(|app| app.keys.clone()).unwrap();
    let kb = bob.with_app(|app| app.keys.clone()).unwrap();
    let mut tx = SrtpSession::<Crypto>::new();
    let mut rx = SrtpSession::<Crypto>::new();
    assert!(tx.set_master_keys(&ka.tx_key, &ka.tx_salt, &ka.rx_key, &ka.rx_salt));
    assert!(rx.set_master_keys(&kb.tx_key, &kb.tx_salt, &kb.rx_key, &kb.rx_salt));
    tx.start_new_session().unwrap();
    rx.start_new_session().unwrap();

    // A stream starting at sequence number 0 begins in the second rollover period.
    let first_seq = ka.first_seq.max(1);
    for i in 0..20u16 {
        let seq = first_seq.wrapping_add(i);
        let mut packet = vec![0x80, 0x00];
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 1, 0xde, 0xad, 0xbe, 0xef]);
        packet.extend_from_slice(b"twenty bytes of voice");
        let plain = packet.clone();
        tx.protect(&mut packet).unwrap();
        assert_ne!(packet[12..], plain[12..]);
        rx.unprotect(&mut packet).unwrap();
        assert_eq!(packet, plain);
    }
}

#[test]
fn confirm_mac_failure_then_retransmission() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);

    let confirm1 = take_outbox(&bob).pop().unwrap();
    assert_eq!(message_type(&confirm1), MSG_CONFIRM1);
    let mut forged = confirm1.clone();
    forged[CONFIRM_BODY + 3] ^= 0x40;
    assert_fault(&alice.receive(&forged), FaultType::FailedAuth);
    assert_eq!(alice.state(), ZrtpState::DhPart2Sent);
    assert_eq!(alice.with_app(|app| app.warnings.clone()), vec![SecurityWarning::DenialOfService]);

    assert!(matches!(alice.receive(&confirm1), Ok(ReceiveOk::Session(SessionEvent::KeysAvailable))));
    // A changed copy of an accepted message is refused.
    assert_fault(&alice.receive(&forged), FaultType::ConflictingRetransmission);
    run(&alice, &bob);
    assert_converged(&alice, &bob);
}

#[test]
fn broken_hash_chain_is_rejected() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);

    let mut outbox = take_outbox(&alice);
    let commit = outbox.pop().unwrap();
    assert_eq!(message_type(&commit), MSG_COMMIT);
    for m in &outbox {
        bob.receive(m).unwrap();
    }
    let mut forged = commit.clone();
    forged[COMMIT_H2] ^= 1;
    assert_fault(&bob.receive(&forged), FaultType::FailedAuth);
    assert_eq!(bob.state(), ZrtpState::GotHelloAck);
    assert_eq!(bob.with_app(|app| app.warnings.clone()), vec![SecurityWarning::DenialOfService]);

    bob.receive(&commit).unwrap();
    assert_eq!(bob.state(), ZrtpState::DhPart1Sent);
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    // The warning is raised once per session.
    assert_eq!(bob.with_app(|app| app.warnings.len()), 1);
}

#[test]
fn sdp_hello_hash_binding() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    let hash = alice.hello_hash().unwrap();
    assert_eq!(hash.len(), 64);
    assert_eq!(hash, alice.hello_hash().unwrap());

    bob.set_sdp_hello_hash("1.10", &"00".repeat(32));
    alice.start().unwrap();
    bob.start().unwrap();
    let results = deliver(&alice, &bob);
    assert_fault(&results[0], FaultType::FailedAuth);

    // Hex case does not matter.
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    let hash = alice.hello_hash().unwrap();
    bob.set_sdp_hello_hash("1.10", &hash.to_uppercase());
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
}

#[test]
fn trust_carries_over_to_next_call() {
    let call = Call::new();
    let number = "+15551234567";

    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    for s in [&alice, &bob] {
        s.with_app(|app| app.contacts.push(number.to_string()));
        s.set_phone_number(Some(number));
        s.start().unwrap();
    }
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    let first_keys = alice.with_app(|app| app.keys.clone());
    assert!(!alice.is_trusted().unwrap());
    alice.trust().unwrap();
    bob.trust().unwrap();
    assert!(alice.is_trusted().unwrap());
    assert!(!alice.is_trusted_by_peer());
    drop(alice);
    drop(bob);

    call.advance(60_000);
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    for s in [&alice, &bob] {
        s.with_app(|app| app.contacts.push(number.to_string()));
        s.set_phone_number(Some(number));
        s.start().unwrap();
    }
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    assert_ne!(alice.with_app(|app| app.keys.clone()), first_keys);
    assert!(alice.is_trusted().unwrap());
    assert!(bob.is_trusted().unwrap());
    assert!(alice.is_trusted_by_peer());
    assert!(bob.is_trusted_by_peer());

    alice.untrust().unwrap();
    assert!(!alice.is_trusted().unwrap());
    assert!(alice.with_app(|app| app.warnings.is_empty()));
}

#[test]
fn lost_cache_is_reported_once() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);
    drop(alice);
    drop(bob);

    // Bob loses everything but his ZID.
    {
        let mut store = call.bob_store.lock().unwrap();
        store.retain(|k, _| k == LOCAL_ZID_KEY);
    }
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    assert_eq!(alice.with_app(|app| app.warnings.clone()), vec![SecurityWarning::CacheMismatch]);
    assert!(bob.with_app(|app| app.warnings.is_empty()));
}

#[test]
fn hello_retransmission_gives_up() {
    let call = Call::new();
    let settings = Settings { t1_max_retransmissions: 2, ..Settings::default() };
    let alice = call.alice(settings);
    alice.start().unwrap();
    assert_eq!(take_outbox(&alice).len(), 1);

    assert_eq!(alice.service(), Settings::T1_INITIAL_MS);
    call.advance(Settings::T1_INITIAL_MS);
    assert_eq!(alice.service(), 2 * Settings::T1_INITIAL_MS);
    call.advance(2 * Settings::T1_INITIAL_MS);
    alice.service();
    assert_eq!(take_outbox(&alice).len(), 2);

    call.advance(Settings::T1_MAXIMUM_MS);
    alice.service();
    assert!(take_outbox(&alice).is_empty());
    assert_eq!(
        alice.with_app(|app| app.completed.clone()),
        vec![(false, Some(TEXT_NO_HELLO.to_string()))]
    );
    assert_eq!(alice.wait_completed(), Some(false));
    assert_eq!(alice.state(), ZrtpState::Inactive);
}

#[test]
fn stale_timer_tokens_are_ignored() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    alice.start().unwrap();
    let (stale, _) = alice.next_timer().unwrap();
    alice.stop();
    alice.on_timer(stale);
    alice.start().unwrap();
    take_outbox(&alice);

    let (current, deadline) = alice.next_timer().unwrap();
    assert_ne!(current, stale);
    alice.on_timer(stale);
    assert!(take_outbox(&alice).is_empty());
    assert_eq!(alice.next_timer(), Some((current, deadline)));

    alice.on_timer(current);
    let resent = take_outbox(&alice);
    assert_eq!(resent.len(), 1);
    assert_eq!(message_type(&resent[0]), MSG_HELLO);
    assert_ne!(alice.next_timer().map(|t| t.0), Some(current));
}

#[test]
fn responder_times_out() {
    let call = Call::new();
    let settings = Settings { force_responder: true, responder_timeout: 1000, ..Settings::default() };
    let alice = call.alice(Settings::default());
    let bob = call.bob(settings);
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);
    assert_eq!(bob.state(), ZrtpState::DhPart1Sent);
    take_outbox(&bob);

    call.advance(999);
    bob.service();
    assert!(take_outbox(&bob).is_empty());
    call.advance(1);
    bob.service();

    let sent = take_outbox(&bob);
    assert_eq!(sent.len(), 1);
    assert_eq!(message_type(&sent[0]), MSG_ERROR);
    assert_eq!(u16::from_be_bytes([sent[0][14], sent[0][15]]), error_code::PROTOCOL_TIMEOUT);
    let completed = bob.with_app(|app| app.completed.clone());
    assert_eq!(completed.len(), 1);
    assert!(!completed[0].0);
    assert!(completed[0].1.as_deref().unwrap().starts_with(TEXT_RESPONDER_TIMEOUT));

    // The initiator gives up when it receives the Error.
    for m in &sent {
        alice.receive(m).unwrap();
    }
    assert_eq!(alice.with_app(|app| app.completed.len()), 1);
    assert!(matches!(bob.receive(&sent[0]), Err(ReceiveError::SessionNotStarted)));
}

#[test]
fn lost_conf2ack_is_covered_by_srtp() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    for _ in 0..3 {
        deliver(&alice, &bob);
        deliver(&bob, &alice);
    }
    deliver(&alice, &bob);
    assert_eq!(alice.state(), ZrtpState::Confirm2Sent);
    take_outbox(&bob);

    assert!(!bob.successful_srtp_unprotect().unwrap());
    assert!(alice.successful_srtp_unprotect().unwrap());
    assert_eq!(alice.state(), ZrtpState::GotConf2Ack);
    assert_converged(&alice, &bob);
}

#[test]
fn masquerading_is_forwarded() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    alice.masqueraded_packet_received();
    assert!(alice.with_app(|app| app.masquerading));
}

#[test]
fn messages_before_start_are_dropped() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(Settings::default());
    bob.start().unwrap();
    let hello = take_outbox(&bob).pop().unwrap();
    assert!(matches!(alice.receive(&hello), Err(ReceiveError::SessionNotStarted)));
    alice.start().unwrap();
    assert_fault(&alice.receive(&hello[..20]), FaultType::InvalidPacket);
    assert!(alice.receive(&hello).is_ok());
}

/// The decoded record `store` holds for its only peer.
fn peer_record(store: &Arc<Mutex<HashMap<String, StoredRecord>>>) -> CacheRecord {
    let store = store.lock().unwrap();
    let (_, stored) = store.iter().find(|(key, _)| key.as_str() != LOCAL_ZID_KEY).unwrap();
    CacheRecord::decode(&stored.data).unwrap()
}

#[test]
fn larger_hvi_wins_contention() {
    for _ in 0..8 {
        let call = Call::new();
        let alice = call.alice(Settings::default());
        let bob = call.bob(Settings::default());
        alice.start().unwrap();
        bob.start().unwrap();
        deliver(&alice, &bob);
        deliver(&bob, &alice);

        // Hold alice's Commit back until bob has committed too.
        let (commit_a, rest): (Vec<_>, Vec<_>) =
            take_outbox(&alice).into_iter().partition(|m| message_type(m) == MSG_COMMIT);
        for m in &rest {
            bob.receive(m).unwrap();
        }
        let commit_b = take_outbox(&bob).into_iter().find(|m| message_type(m) == MSG_COMMIT).unwrap();
        let commit_a = commit_a.into_iter().next().unwrap();
        assert_eq!(alice.state(), ZrtpState::CommitSent);
        assert_eq!(bob.state(), ZrtpState::CommitSent);

        let _ = bob.receive(&commit_a);
        let _ = alice.receive(&commit_b);
        run(&alice, &bob);
        assert_converged(&alice, &bob);

        let hvi_a = &commit_a[COMMIT_HVI..COMMIT_HVI + 32];
        let hvi_b = &commit_b[COMMIT_HVI..COMMIT_HVI + 32];
        assert_ne!(hvi_a, hvi_b);
        assert_eq!(alice.is_initiator(), hvi_a > hvi_b);
        assert_eq!(bob.is_initiator(), hvi_b > hvi_a);
    }
}

#[test]
fn dhpart1_with_broken_hash_chain_is_rejected() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);

    let dhpart1 = take_outbox(&bob).pop().unwrap();
    assert_eq!(message_type(&dhpart1), MSG_DHPART1);
    let mut forged = dhpart1.clone();
    forged[DHPART_H1] ^= 1;
    assert_fault(&alice.receive(&forged), FaultType::FailedAuth);
    assert_eq!(alice.state(), ZrtpState::CommitSent);
    assert!(alice.with_app(|app| app.keys.is_none()));
    assert!(alice.sas().is_none());
    assert_eq!(alice.with_app(|app| app.warnings.clone()), vec![SecurityWarning::DenialOfService]);

    alice.receive(&dhpart1).unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
}

#[test]
fn dhpart2_with_broken_hash_chain_is_rejected() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);
    deliver(&bob, &alice);

    let dhpart2 = take_outbox(&alice).pop().unwrap();
    assert_eq!(message_type(&dhpart2), MSG_DHPART2);
    let mut forged = dhpart2.clone();
    forged[DHPART_H1] ^= 1;
    assert_fault(&bob.receive(&forged), FaultType::FailedAuth);
    assert_eq!(bob.state(), ZrtpState::DhPart1Sent);
    assert!(bob.with_app(|app| app.keys.is_none()));
    assert!(take_outbox(&bob).is_empty());
    assert_eq!(bob.with_app(|app| app.warnings.clone()), vec![SecurityWarning::DenialOfService]);

    bob.receive(&dhpart2).unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
}

#[test]
fn dhpart_with_bad_mac_never_yields_keys() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);

    // The MAC can only be checked once Confirm1 reveals H0, so the DHPart1 itself is taken.
    let mut dhpart1 = take_outbox(&bob).pop().unwrap();
    let last = dhpart1.len() - 1;
    dhpart1[last] ^= 1;
    alice.receive(&dhpart1).unwrap();
    assert_eq!(alice.state(), ZrtpState::DhPart2Sent);

    deliver(&alice, &bob);
    let confirm1 = take_outbox(&bob).pop().unwrap();
    assert_eq!(message_type(&confirm1), MSG_CONFIRM1);
    assert_fault(&alice.receive(&confirm1), FaultType::FailedAuth);
    assert_eq!(alice.state(), ZrtpState::DhPart2Sent);
    assert!(alice.with_app(|app| app.keys.is_none()));
    assert!(alice.with_app(|app| app.completed.is_empty()));
}

#[test]
fn matched_rs2_is_kept_as_rs2() {
    let call = Call::new();
    let initiator = Settings { rs2_policy: Rs2Policy::MatchedSecret, ..Settings::default() };
    let responder = Settings { force_responder: true, ..initiator };

    let alice = call.alice(initiator);
    let bob = call.bob(responder);
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    drop(alice);
    drop(bob);

    // Bob stores a new secret but alice never learns the call completed.
    let alice = call.alice(initiator);
    let bob = call.bob(responder);
    alice.start().unwrap();
    bob.start().unwrap();
    for _ in 0..3 {
        deliver(&alice, &bob);
        deliver(&bob, &alice);
    }
    deliver(&alice, &bob);
    assert_eq!(bob.state(), ZrtpState::Conf2AckSent);
    take_outbox(&bob);
    alice.stop();
    drop(alice);
    drop(bob);
    assert!(peer_record(&call.alice_store).rs2().is_none());
    assert!(peer_record(&call.bob_store).rs2().is_some());

    // Alice's rs1 now only matches bob's rs2.
    let alice = call.alice(initiator);
    let bob = call.bob(responder);
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    assert!(alice.with_app(|app| app.warnings.is_empty()));
    assert!(bob.with_app(|app| app.warnings.is_empty()));

    let (a, b) = (peer_record(&call.alice_store), peer_record(&call.bob_store));
    assert_eq!(a.rs1(), b.rs1());
    assert_eq!(a.rs2().unwrap(), b.rs2().unwrap());
}

#[test]
fn legacy_peers_pad_the_dh_result() {
    let call = Call::new();
    let legacy = Settings { client_id: *CLIENT_ID_LEGACY, ..Settings::default() };
    let alice = call.alice(legacy);
    let bob = call.bob(Settings { force_responder: true, ..legacy });
    alice.start().unwrap();
    bob.start().unwrap();
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    assert_eq!(alice.far_end_client_id().as_deref(), Some("KhamsaPrivateGSM"));

    // Only bob pads when only alice looks legacy, so their keys differ.
    let alice = call.alice(legacy);
    let bob = call.bob(responder_settings());
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);
    let results = deliver(&bob, &alice);
    assert_fault(results.last().unwrap(), FaultType::FailedAuth);
    assert!(alice.with_app(|app| app.keys.is_none()));
    assert!(bob.with_app(|app| app.keys.is_none()));
}

#[test]
fn trust_requires_an_address_book_entry() {
    let call = Call::new();
    let number = "+15557654321";
    let alice = call.alice(Settings::default());
    let bob = call.bob(responder_settings());
    for s in [&alice, &bob] {
        s.set_phone_number(Some(number));
        s.start().unwrap();
    }
    run(&alice, &bob);
    assert_converged(&alice, &bob);

    alice.trust().unwrap();
    assert!(peer_record(&call.alice_store).trust());
    assert!(!alice.is_trusted().unwrap());

    alice.with_app(|app| app.contacts.push(number.to_string()));
    alice.trust().unwrap();
    assert!(alice.is_trusted().unwrap());
}

#[test]
fn cache_expiry_counts_from_accepted_confirm1() {
    let call = Call::new();
    let alice = call.alice(Settings::default());
    let bob = call.bob(Settings { force_responder: true, cache_expiry_seconds: 3600, ..Settings::default() });
    alice.start().unwrap();
    bob.start().unwrap();
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);
    deliver(&bob, &alice);
    deliver(&alice, &bob);

    let confirm1 = take_outbox(&bob).pop().unwrap();
    let mut forged = confirm1.clone();
    forged[CONFIRM_BODY] ^= 1;
    assert_fault(&alice.receive(&forged), FaultType::FailedAuth);

    call.advance(5_000);
    let accepted_at = call.clock.load(Ordering::Relaxed);
    alice.receive(&confirm1).unwrap();
    call.advance(5_000);
    run(&alice, &bob);
    assert_converged(&alice, &bob);
    assert_eq!(peer_record(&call.alice_store).expiry(), accepted_at + 3600 * 1000);
}
