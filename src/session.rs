/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::algorithm::NegotiatedSet;
use crate::application::{ApplicationLayer, CryptoLayer, Settings};
use crate::proto::ZrtpState;
use crate::result::{ReceiveError, ReceiveOk};
use crate::zrtp::Protocol;
pub use crate::zrtp::TimerToken;

/// One ZRTP negotiation between this endpoint and a single peer.
///
/// All entry points serialize on an internal lock, so a session may be shared between the
/// packet receive thread, a timer thread and the user interface. Callbacks into the
/// `ApplicationLayer` run with that lock held and must not call back into the same session.
pub struct Session<C: CryptoLayer, App: ApplicationLayer<C>> {
    protocol: Mutex<Protocol<C, App>>,
    completion: Condvar,
}

impl<C: CryptoLayer, App: ApplicationLayer<C>> Session<C, App> {
    /// Create an idle session using `C::SETTINGS`.
    pub fn new(app: App, rng: C::Rng) -> Self {
        Self::with_settings(app, rng, C::SETTINGS)
    }

    pub fn with_settings(app: App, rng: C::Rng, settings: Settings) -> Self {
        Self { protocol: Mutex::new(Protocol::new(app, rng, settings)), completion: Condvar::new() }
    }

    fn lock(&self) -> MutexGuard<'_, Protocol<C, App>> {
        self.protocol.lock().unwrap()
    }

    /// Wake `wait_completed` callers if the last operation ended the negotiation.
    fn notify(&self, protocol: &Protocol<C, App>) {
        if !protocol.is_started() || protocol.completed().is_some() {
            self.completion.notify_all();
        }
    }

    /// Run `f` with exclusive access to the application object.
    pub fn with_app<R>(&self, f: impl FnOnce(&mut App) -> R) -> R {
        f(&mut self.lock().app)
    }

    /// Begin negotiation by sending Hello. Calling this on a running session does nothing.
    ///
    /// Fails only if the local ZID could not be loaded from or saved to the secret store.
    pub fn start(&self) -> io::Result<()> {
        self.lock().start()
    }

    /// Abort negotiation, or end a negotiated session, and erase its key material.
    /// `session_completed` is not called for a session that had not completed yet.
    pub fn stop(&self) {
        let mut protocol = self.lock();
        protocol.stop();
        self.notify(&protocol);
    }

    /// Process one ZRTP message received from the peer.
    ///
    /// Errors describe why a message was dropped. They never end the session by themselves;
    /// a session fails only through `ApplicationLayer::session_completed`.
    pub fn receive(&self, message: &[u8]) -> Result<ReceiveOk, ReceiveError> {
        let mut protocol = self.lock();
        let result = protocol.receive(message);
        self.notify(&protocol);
        result
    }

    /// Fire the retransmission timer if it is due. Returns the number of time units after which
    /// this should be called again.
    ///
    /// This is the polling alternative to `next_timer` and `on_timer`. Both may be mixed.
    pub fn service(&self) -> i64 {
        let mut protocol = self.lock();
        let next = protocol.service();
        self.notify(&protocol);
        next
    }

    /// The armed timer and its absolute deadline, as measured by `ApplicationLayer::time`.
    pub fn next_timer(&self) -> Option<(TimerToken, i64)> {
        self.lock().next_timer()
    }

    /// Deliver a timer that was scheduled from `next_timer`. Tokens of timers that have since
    /// been cancelled or rearmed are ignored.
    pub fn on_timer(&self, token: TimerToken) {
        let mut protocol = self.lock();
        protocol.on_timer(token);
        self.notify(&protocol);
    }

    /// Block until the session completes or is stopped. Returns `Some(success)` if
    /// `session_completed` was called, `None` if the session was stopped first.
    pub fn wait_completed(&self) -> Option<bool> {
        let protocol = self.lock();
        let protocol = self
            .completion
            .wait_while(protocol, |p| p.is_started() && p.completed().is_none())
            .unwrap();
        protocol.completed()
    }

    /// Like `wait_completed`, but gives up after `timeout` and returns `None`.
    pub fn wait_completed_timeout(&self, timeout: Duration) -> Option<bool> {
        let protocol = self.lock();
        let (protocol, _) = self
            .completion
            .wait_timeout_while(protocol, timeout, |p| p.is_started() && p.completed().is_none())
            .unwrap();
        protocol.completed()
    }

    /// The user confirmed the SAS with the peer. The new retained secret is stored as trusted
    /// and bound to the phone number set with `set_phone_number`.
    pub fn trust(&self) -> io::Result<()> {
        self.lock().trust()
    }

    /// The user withdrew trust. The new retained secret is stored untrusted and unbound.
    pub fn untrust(&self) -> io::Result<()> {
        self.lock().untrust()
    }

    /// Whether the cache entry of the peer is trusted and matched in this session.
    pub fn is_trusted(&self) -> io::Result<bool> {
        self.lock().is_trusted()
    }

    /// Whether the peer's last Confirm carried the SAS verified flag.
    pub fn is_trusted_by_peer(&self) -> bool {
        self.lock().remote_trust()
    }

    /// The lowercase hex SHA-256 of the Hello this session will send, for publication in the
    /// SDP `a=zrtp-hash` attribute. The Hello is fixed from the first call until the session
    /// ends.
    pub fn hello_hash(&self) -> io::Result<String> {
        self.lock().hello_hash()
    }

    /// Bind the peer's Hello to a hash received out of band. Any Hello that does not hash to it
    /// is dropped and raises a denial of service warning.
    pub fn set_sdp_hello_hash(&self, version: &str, hash: &str) {
        self.lock().set_sdp_hello_hash(version, hash)
    }

    /// The short authentication string, once keys are available.
    pub fn sas(&self) -> Option<String> {
        self.lock().sas().map(str::to_string)
    }

    /// Set the phone number of the peer, used to bind cache entries to contacts.
    pub fn set_phone_number(&self, number: Option<&str>) {
        self.lock().set_phone_number(number)
    }

    /// Report that an SRTP packet from the peer authenticated. While waiting for Conf2ACK
    /// this is taken as proof the peer has its keys, and the session completes.
    pub fn successful_srtp_unprotect(&self) -> io::Result<bool> {
        let mut protocol = self.lock();
        let result = protocol.successful_srtp_unprotect();
        self.notify(&protocol);
        result
    }

    /// The transport received a ZRTP message masqueraded as RTP.
    pub fn masqueraded_packet_received(&self) {
        self.lock().app.set_masquerading_active()
    }

    /// Ask the transport to also send ZRTP messages masqueraded as RTP.
    pub fn set_masquerading_on(&self) {
        self.lock().app.set_masquerading_dual()
    }

    pub fn state(&self) -> ZrtpState {
        self.lock().state()
    }

    pub fn is_initiator(&self) -> bool {
        self.lock().is_initiator()
    }

    /// The algorithms in use, once the peer's Hello has been accepted.
    pub fn negotiated(&self) -> Option<NegotiatedSet> {
        self.lock().negotiated()
    }

    /// The client identifier from the peer's Hello.
    pub fn far_end_client_id(&self) -> Option<String> {
        self.lock().far_end_client_id()
    }
}
