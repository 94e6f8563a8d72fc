/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use crate::algorithm::NegotiatedSet;
use crate::proto::{SecurityWarning, ZrtpState};

/// ZRTP events that might be interesting to log or aggregate into metrics.
///
/// Message types are carried as their raw 8-byte wire tags, for example `b"Commit  "`.
#[derive(Debug, Clone, Copy)]
pub enum LogEvent<'a> {
    /// A message arrived before `start` or after the session ended.
    DroppedNotStarted,
    /// A message failed framing checks: too short, bad magic or wrong length field.
    DroppedMalformed,
    /// A message of a type we do not know.
    UnknownMessageType(&'a [u8; 8]),
    ReceivedMessage(&'a [u8; 8]),
    SentMessage(&'a [u8; 8]),
    /// An identical copy of an already accepted message arrived.
    ReceivedRetransmission(&'a [u8; 8]),
    /// A well formed message arrived in a state or role where it is not expected.
    /// `(message_type, state)`
    DroppedUnexpected(&'a [u8; 8], ZrtpState),
    /// Ping, PingACK, GoClear, ClearACK, SASrelay and RelayACK are accepted but not acted on.
    IgnoredMessage(&'a [u8; 8]),
    /// `(from, to)`
    StateChanged(ZrtpState, ZrtpState),
    /// `(algorithms, peer_is_legacy_client)`
    NegotiatedAlgorithms(&'a NegotiatedSet, bool),
    /// Both ends sent Commit. `true` if we remain the initiator.
    CommitContention(bool),
    /// The peer speaks a protocol version we cannot. `(major, minor)` as ASCII.
    IncorrectVersion(u8, u8),
    /// The out-of-band hello hash was announced for a different protocol version.
    SdpVersionMismatch(&'a str),
    CreatedLocalZid,
    /// A stored cache record has an unrecognized length and was treated as empty.
    InvalidCacheRecord,
    /// Which retained secret, 1 or 2, the peer's secret IDs matched.
    RetainedSecretMatched(u8),
    NoRetainedSecrets,
    /// `(state, retransmission_count)`
    Resent(ZrtpState, u32),
    TimeoutHello,
    TimeoutNoResponse(ZrtpState),
    ResponderTimeout(ZrtpState),
    /// A stale timer token fired after the timer slot was reused.
    StaleTimer,
    SecurityWarning(SecurityWarning, &'a str),
    SentError(u16),
    ReceivedError(u16),
    /// `session_completed` was invoked. `true` on success.
    SessionCompleted(bool),
}

macro_rules! log {
    ($app:expr, $event:expr) => {
        #[cfg(feature = "logging")]
        $app.event_log($event);
    };
}
pub(crate) use log;
