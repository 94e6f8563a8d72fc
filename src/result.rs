/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/// A type of fault occurred because we received a bad packet.
///
/// An unauthenticated attacker can intentionally trigger any of these, so it is best to
/// treat these as raw user input that needs to be sanitized.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum FaultType {
    /// The received message was not well formed.
    InvalidPacket,

    /// A hash chain link, implicit MAC, HVI, confirm MAC or the out-of-band hello hash
    /// failed to verify.
    FailedAuth,

    /// The message differs from the message of the same type that was already accepted.
    ConflictingRetransmission,

    /// The message is not allowed in the current state or role.
    OutOfSequence,

    /// The message names an algorithm we do not implement.
    UnsupportedAlgorithm,

    /// The peer's Hello was refused: it speaks an older protocol version or uses our own ZID.
    /// An Error message has been sent in reply.
    Rejected,

    /// Key agreement with the peer's public value failed.
    InvalidPublicValue,
}

/// An error that occurred during the receipt of a given message.
#[derive(Debug)]
pub enum ReceiveError {
    /// A type of fault that can occur because a remote peer sent us a bad message.
    /// Such messages are ignored by the state machine, but a user might want to log
    /// them for debugging or tracing.
    ///
    /// Because an unauthenticated remote peer can force these to occur with specific
    /// contained information, it is recommended in production to either drop these
    /// immediately, or log them safely to a local output stream and then drop them.
    ByzantineFault {
        /// The type of fault that has occurred. Be cautious if you choose to read this
        /// value, as an attacker has control over it.
        error: FaultType,
        /// Some faults are naturally occurring, i.e. they can occur between two well behaved
        /// parties over a lossy, reordering transport. Late retransmissions are the usual
        /// example. This boolean is false for those.
        ///
        /// Faults caused by flipped bits, forged messages or a misbehaving peer are
        /// considered unnatural. Every fault that also raises the denial of service warning
        /// is unnatural.
        unnatural: bool,
        /// The file of this implementation from which this error was generated.
        #[cfg(feature = "debug")]
        file: &'static str,
        /// The line number from which this error was generated. As such this number uniquely
        /// identifies each possible fault.
        #[cfg(feature = "debug")]
        line: u32,
    },

    /// The session has not been started, or has already ended, so the message was dropped.
    SessionNotStarted,

    /// One of the secret store callbacks returned an error, so the message had to be dropped.
    StorageError(std::io::Error),
}

impl From<std::io::Error> for ReceiveError {
    fn from(e: std::io::Error) -> Self {
        ReceiveError::StorageError(e)
    }
}

macro_rules! fault {
    ($name:expr, $unnatural:ident) => {
        ReceiveError::ByzantineFault {
            #[cfg(feature = "debug")]
            file: file!(),
            #[cfg(feature = "debug")]
            line: line!(),
            error: $name,
            unnatural: $unnatural,
        }
    };
}
pub(crate) use fault;

/// Result generated by `Session::receive` for a message that was accepted.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ReceiveOk {
    /// The message was processed by the negotiation state machine.
    Session(SessionEvent),
    /// The message was valid but is informational only: Ping, PingACK, GoClear, ClearACK,
    /// SASrelay or RelayACK.
    Ignored,
}

/// Something that can occur to a session when a message is received successfully.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SessionEvent {
    /// The message advanced negotiation or was answered. No action needs to be taken.
    Control,
    /// The message was an identical copy of one already accepted. Our reply, if there is one,
    /// was sent again.
    Retransmission,
    /// The key exchange produced SRTP master keys, which were handed to
    /// `ApplicationLayer::key_exchange_completed`. The SAS is now available.
    KeysAvailable,
    /// Negotiation completed successfully.
    Established,
    /// The session failed. `ApplicationLayer::session_completed` was called with the reason.
    Failed,
}

/// Error codes of `SrtpSession::start_new_session`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SrtpStartError {
    /// A session is already running. Call `end_session` first.
    AlreadyActive,
    /// A master salt is missing for one direction.
    SaltUndefined,
    /// A master key is missing for one direction.
    KeyUndefined,
    /// The transmit session keys could not be derived from the master key.
    KeyDerivationFailed,
}

impl SrtpStartError {
    /// The numeric result code: -3, -2, -1 or -99.
    pub fn code(self) -> i32 {
        match self {
            Self::AlreadyActive => -3,
            Self::SaltUndefined => -2,
            Self::KeyUndefined => -1,
            Self::KeyDerivationFailed => -99,
        }
    }
}

/// Error codes of `SrtpSession::protect` and `SrtpSession::unprotect`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SrtpError {
    /// No session is running.
    NotStarted,
    /// Receive session keys could not be derived.
    KeyDerivation,
    /// The packet is too short to carry a tag, or the tag did not verify.
    InvalidAuth,
    /// The packet is empty or its RTP header is malformed.
    NullPacket,
    /// The packet index was already received or lags the window.
    Replayed,
}

impl SrtpError {
    /// The numeric result code, -1 through -5.
    pub fn code(self) -> i32 {
        match self {
            Self::NotStarted => -1,
            Self::KeyDerivation => -2,
            Self::InvalidAuth => -3,
            Self::NullPacket => -4,
            Self::Replayed => -5,
        }
    }
}
