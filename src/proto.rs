/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

/// First two bytes of every ZRTP message.
pub const MAGIC: [u8; 2] = [0x50, 0x5a];
pub const HEADER_SIZE: usize = 12;
/// Size of the truncated HMAC carried by Hello, Commit, DHPart1/2 and Confirm1/2.
pub const MAC_SIZE: usize = 8;
pub const ZID_SIZE: usize = 12;
pub const HASH_IMAGE_SIZE: usize = 32;
pub const HVI_SIZE: usize = 32;
pub const SECRET_ID_SIZE: usize = 8;
pub const CFB_IV_SIZE: usize = 16;
pub const CLIENT_ID_SIZE: usize = 16;

pub const VERSION: &[u8; 4] = b"1.10";
/// Prefix an out-of-band `zrtp-hash` version string must carry to be ours.
pub const VERSION_PREFIX: &str = "1.1";
pub const CLIENT_ID: &[u8; CLIENT_ID_SIZE] = b"PWaveIPrivateGSM";
pub const CLIENT_ID_LEGACY: &[u8; CLIENT_ID_SIZE] = b"KhamsaPrivateGSM";

pub const MSG_HELLO: &[u8; 8] = b"Hello   ";
pub const MSG_HELLO_ACK: &[u8; 8] = b"HelloACK";
pub const MSG_COMMIT: &[u8; 8] = b"Commit  ";
pub const MSG_DHPART1: &[u8; 8] = b"DHPart1 ";
pub const MSG_DHPART2: &[u8; 8] = b"DHPart2 ";
pub const MSG_CONFIRM1: &[u8; 8] = b"Confirm1";
pub const MSG_CONFIRM2: &[u8; 8] = b"Confirm2";
pub const MSG_CONF2_ACK: &[u8; 8] = b"Conf2ACK";
pub const MSG_ERROR: &[u8; 8] = b"Error   ";
pub const MSG_ERROR_ACK: &[u8; 8] = b"ErrorACK";
pub const MSG_GO_CLEAR: &[u8; 8] = b"GoClear ";
pub const MSG_CLEAR_ACK: &[u8; 8] = b"ClearACK";
pub const MSG_SAS_RELAY: &[u8; 8] = b"SASrelay";
pub const MSG_RELAY_ACK: &[u8; 8] = b"RelayACK";
pub const MSG_PING: &[u8; 8] = b"Ping    ";
pub const MSG_PING_ACK: &[u8; 8] = b"PingACK ";

/// Hello: the fixed part before the algorithm lists.
pub const HELLO_MIN_SIZE: usize = 80;
pub const HELLO_VERSION: usize = 12;
pub const HELLO_CLIENT_ID: usize = 16;
pub const HELLO_H3: usize = 32;
pub const HELLO_ZID: usize = 64;
pub const HELLO_COUNTS: usize = 76;
pub const HELLO_ALGORITHMS: usize = 80;

pub const COMMIT_SIZE: usize = 116;
pub const COMMIT_H2: usize = 12;
pub const COMMIT_ZID: usize = 44;
pub const COMMIT_HASH: usize = 56;
pub const COMMIT_CIPHER: usize = 60;
pub const COMMIT_AUTH: usize = 64;
pub const COMMIT_KEY_AGREEMENT: usize = 68;
pub const COMMIT_SAS: usize = 72;
pub const COMMIT_HVI: usize = 76;

/// DHPart length in words is the public value length in words plus this.
pub const DHPART_FIXED_WORDS: usize = 21;
pub const DHPART_H1: usize = 12;
pub const DHPART_RS1_ID: usize = 44;
pub const DHPART_RS2_ID: usize = 52;
pub const DHPART_AUX_ID: usize = 60;
pub const DHPART_PBX_ID: usize = 68;
pub const DHPART_PV: usize = 76;

pub const CONFIRM_MIN_SIZE: usize = 56;
pub const CONFIRM_MAC: usize = 12;
pub const CONFIRM_IV: usize = 20;
pub const CONFIRM_BODY: usize = 36;
/// H0, one pad byte, signature length (9 bits over 2 bytes), flags, cache expiry interval.
pub const CONFIRM_PLAINTEXT_SIZE: usize = 40;

pub const ERROR_SIZE: usize = 16;

pub const FLAG_DISCLOSURE: u8 = 0x01;
pub const FLAG_ALLOW_CLEAR: u8 = 0x02;
pub const FLAG_SAS_VERIFIED: u8 = 0x04;
pub const FLAG_ENROLLMENT: u8 = 0x08;

/// Role strings keyed by retained secrets to produce the secret IDs in DHPart messages.
pub const ROLE_INITIATOR: &[u8] = b"Initiator";
pub const ROLE_RESPONDER: &[u8] = b"Responder";

pub const KDF_S0_LABEL: &[u8] = b"ZRTP-HMAC-KDF";
pub const LABEL_INITIATOR_MASTER_KEY: &[u8] = b"Initiator SRTP master key";
pub const LABEL_INITIATOR_MASTER_SALT: &[u8] = b"Initiator SRTP master salt";
pub const LABEL_RESPONDER_MASTER_KEY: &[u8] = b"Responder SRTP master key";
pub const LABEL_RESPONDER_MASTER_SALT: &[u8] = b"Responder SRTP master salt";
pub const LABEL_SAS: &[u8] = b"SAS";
pub const LABEL_RETAINED_SECRET: &[u8] = b"retained secret";
pub const LABEL_INITIATOR_ZRTP_KEY: &[u8] = b"Initiator ZRTP key";
pub const LABEL_RESPONDER_ZRTP_KEY: &[u8] = b"Responder ZRTP key";
pub const LABEL_INITIATOR_HMAC_KEY: &[u8] = b"Initiator HMAC key";
pub const LABEL_RESPONDER_HMAC_KEY: &[u8] = b"Responder HMAC key";

pub const MASTER_SALT_BITS: u32 = 112;
pub const SAS_BITS: u32 = 256;
pub const RETAINED_SECRET_BITS: u32 = 256;
pub const RETAINED_SECRET_SIZE: usize = 32;

/// Store key under which the local ZID is kept.
pub const LOCAL_ZID_KEY: &str = "MyZID";

pub const TEXT_NO_HELLO: &str = "No HELLO message received";
pub const TEXT_NO_RESPONSE: &str = "No response received";
pub const TEXT_RESPONDER_TIMEOUT: &str = "Responder timeout";
pub const TEXT_GENERIC_ERROR: &str = "Generic ZRTP error";
pub const TEXT_ERROR_SENDING_DH: &str = "Error sending DH";
pub const TEXT_KEY_EXCHANGE_NOT_COMPLETED: &str = "Key exchange not completed";

/// ZRTP Error message codes.
pub mod error_code {
    pub const MALFORMED_PACKET: u16 = 0x10;
    pub const CRITICAL_SW_FAULT: u16 = 0x20;
    pub const INCORRECT_VERSION: u16 = 0x30;
    pub const HELLO_MISMATCH: u16 = 0x40;
    pub const UNSUPPORTED_HASH: u16 = 0x51;
    pub const UNSUPPORTED_CIPHER: u16 = 0x52;
    pub const UNSUPPORTED_KEY_EXCHANGE: u16 = 0x53;
    pub const UNSUPPORTED_SRTP_AUTH: u16 = 0x54;
    pub const UNSUPPORTED_SAS_SCHEME: u16 = 0x55;
    pub const UNAVAILABLE_SHARED_SECRET: u16 = 0x56;
    pub const DH_BAD_PVI: u16 = 0x61;
    pub const DH_HVI_WRONG: u16 = 0x62;
    pub const UNTRUSTED_SAS: u16 = 0x63;
    pub const BAD_CONFIRM_HMAC: u16 = 0x70;
    pub const NONCE_REUSED: u16 = 0x80;
    pub const EQUAL_ZIDS_IN_HELLO: u16 = 0x90;
    pub const SERVICE_UNAVAILABLE: u16 = 0xa0;
    pub const PROTOCOL_TIMEOUT: u16 = 0xb0;
    pub const UNALLOWED_GO_CLEAR: u16 = 0x100;

    /// Human readable name of an Error message code.
    pub fn name(code: u16) -> String {
        match code {
            MALFORMED_PACKET => "MALFORMED PACKET".into(),
            CRITICAL_SW_FAULT => "CRITICAL SW FAULT".into(),
            INCORRECT_VERSION => "INCORRECT VERSION".into(),
            HELLO_MISMATCH => "HELLO MISMATCH".into(),
            UNSUPPORTED_HASH => "UNSUPPORTED HASH".into(),
            UNSUPPORTED_CIPHER => "UNSUPPORTED CIPHER".into(),
            UNSUPPORTED_KEY_EXCHANGE => "UNSUPPORTED KEY EXCHANGE".into(),
            UNSUPPORTED_SRTP_AUTH => "UNSUPPORTED SRTP AUTH".into(),
            UNSUPPORTED_SAS_SCHEME => "UNSUPPORTED SAS SCHEME".into(),
            UNAVAILABLE_SHARED_SECRET => "UNAVAILABLE SHARED SECRET".into(),
            DH_BAD_PVI => "DH BAD PVI".into(),
            DH_HVI_WRONG => "DH HVI WRONG".into(),
            UNTRUSTED_SAS => "UNTRUSTED SAS".into(),
            BAD_CONFIRM_HMAC => "BAD CONFIRM HMAC".into(),
            NONCE_REUSED => "NONCE REUSED".into(),
            EQUAL_ZIDS_IN_HELLO => "EQUAL ZIDS IN HELLO".into(),
            SERVICE_UNAVAILABLE => "SERVICE UNAVAILABLE".into(),
            PROTOCOL_TIMEOUT => "PROTOCOL TIMEOUT".into(),
            UNALLOWED_GO_CLEAR => "UNALLOWED GO CLEAR RCVD".into(),
            other => format!("UNKNOWN({})", other),
        }
    }
}

/// Kinds of security warning reported through `ApplicationLayer::security_warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SecurityWarning {
    /// A message failed an integrity check or differed from an already accepted copy.
    DenialOfService = 1,
    /// Neither retained secret matched the peer's. Key continuity with this peer is broken.
    CacheMismatch = 2,
}

/// The ZRTP negotiation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZrtpState {
    Inactive,
    SendingHello,
    GotHelloAck,
    GotCommit,
    CommitSent,
    GotDhPart1,
    DhPart1Sent,
    GotDhPart2,
    DhPart2Sent,
    GotConfirm1,
    Confirm1Sent,
    GotConfirm2,
    Confirm2Sent,
    GotConf2Ack,
    Conf2AckSent,
}

impl ZrtpState {
    pub fn text(self) -> &'static str {
        match self {
            Self::Inactive => "Inactive",
            Self::SendingHello => "Sending Hello",
            Self::GotHelloAck => "Got HelloACK",
            Self::GotCommit => "Got Commit",
            Self::CommitSent => "Commit Sent",
            Self::GotDhPart1 => "Got DHPart1",
            Self::DhPart1Sent => "DHPart1 Sent",
            Self::GotDhPart2 => "Got DHPart2",
            Self::DhPart2Sent => "DHPart2 Sent",
            Self::GotConfirm1 => "Got Confirm1",
            Self::Confirm1Sent => "Confirm1 Sent",
            Self::GotConfirm2 => "Got Confirm2",
            Self::Confirm2Sent => "Confirm2 Sent",
            Self::GotConf2Ack => "Got Conf2ACK",
            Self::Conf2AckSent => "Conf2ACK Sent",
        }
    }
}

#[test]
fn error_code_names() {
    assert_eq!(error_code::name(error_code::PROTOCOL_TIMEOUT), "PROTOCOL TIMEOUT");
    assert_eq!(error_code::name(error_code::UNALLOWED_GO_CLEAR), "UNALLOWED GO CLEAR RCVD");
    assert_eq!(error_code::name(0x77), "UNKNOWN(119)");
}
