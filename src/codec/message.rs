//! Message encode/decode (§4.3). Wire format: a 4-byte big-endian length
//! prefix (byte count of everything that follows), a 2-byte message type,
//! then a sequence of TLV options (2-byte tag, 2-byte length, value).

use bytes::{BufMut, BytesMut};

use crate::error::DecodeError;

use super::options::{DecisionAlgorithm, OptionTag, TlsSupported};

/// Number of bytes in the length prefix itself; not included in the prefix
/// value.
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    Preinit = 1,
    PreinitReply = 2,
    Starttls = 3,
    Init = 4,
    InitReply = 5,
    SetOption = 6,
    SetOptionReply = 7,
    ServerError = 8,
    EchoRequest = 9,
    EchoReply = 10,
}

impl MsgType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => MsgType::Preinit,
            2 => MsgType::PreinitReply,
            3 => MsgType::Starttls,
            4 => MsgType::Init,
            5 => MsgType::InitReply,
            6 => MsgType::SetOption,
            7 => MsgType::SetOptionReply,
            8 => MsgType::ServerError,
            9 => MsgType::EchoRequest,
            10 => MsgType::EchoReply,
            _ => return None,
        })
    }

    /// All message types this client can send or receive, advertised in
    /// `INIT`.
    pub const SUPPORTED: &'static [MsgType] = &[
        MsgType::Preinit,
        MsgType::PreinitReply,
        MsgType::Starttls,
        MsgType::Init,
        MsgType::InitReply,
        MsgType::SetOption,
        MsgType::SetOptionReply,
        MsgType::ServerError,
        MsgType::EchoRequest,
        MsgType::EchoReply,
    ];
}

/// A fully decoded frame. Every field but `msg_type` is optional, mirroring
/// the original's per-option `_set` flags; the state machine is responsible
/// for checking which options are required for a given message type.
#[derive(Debug, Default)]
pub struct DecodedMessage {
    pub msg_type: Option<MsgType>,
    pub seq_number: Option<u32>,
    pub cluster_name: Option<String>,
    pub tls_supported: Option<TlsSupported>,
    pub tls_client_cert_required: Option<bool>,
    pub node_id: Option<u32>,
    pub supported_messages: Option<Vec<u16>>,
    pub supported_options: Option<Vec<u16>>,
    pub server_max_request_size: Option<u32>,
    pub server_max_reply_size: Option<u32>,
    pub supported_decision_algorithms: Option<Vec<DecisionAlgorithm>>,
    pub decision_algorithm: Option<DecisionAlgorithm>,
    pub heartbeat_interval: Option<u32>,
    pub reply_error_code: Option<u16>,
}

fn put_header(buf: &mut BytesMut, msg_type: MsgType) -> usize {
    buf.put_u32(0); // length placeholder, patched in `finish`
    buf.put_u16(msg_type as u16);
    buf.len()
}

fn put_opt_u32(buf: &mut BytesMut, tag: OptionTag, value: u32) {
    buf.put_u16(tag as u16);
    buf.put_u16(4);
    buf.put_u32(value);
}

fn put_opt_u8(buf: &mut BytesMut, tag: OptionTag, value: u8) {
    buf.put_u16(tag as u16);
    buf.put_u16(1);
    buf.put_u8(value);
}

fn put_opt_str(buf: &mut BytesMut, tag: OptionTag, value: &str) {
    let bytes = value.as_bytes();
    buf.put_u16(tag as u16);
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn put_opt_u16_list(buf: &mut BytesMut, tag: OptionTag, values: &[u16]) {
    buf.put_u16(tag as u16);
    buf.put_u16((values.len() * 2) as u16);
    for v in values {
        buf.put_u16(*v);
    }
}

fn put_opt_u8_list(buf: &mut BytesMut, tag: OptionTag, values: &[u8]) {
    buf.put_u16(tag as u16);
    buf.put_u16(values.len() as u16);
    buf.put_slice(values);
}

/// Patches the length prefix now that the frame body is complete.
fn finish(mut buf: BytesMut) -> BytesMut {
    let body_len = (buf.len() - FRAME_HEADER_LEN) as u32;
    buf[0..4].copy_from_slice(&body_len.to_be_bytes());
    buf
}

pub fn encode_preinit(seq: u32, cluster_name: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::Preinit);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    put_opt_str(&mut buf, OptionTag::ClusterName, cluster_name);
    finish(buf)
}

pub fn encode_starttls(seq: u32) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::Starttls);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    finish(buf)
}

pub fn encode_init(seq: u32, node_id: u32) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::Init);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    put_opt_u32(&mut buf, OptionTag::NodeId, node_id);
    let msgs: Vec<u16> = MsgType::SUPPORTED.iter().map(|m| *m as u16).collect();
    put_opt_u16_list(&mut buf, OptionTag::SupportedMessages, &msgs);
    let opts: Vec<u16> = OptionTag::SUPPORTED.iter().map(|o| *o as u16).collect();
    put_opt_u16_list(&mut buf, OptionTag::SupportedOptions, &opts);
    finish(buf)
}

pub fn encode_set_option(seq: u32, algorithm: DecisionAlgorithm, heartbeat_interval: u32) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::SetOption);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    put_opt_u8(&mut buf, OptionTag::DecisionAlgorithm, algorithm.to_u8());
    put_opt_u32(&mut buf, OptionTag::HeartbeatInterval, heartbeat_interval);
    finish(buf)
}

pub fn encode_echo_request(seq: u32) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::EchoRequest);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    finish(buf)
}

// Used only by the in-process mock server in tests to speak the server
// side of the protocol (`supported_decision_algorithms` is never sent by
// the client).
#[cfg(any(test, feature = "test-support"))]
pub fn encode_preinit_reply(
    seq: u32,
    tls_supported: TlsSupported,
    tls_client_cert_required: bool,
) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::PreinitReply);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    put_opt_u8(&mut buf, OptionTag::TlsSupported, tls_supported.to_u8());
    put_opt_u8(
        &mut buf,
        OptionTag::TlsClientCertRequired,
        tls_client_cert_required as u8,
    );
    finish(buf)
}

#[cfg(any(test, feature = "test-support"))]
pub fn encode_init_reply(
    seq: u32,
    server_max_request_size: u32,
    server_max_reply_size: u32,
    supported_decision_algorithms: &[DecisionAlgorithm],
) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::InitReply);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    put_opt_u32(
        &mut buf,
        OptionTag::ServerMaxRequestSize,
        server_max_request_size,
    );
    put_opt_u32(
        &mut buf,
        OptionTag::ServerMaxReplySize,
        server_max_reply_size,
    );
    let msgs: Vec<u16> = MsgType::SUPPORTED.iter().map(|m| *m as u16).collect();
    put_opt_u16_list(&mut buf, OptionTag::SupportedMessages, &msgs);
    let opts: Vec<u16> = OptionTag::SUPPORTED.iter().map(|o| *o as u16).collect();
    put_opt_u16_list(&mut buf, OptionTag::SupportedOptions, &opts);
    let algos: Vec<u8> = supported_decision_algorithms
        .iter()
        .map(|a| a.to_u8())
        .collect();
    put_opt_u8_list(&mut buf, OptionTag::SupportedDecisionAlgorithms, &algos);
    finish(buf)
}

#[cfg(any(test, feature = "test-support"))]
pub fn encode_set_option_reply(
    seq: u32,
    decision_algorithm: DecisionAlgorithm,
    heartbeat_interval: u32,
) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::SetOptionReply);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    put_opt_u8(
        &mut buf,
        OptionTag::DecisionAlgorithm,
        decision_algorithm.to_u8(),
    );
    put_opt_u32(&mut buf, OptionTag::HeartbeatInterval, heartbeat_interval);
    finish(buf)
}

#[cfg(any(test, feature = "test-support"))]
pub fn encode_echo_reply(seq: u32) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::EchoReply);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    finish(buf)
}

#[cfg(any(test, feature = "test-support"))]
pub fn encode_server_error(seq: u32, code: Option<u16>) -> BytesMut {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MsgType::ServerError);
    put_opt_u32(&mut buf, OptionTag::SeqNumber, seq);
    if let Some(code) = code {
        buf.put_u16(OptionTag::ReplyErrorCode as u16);
        buf.put_u16(2);
        buf.put_u16(code);
    }
    finish(buf)
}

/// Peeks the length prefix out of a receive buffer without consuming
/// anything. Returns `None` if fewer than `FRAME_HEADER_LEN` bytes are
/// available yet (a "partial" read, §4.4).
pub fn peek_frame_len(buf: &[u8]) -> Option<u32> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    Some(u32::from_be_bytes(buf[0..4].try_into().unwrap()))
}

/// Decodes one complete frame (header included) into a `DecodedMessage`.
pub fn decode(frame: &[u8]) -> Result<DecodedMessage, DecodeError> {
    if frame.len() < FRAME_HEADER_LEN + 2 {
        return Err(DecodeError::TlvExceedsFrame);
    }
    let body_len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
    if FRAME_HEADER_LEN + body_len != frame.len() {
        return Err(DecodeError::TlvExceedsFrame);
    }
    let msg_type_raw = u16::from_be_bytes(frame[4..6].try_into().unwrap());
    let mut msg = DecodedMessage {
        msg_type: MsgType::from_u16(msg_type_raw),
        ..Default::default()
    };

    let mut cursor = &frame[6..];
    while !cursor.is_empty() {
        if cursor.len() < 4 {
            return Err(DecodeError::BadOptionLength);
        }
        let tag_raw = u16::from_be_bytes(cursor[0..2].try_into().unwrap());
        let len = u16::from_be_bytes(cursor[2..4].try_into().unwrap()) as usize;
        if cursor.len() < 4 + len {
            return Err(DecodeError::BadOptionLength);
        }
        let value = &cursor[4..4 + len];
        let Some(tag) = OptionTag::from_u16(tag_raw) else {
            cursor = &cursor[4 + len..];
            continue;
        };
        decode_option(&mut msg, tag, value)?;
        cursor = &cursor[4 + len..];
    }

    Ok(msg)
}

fn decode_option(msg: &mut DecodedMessage, tag: OptionTag, value: &[u8]) -> Result<(), DecodeError> {
    match tag {
        OptionTag::SeqNumber => {
            msg.seq_number = Some(decode_u32(value)?);
        }
        OptionTag::ClusterName => {
            msg.cluster_name =
                Some(String::from_utf8(value.to_vec()).map_err(|_| DecodeError::BadOptionValue)?);
        }
        OptionTag::TlsSupported => {
            msg.tls_supported = Some(TlsSupported::from_u8(decode_u8(value)?)?);
        }
        OptionTag::TlsClientCertRequired => {
            msg.tls_client_cert_required = Some(decode_u8(value)? != 0);
        }
        OptionTag::NodeId => {
            msg.node_id = Some(decode_u32(value)?);
        }
        OptionTag::SupportedMessages => {
            msg.supported_messages = Some(decode_u16_list(value)?);
        }
        OptionTag::SupportedOptions => {
            msg.supported_options = Some(decode_u16_list(value)?);
        }
        OptionTag::ServerMaxRequestSize => {
            msg.server_max_request_size = Some(decode_u32(value)?);
        }
        OptionTag::ServerMaxReplySize => {
            msg.server_max_reply_size = Some(decode_u32(value)?);
        }
        OptionTag::SupportedDecisionAlgorithms => {
            msg.supported_decision_algorithms =
                Some(value.iter().map(|b| DecisionAlgorithm::from_u8(*b)).collect());
        }
        OptionTag::DecisionAlgorithm => {
            msg.decision_algorithm = Some(DecisionAlgorithm::from_u8(decode_u8(value)?));
        }
        OptionTag::HeartbeatInterval => {
            msg.heartbeat_interval = Some(decode_u32(value)?);
        }
        OptionTag::ReplyErrorCode => {
            msg.reply_error_code = Some(decode_u16(value)?);
        }
    }
    Ok(())
}

fn decode_u8(value: &[u8]) -> Result<u8, DecodeError> {
    value.first().copied().ok_or(DecodeError::BadOptionLength)
}

fn decode_u16(value: &[u8]) -> Result<u16, DecodeError> {
    value
        .try_into()
        .map(u16::from_be_bytes)
        .map_err(|_| DecodeError::BadOptionLength)
}

fn decode_u32(value: &[u8]) -> Result<u32, DecodeError> {
    value
        .try_into()
        .map(u32::from_be_bytes)
        .map_err(|_| DecodeError::BadOptionLength)
}

fn decode_u16_list(value: &[u8]) -> Result<Vec<u16>, DecodeError> {
    if value.len() % 2 != 0 {
        return Err(DecodeError::BadOptionLength);
    }
    Ok(value
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preinit_round_trips_seq_and_cluster_name() {
        let frame = encode_preinit(1, "mycluster");
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.msg_type, Some(MsgType::Preinit));
        assert_eq!(decoded.seq_number, Some(1));
        assert_eq!(decoded.cluster_name.as_deref(), Some("mycluster"));
    }

    #[test]
    fn init_reply_carries_required_options() {
        let frame = encode_init_reply(2, 65536, 65536, &[DecisionAlgorithm::Test]);
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.msg_type, Some(MsgType::InitReply));
        assert_eq!(decoded.server_max_request_size, Some(65536));
        assert_eq!(decoded.server_max_reply_size, Some(65536));
        assert_eq!(
            decoded.supported_decision_algorithms,
            Some(vec![DecisionAlgorithm::Test])
        );
    }

    #[test]
    fn truncated_option_is_bad_option_length() {
        let mut frame = encode_preinit(1, "c").to_vec();
        // Truncate mid-option.
        frame.truncate(frame.len() - 2);
        let body_len = (frame.len() - FRAME_HEADER_LEN) as u32;
        frame[0..4].copy_from_slice(&body_len.to_be_bytes());
        assert!(matches!(decode(&frame), Err(DecodeError::BadOptionLength)));
    }

    #[test]
    fn unknown_option_tag_is_skipped() {
        let mut frame = encode_preinit(1, "c");
        frame.extend_from_slice(&999u16.to_be_bytes());
        frame.extend_from_slice(&3u16.to_be_bytes());
        frame.extend_from_slice(&[1, 2, 3]);
        let body_len = (frame.len() - FRAME_HEADER_LEN) as u32;
        frame[0..4].copy_from_slice(&body_len.to_be_bytes());
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.cluster_name.as_deref(), Some("c"));
    }

    #[test]
    fn peek_frame_len_reports_none_until_header_complete() {
        assert_eq!(peek_frame_len(&[0, 0, 0]), None);
        assert_eq!(peek_frame_len(&[0, 0, 0, 5]), Some(5));
    }
}
