//! TLV option tags and the handful of scalar/list types carried in them.
//! Decoding here is deliberately hand-rolled rather than derive-generated:
//! the option set is small and fixed, and each option has its own validity
//! rule (§4.3's bad-option-length / bad-option-value split), which a
//! generic derive would blur.

use crate::error::DecodeError;

/// TLS support level negotiated in `PREINIT_REPLY` (§4.5's compatibility
/// table operates on this type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSupported {
    Unsupported,
    Supported,
    Required,
}

impl TlsSupported {
    pub fn to_u8(self) -> u8 {
        match self {
            TlsSupported::Unsupported => 0,
            TlsSupported::Supported => 1,
            TlsSupported::Required => 2,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(TlsSupported::Unsupported),
            1 => Ok(TlsSupported::Supported),
            2 => Ok(TlsSupported::Required),
            _ => Err(DecodeError::BadOptionValue),
        }
    }

    /// TLS compatibility table from §4.5. `Err` is the "incompatible" cell;
    /// `Ok(true)` means use TLS, `Ok(false)` means proceed in plaintext.
    pub fn negotiate(server: TlsSupported, client: TlsSupported) -> Result<bool, ()> {
        use TlsSupported::*;
        match (server, client) {
            (Unsupported, Required) => Err(()),
            (Required, Unsupported) => Err(()),
            (Unsupported, _) => Ok(false),
            (Supported, Unsupported) => Ok(false),
            (Supported, Supported) | (Supported, Required) => Ok(true),
            (Required, Supported) | (Required, Required) => Ok(true),
        }
    }
}

/// The decision-algorithm policy negotiated at handshake. `Unknown` carries
/// the raw tag so a server advertising an algorithm we don't recognize
/// still decodes cleanly (it just won't ever match `DecisionAlgorithm::Test`
/// during negotiation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAlgorithm {
    Test,
    Unknown(u8),
}

impl DecisionAlgorithm {
    pub fn to_u8(self) -> u8 {
        match self {
            DecisionAlgorithm::Test => 0,
            DecisionAlgorithm::Unknown(v) => v,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => DecisionAlgorithm::Test,
            other => DecisionAlgorithm::Unknown(other),
        }
    }
}

/// Option tags. Values are part of the wire contract; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OptionTag {
    SeqNumber = 1,
    ClusterName = 2,
    TlsSupported = 3,
    TlsClientCertRequired = 4,
    NodeId = 5,
    SupportedMessages = 6,
    SupportedOptions = 7,
    ServerMaxRequestSize = 8,
    ServerMaxReplySize = 9,
    SupportedDecisionAlgorithms = 10,
    DecisionAlgorithm = 11,
    HeartbeatInterval = 12,
    ReplyErrorCode = 13,
}

impl OptionTag {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => OptionTag::SeqNumber,
            2 => OptionTag::ClusterName,
            3 => OptionTag::TlsSupported,
            4 => OptionTag::TlsClientCertRequired,
            5 => OptionTag::NodeId,
            6 => OptionTag::SupportedMessages,
            7 => OptionTag::SupportedOptions,
            8 => OptionTag::ServerMaxRequestSize,
            9 => OptionTag::ServerMaxReplySize,
            10 => OptionTag::SupportedDecisionAlgorithms,
            11 => OptionTag::DecisionAlgorithm,
            12 => OptionTag::HeartbeatInterval,
            13 => OptionTag::ReplyErrorCode,
            _ => return None,
        })
    }

    /// All option tags this client understands, advertised in `INIT`.
    pub const SUPPORTED: &'static [OptionTag] = &[
        OptionTag::SeqNumber,
        OptionTag::ClusterName,
        OptionTag::TlsSupported,
        OptionTag::TlsClientCertRequired,
        OptionTag::NodeId,
        OptionTag::SupportedMessages,
        OptionTag::SupportedOptions,
        OptionTag::ServerMaxRequestSize,
        OptionTag::ServerMaxReplySize,
        OptionTag::SupportedDecisionAlgorithms,
        OptionTag::DecisionAlgorithm,
        OptionTag::HeartbeatInterval,
        OptionTag::ReplyErrorCode,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use TlsSupported::*;

    /// Every (server, client) pair against §4.5's compatibility table.
    #[test]
    fn negotiate_covers_full_table() {
        let cases = [
            (Unsupported, Unsupported, Ok(false)),
            (Unsupported, Supported, Ok(false)),
            (Unsupported, Required, Err(())),
            (Supported, Unsupported, Ok(false)),
            (Supported, Supported, Ok(true)),
            (Supported, Required, Ok(true)),
            (Required, Unsupported, Err(())),
            (Required, Supported, Ok(true)),
            (Required, Required, Ok(true)),
        ];
        for (server, client, want) in cases {
            assert_eq!(
                TlsSupported::negotiate(server, client),
                want,
                "server={server:?} client={client:?}"
            );
        }
    }
}
