//! Wire level identifiers shared by the record layer and the messages.

use std::fmt;

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

// ============================================================================
// Content Type
// ============================================================================

/// Record content types.
///
/// Identical for TLS and DTLS. Unassigned values are kept as `Unknown` so
/// that broken peers can be recorded rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Change Cipher Spec, the cipher-change signal.
    ChangeCipherSpec,
    /// Alert message.
    Alert,
    /// Handshake message.
    Handshake,
    /// Application data.
    ApplicationData,
    /// Heartbeat (RFC 6520).
    Heartbeat,
    /// Unknown content type.
    Unknown(u8),
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ContentType {
    /// Convert a u8 value to a `ContentType`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            24 => ContentType::Heartbeat,
            _ => ContentType::Unknown(value),
        }
    }

    /// Convert this `ContentType` to its u8 value.
    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Heartbeat => 24,
            ContentType::Unknown(value) => *value,
        }
    }

    /// Parse a `ContentType` from wire format.
    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Unknown(v) => write!(f, "Unknown({})", v),
            _ => write!(f, "{:?}", self),
        }
    }
}

// ============================================================================
// Protocol Version
// ============================================================================

/// Protocol version as carried in record headers and hellos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ProtocolVersion {
    SSL3_0,
    TLS1_0,
    TLS1_1,
    TLS1_2,
    TLS1_3,
    DTLS1_0,
    DTLS1_2,
    DTLS1_3,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0300 => ProtocolVersion::SSL3_0,
            0x0301 => ProtocolVersion::TLS1_0,
            0x0302 => ProtocolVersion::TLS1_1,
            0x0303 => ProtocolVersion::TLS1_2,
            0x0304 => ProtocolVersion::TLS1_3,
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            0xFEFC => ProtocolVersion::DTLS1_3,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::SSL3_0 => 0x0300,
            ProtocolVersion::TLS1_0 => 0x0301,
            ProtocolVersion::TLS1_1 => 0x0302,
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::TLS1_3 => 0x0304,
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::DTLS1_3 => 0xFEFC,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    /// Whether records of this version carry epoch and sequence on the wire.
    ///
    /// Unknown versions in the 0xFExx range are treated as DTLS.
    pub fn is_dtls(&self) -> bool {
        self.as_u16() >> 8 == 0xFE
    }

    /// TLS 1.1 and later (and every DTLS) use an explicit per-record IV for
    /// block ciphers.
    pub fn has_explicit_iv(&self) -> bool {
        self.is_dtls() || self.as_u16() >= 0x0302
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
            _ => write!(f, "{:?}", self),
        }
    }
}

// ============================================================================
// Role
// ============================================================================

/// Which side of the connection the context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connects and speaks first (client).
    Initiator,
    /// Accepts and answers (server).
    Responder,
}

// ============================================================================
// Cipher Suites
// ============================================================================

/// Hash used by a suite's PRF and for transcript digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }
}

/// How a suite protects records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    /// AES in GCM mode, with the key length in bytes.
    AesGcm { key_len: usize },
    /// AES in CBC mode with HMAC, with the key length in bytes.
    AesCbc { key_len: usize, mac: HashAlgorithm },
    /// No encryption, HMAC only.
    Null { mac: HashAlgorithm },
}

/// TLS 1.2 / DTLS 1.2 cipher suites with record protection this crate
/// can drive. Everything else is carried as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    RSA_NULL_SHA,
    RSA_NULL_SHA256,
    RSA_AES128_CBC_SHA,
    RSA_AES256_CBC_SHA,
    ECDHE_ECDSA_AES128_CBC_SHA,
    ECDHE_ECDSA_AES256_CBC_SHA,
    ECDHE_RSA_AES128_CBC_SHA,
    ECDHE_RSA_AES256_CBC_SHA,
    RSA_AES128_CBC_SHA256,
    RSA_AES256_CBC_SHA256,
    RSA_AES128_GCM_SHA256,
    RSA_AES256_GCM_SHA384,
    ECDHE_ECDSA_AES128_GCM_SHA256,
    ECDHE_ECDSA_AES256_GCM_SHA384,
    ECDHE_RSA_AES128_GCM_SHA256,
    ECDHE_RSA_AES256_GCM_SHA384,
    ECDHE_RSA_AES128_CBC_SHA256,
    ECDHE_RSA_AES256_CBC_SHA384,
    Unknown(u16),
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0002 => CipherSuite::RSA_NULL_SHA,
            0x003B => CipherSuite::RSA_NULL_SHA256,
            0x002F => CipherSuite::RSA_AES128_CBC_SHA,
            0x0035 => CipherSuite::RSA_AES256_CBC_SHA,
            0xC009 => CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA,
            0xC00A => CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA,
            0xC013 => CipherSuite::ECDHE_RSA_AES128_CBC_SHA,
            0xC014 => CipherSuite::ECDHE_RSA_AES256_CBC_SHA,
            0x003C => CipherSuite::RSA_AES128_CBC_SHA256,
            0x003D => CipherSuite::RSA_AES256_CBC_SHA256,
            0x009C => CipherSuite::RSA_AES128_GCM_SHA256,
            0x009D => CipherSuite::RSA_AES256_GCM_SHA384,
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            0xC02F => CipherSuite::ECDHE_RSA_AES128_GCM_SHA256,
            0xC030 => CipherSuite::ECDHE_RSA_AES256_GCM_SHA384,
            0xC027 => CipherSuite::ECDHE_RSA_AES128_CBC_SHA256,
            0xC028 => CipherSuite::ECDHE_RSA_AES256_CBC_SHA384,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::RSA_NULL_SHA => 0x0002,
            CipherSuite::RSA_NULL_SHA256 => 0x003B,
            CipherSuite::RSA_AES128_CBC_SHA => 0x002F,
            CipherSuite::RSA_AES256_CBC_SHA => 0x0035,
            CipherSuite::ECDHE_ECDSA_AES128_CBC_SHA => 0xC009,
            CipherSuite::ECDHE_ECDSA_AES256_CBC_SHA => 0xC00A,
            CipherSuite::ECDHE_RSA_AES128_CBC_SHA => 0xC013,
            CipherSuite::ECDHE_RSA_AES256_CBC_SHA => 0xC014,
            CipherSuite::RSA_AES128_CBC_SHA256 => 0x003C,
            CipherSuite::RSA_AES256_CBC_SHA256 => 0x003D,
            CipherSuite::RSA_AES128_GCM_SHA256 => 0x009C,
            CipherSuite::RSA_AES256_GCM_SHA384 => 0x009D,
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::ECDHE_RSA_AES128_GCM_SHA256 => 0xC02F,
            CipherSuite::ECDHE_RSA_AES256_GCM_SHA384 => 0xC030,
            CipherSuite::ECDHE_RSA_AES128_CBC_SHA256 => 0xC027,
            CipherSuite::ECDHE_RSA_AES256_CBC_SHA384 => 0xC028,
            CipherSuite::Unknown(value) => *value,
        }
    }

    /// The record protection of this suite, `None` for unknown suites.
    pub fn bulk_cipher(&self) -> Option<BulkCipher> {
        use CipherSuite::*;
        let bulk = match self {
            RSA_AES128_GCM_SHA256 | ECDHE_ECDSA_AES128_GCM_SHA256 | ECDHE_RSA_AES128_GCM_SHA256 => {
                BulkCipher::AesGcm { key_len: 16 }
            }
            RSA_AES256_GCM_SHA384 | ECDHE_ECDSA_AES256_GCM_SHA384 | ECDHE_RSA_AES256_GCM_SHA384 => {
                BulkCipher::AesGcm { key_len: 32 }
            }
            RSA_AES128_CBC_SHA256 | ECDHE_RSA_AES128_CBC_SHA256 => BulkCipher::AesCbc {
                key_len: 16,
                mac: HashAlgorithm::Sha256,
            },
            RSA_AES256_CBC_SHA256 => BulkCipher::AesCbc {
                key_len: 32,
                mac: HashAlgorithm::Sha256,
            },
            ECDHE_RSA_AES256_CBC_SHA384 => BulkCipher::AesCbc {
                key_len: 32,
                mac: HashAlgorithm::Sha384,
            },
            RSA_AES128_CBC_SHA | ECDHE_ECDSA_AES128_CBC_SHA | ECDHE_RSA_AES128_CBC_SHA => {
                BulkCipher::AesCbc {
                    key_len: 16,
                    mac: HashAlgorithm::Sha1,
                }
            }
            RSA_AES256_CBC_SHA | ECDHE_ECDSA_AES256_CBC_SHA | ECDHE_RSA_AES256_CBC_SHA => {
                BulkCipher::AesCbc {
                    key_len: 32,
                    mac: HashAlgorithm::Sha1,
                }
            }
            RSA_NULL_SHA => BulkCipher::Null {
                mac: HashAlgorithm::Sha1,
            },
            RSA_NULL_SHA256 => BulkCipher::Null {
                mac: HashAlgorithm::Sha256,
            },
            Unknown(_) => return None,
        };
        Some(bulk)
    }

    /// PRF / transcript hash of the suite. Unknown suites default to SHA-256,
    /// as do the SHA-1 MAC suites under the TLS 1.2 PRF.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        use CipherSuite::*;
        match self {
            RSA_AES256_GCM_SHA384
            | ECDHE_ECDSA_AES256_GCM_SHA384
            | ECDHE_RSA_AES256_GCM_SHA384
            | ECDHE_RSA_AES256_CBC_SHA384 => HashAlgorithm::Sha384,
            _ => HashAlgorithm::Sha256,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, Self::from_u16(value)))
    }
}
