use crate::error::{Error, Result};
use crate::policy::Policy;

/// ProtectionProfile specifies cipher and auth tag details negotiated through
/// the DTLS-SRTP extension (RFC 5764), similar to a TLS cipher suite.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionProfile {
    #[default]
    Aes128CmHmacSha1_80,
    Aes128CmHmacSha1_32,
}

impl ProtectionProfile {
    /// Looks up a profile by its IANA registry value.
    pub fn from_id(id: u16) -> Result<Self> {
        match id {
            0x0001 => Ok(ProtectionProfile::Aes128CmHmacSha1_80),
            0x0002 => Ok(ProtectionProfile::Aes128CmHmacSha1_32),
            _ => Err(Error::UnknownProfile(id)),
        }
    }

    pub fn id(&self) -> u16 {
        match *self {
            ProtectionProfile::Aes128CmHmacSha1_80 => 0x0001,
            ProtectionProfile::Aes128CmHmacSha1_32 => 0x0002,
        }
    }

    pub fn key_len(&self) -> usize {
        16
    }

    pub fn salt_len(&self) -> usize {
        14
    }

    pub fn auth_key_len(&self) -> usize {
        20
    }

    pub fn rtp_auth_tag_len(&self) -> usize {
        match *self {
            ProtectionProfile::Aes128CmHmacSha1_80 => 10,
            ProtectionProfile::Aes128CmHmacSha1_32 => 4,
        }
    }

    /// RFC 5764: the SRTCP tag stays at 80 bits for both profiles.
    pub fn rtcp_auth_tag_len(&self) -> usize {
        10
    }

    /// Total keying material the DTLS exporter must produce for one session:
    /// client and server write keys followed by client and server salts.
    pub fn keying_material_len(&self) -> usize {
        2 * (self.key_len() + self.salt_len())
    }

    pub fn policy(&self) -> Policy {
        match *self {
            ProtectionProfile::Aes128CmHmacSha1_80 => Policy::aes_cm_hmac_sha1_80(),
            ProtectionProfile::Aes128CmHmacSha1_32 => Policy::aes_cm_hmac_sha1_32(),
        }
    }
}
