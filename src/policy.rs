use crate::error::{Error, Result};

/// Transform applied to the RTP payload (and to the RTCP body after the
/// first eight bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionKind {
    Null,
    AesCm,
    AesF8,
    TwofishCm,
    TwofishF8,
}

/// Keyed MAC protecting header and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Null,
    HmacSha1,
    Skein,
}

/// Policy describes the negotiated cipher suite of a stream: which
/// encryption and authentication transforms to run and the key and tag
/// lengths they use. A policy is immutable and freely copyable; every
/// context created from it shares the same parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub encryption: EncryptionKind,
    pub auth: AuthKind,
    /// Length of the master key and of the derived session encryption key.
    pub enc_key_len: usize,
    pub auth_key_len: usize,
    pub salt_key_len: usize,
    /// RTP auth tag length. RTCP may differ (RFC 5764 keeps the RTCP tag at
    /// 80 bits even for the 32-bit RTP profile).
    pub auth_tag_len: usize,
    pub rtcp_auth_tag_len: usize,
}

impl Policy {
    pub fn aes_cm_hmac_sha1_80() -> Self {
        Policy {
            encryption: EncryptionKind::AesCm,
            auth: AuthKind::HmacSha1,
            enc_key_len: 16,
            auth_key_len: 20,
            salt_key_len: 14,
            auth_tag_len: 10,
            rtcp_auth_tag_len: 10,
        }
    }

    pub fn aes_cm_hmac_sha1_32() -> Self {
        Policy {
            auth_tag_len: 4,
            ..Policy::aes_cm_hmac_sha1_80()
        }
    }

    pub fn aes_f8_hmac_sha1_80() -> Self {
        Policy {
            encryption: EncryptionKind::AesF8,
            ..Policy::aes_cm_hmac_sha1_80()
        }
    }

    pub fn twofish_cm_hmac_sha1_80() -> Self {
        Policy {
            encryption: EncryptionKind::TwofishCm,
            ..Policy::aes_cm_hmac_sha1_80()
        }
    }

    pub fn twofish_f8_hmac_sha1_80() -> Self {
        Policy {
            encryption: EncryptionKind::TwofishF8,
            ..Policy::aes_cm_hmac_sha1_80()
        }
    }

    /// Authentication only; payloads pass through in the clear.
    pub fn null_cipher_hmac_sha1_80() -> Self {
        Policy {
            encryption: EncryptionKind::Null,
            ..Policy::aes_cm_hmac_sha1_80()
        }
    }

    /// AES-CM with a Skein MAC and 64-bit tags, the ZRTP flavor.
    pub fn aes_cm_skein() -> Self {
        Policy {
            auth: AuthKind::Skein,
            auth_key_len: 32,
            auth_tag_len: 8,
            rtcp_auth_tag_len: 8,
            ..Policy::aes_cm_hmac_sha1_80()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.auth == AuthKind::Null
            && (self.auth_key_len != 0 || self.auth_tag_len != 0 || self.rtcp_auth_tag_len != 0)
        {
            return Err(Error::InvalidPolicy(
                "null auth requires zero auth key and tag lengths".to_owned(),
            ));
        }
        if self.auth != AuthKind::Null && (self.auth_key_len == 0 || self.auth_tag_len == 0) {
            return Err(Error::InvalidPolicy(
                "auth requires non-zero key and tag lengths".to_owned(),
            ));
        }
        let max_tag = match self.auth {
            AuthKind::Null => 0,
            AuthKind::HmacSha1 => 20,
            AuthKind::Skein => 64,
        };
        if self.auth_tag_len > max_tag || self.rtcp_auth_tag_len > max_tag {
            return Err(Error::InvalidPolicy(format!(
                "auth tag longer than the {max_tag} byte MAC output"
            )));
        }
        // The key derivation IV is built from a 14 byte salt, so every suite
        // carries one even when the payload transform is null.
        if self.salt_key_len != 14 {
            return Err(Error::InvalidPolicy(
                "salt key must be 14 bytes".to_owned(),
            ));
        }
        let enc_key_ok = match self.encryption {
            EncryptionKind::TwofishCm | EncryptionKind::TwofishF8 => {
                matches!(self.enc_key_len, 16 | 24 | 32)
            }
            _ => self.enc_key_len == 16,
        };
        if !enc_key_ok {
            return Err(Error::InvalidPolicy(format!(
                "unsupported encryption key length {}",
                self.enc_key_len
            )));
        }
        Ok(())
    }
}
