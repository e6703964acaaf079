use hmac::digest::consts::U64;
use hmac::{Hmac, Mac, SimpleHmac};
use sha1::Sha1;
use skein::Skein512;

use super::PacketMac;
use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;
type HmacSkein512 = SimpleHmac<Skein512<U64>>;

/// HMAC-SHA1, the predefined SRTP auth transform (RFC 3711 section 4.2).
pub(crate) struct HmacSha1Auth {
    mac: HmacSha1,
}

impl HmacSha1Auth {
    pub fn new(session_auth_key: &[u8]) -> Result<Self> {
        let mac = HmacSha1::new_from_slice(session_auth_key)
            .map_err(|_| Error::SessionKeyLength(session_auth_key.len()))?;
        Ok(HmacSha1Auth { mac })
    }
}

impl PacketMac for HmacSha1Auth {
    fn tag_len(&self) -> usize {
        20
    }

    fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    fn finalize_into(&mut self, out: &mut [u8]) {
        let tag = self.mac.finalize_reset().into_bytes();
        let n = out.len().min(tag.len());
        out[..n].copy_from_slice(&tag[..n]);
    }
}

/// Keyed Skein-512 as the alternate auth transform. The Skein hash is keyed
/// through the generic HMAC construction here.
pub(crate) struct SkeinAuth {
    mac: HmacSkein512,
}

impl SkeinAuth {
    pub fn new(session_auth_key: &[u8]) -> Result<Self> {
        let mac = HmacSkein512::new_from_slice(session_auth_key)
            .map_err(|_| Error::SessionKeyLength(session_auth_key.len()))?;
        Ok(SkeinAuth { mac })
    }
}

impl PacketMac for SkeinAuth {
    fn tag_len(&self) -> usize {
        64
    }

    fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    fn finalize_into(&mut self, out: &mut [u8]) {
        let tag = self.mac.finalize_reset().into_bytes();
        let n = out.len().min(tag.len());
        out[..n].copy_from_slice(&tag[..n]);
    }
}
