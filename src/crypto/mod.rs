mod counter_mode;
mod f8_mode;
mod mac;

pub(crate) use counter_mode::{AesCounterMode, TwofishCounterMode};
pub(crate) use f8_mode::F8Mode;
pub(crate) use mac::{HmacSha1Auth, SkeinAuth};

use crate::error::Result;

/// Cipher block length shared by every supported suite.
pub(crate) const BLOCK_LEN: usize = 16;

/// Keystream cipher applied to a packet payload in place. One engine is
/// keyed once per key derivation and then driven with a fresh IV per packet.
pub(crate) trait StreamCipherEngine: Send {
    fn process(&mut self, buf: &mut [u8], iv: &[u8; BLOCK_LEN]) -> Result<()>;
}

/// Keyed MAC over the authenticated portion of a packet. `finalize_into`
/// resets the engine for the next packet and truncates to the output slice.
pub(crate) trait PacketMac: Send {
    /// Untruncated output length.
    fn tag_len(&self) -> usize;
    fn update(&mut self, data: &[u8]);
    fn finalize_into(&mut self, out: &mut [u8]);
}
