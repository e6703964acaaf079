use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use rtcp::header::{HEADER_LENGTH, SSRC_LENGTH};
use util::marshal::*;

use super::{BaseContext, SessionEngines};
use crate::crypto::BLOCK_LEN;
use crate::error::{Error, Result};
use crate::key_derivation::RTCP_LABELS;
use crate::policy::{AuthKind, EncryptionKind, Policy};
use crate::replay::{ReplayCheck, ReplayWindow};

pub(crate) const SRTCP_INDEX_SIZE: usize = 4;
const MAX_SRTCP_INDEX: u32 = 0x7FFF_FFFF;
const E_FLAG: u32 = 1 << 31;

/// SRTCP state machine for one SSRC and direction. Unlike RTP there is no
/// index guessing: the 31-bit index travels in the packet, after the
/// encrypted body and before the auth tag, together with the E flag marking
/// whether the body is encrypted. The sender increments the index for every
/// packet and must re-key instead of wrapping it.
pub struct RtcpContext {
    pub(crate) base: BaseContext,
    pub(crate) sender: bool,
    /// Sender: index of the last packet sent. Receiver: highest index
    /// accepted so far, anchoring the replay window.
    pub(crate) index: u32,
    pub(crate) window: ReplayWindow,
    pub(crate) key_derivation_rate: u64,
    pub(crate) replay_protection: bool,
}

impl RtcpContext {
    pub fn new(
        sender: bool,
        ssrc: u32,
        key_derivation_rate: u64,
        master_key: &[u8],
        master_salt: &[u8],
        policy: Policy,
        replay_protection: bool,
    ) -> Result<Self> {
        let base = BaseContext::new(ssrc, master_key, master_salt, policy)?;
        log::debug!("creating srtcp context ssrc={ssrc} sender={sender} kdr={key_derivation_rate}");
        Ok(RtcpContext {
            base,
            sender,
            index: 0,
            window: ReplayWindow::default(),
            key_derivation_rate,
            replay_protection,
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.base.ssrc
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_sender(&self) -> bool {
        self.sender
    }

    /// Protects an outgoing RTCP compound packet: encrypts everything after
    /// the first eight bytes, appends the E flag and index word, then the
    /// auth tag over all of it.
    pub fn transform(&mut self, packet: &[u8]) -> Result<Bytes> {
        if packet.len() < HEADER_LENGTH + SSRC_LENGTH {
            return Err(Error::PacketTooShort(
                packet.len(),
                HEADER_LENGTH + SSRC_LENGTH,
            ));
        }
        let mut buf = packet;
        rtcp::header::Header::unmarshal(&mut buf)?;

        if self.index >= MAX_SRTCP_INDEX {
            // The E flag occupies the sign bit, so the index cannot wrap;
            // the stream has to be torn down and re-keyed.
            return Err(Error::IndexOverflow);
        }
        self.index += 1;
        let index = self.index;
        let mut staged = self.stage_session_keys(index)?;

        let ssrc = BigEndian::read_u32(&packet[HEADER_LENGTH..HEADER_LENGTH + SSRC_LENGTH]);
        let encrypted = self.base.policy.encryption != EncryptionKind::Null;
        let tag_len = self.auth_tag_len();

        let mut out = BytesMut::with_capacity(packet.len() + SRTCP_INDEX_SIZE + tag_len);
        out.extend_from_slice(packet);
        {
            let encryption = self.base.policy.encryption;
            let auth = self.base.policy.auth;
            let engines = match staged.as_mut() {
                Some(engines) => engines,
                None => self.base.engines()?,
            };
            if encrypted {
                process_payload(
                    engines,
                    encryption,
                    ssrc,
                    index | E_FLAG,
                    packet,
                    &mut out[HEADER_LENGTH + SSRC_LENGTH..],
                )?;
            }

            let e_flag = if encrypted { E_FLAG } else { 0 };
            out.put_u32(index | e_flag);

            if auth != AuthKind::Null {
                engines.append_auth_tag(&mut out, None, tag_len)?;
            }
        }

        if let Some(engines) = staged {
            self.base
                .install_session_engines(engines, self.key_derivation_rate);
        }
        Ok(out.freeze())
    }

    /// Reverses an incoming SRTCP packet. The explicit index drives the
    /// replay window directly; authentication covers everything up to and
    /// including the index word; decryption only runs when the E flag is
    /// set. State is committed only after all checks pass — a rejected
    /// packet landing on a derivation epoch boundary has its candidate keys
    /// built off to the side and dropped with it.
    pub fn reverse_transform(&mut self, packet: &[u8]) -> Result<Bytes> {
        let tag_len = self.auth_tag_len();
        let min_len = HEADER_LENGTH + SSRC_LENGTH + SRTCP_INDEX_SIZE + tag_len;
        if packet.len() < min_len {
            return Err(Error::PacketTooShort(packet.len(), min_len));
        }
        let mut buf = packet;
        rtcp::header::Header::unmarshal(&mut buf)?;

        let tail_offset = packet.len() - (SRTCP_INDEX_SIZE + tag_len);
        let index_word = BigEndian::read_u32(&packet[tail_offset..tail_offset + SRTCP_INDEX_SIZE]);
        let encrypted = index_word & E_FLAG != 0;
        let index = index_word & MAX_SRTCP_INDEX;

        self.check_replay(index)?;
        let mut staged = self.stage_session_keys(index)?;

        if self.base.policy.auth != AuthKind::Null {
            let (authed, tag) = packet.split_at(packet.len() - tag_len);
            let engines = match staged.as_mut() {
                Some(engines) => engines,
                None => self.base.engines()?,
            };
            if !engines.verify_auth_tag(authed, None, tag)? {
                log::debug!("srtcp auth failed for ssrc={} index={index}", self.base.ssrc);
                return Err(Error::AuthFailed);
            }
        }

        let ssrc = BigEndian::read_u32(&packet[HEADER_LENGTH..HEADER_LENGTH + SSRC_LENGTH]);
        let mut out = BytesMut::with_capacity(tail_offset);
        out.extend_from_slice(&packet[..tail_offset]);
        if encrypted {
            let encryption = self.base.policy.encryption;
            let engines = match staged.as_mut() {
                Some(engines) => engines,
                None => self.base.engines()?,
            };
            process_payload(
                engines,
                encryption,
                ssrc,
                index_word,
                packet,
                &mut out[HEADER_LENGTH + SSRC_LENGTH..],
            )?;
        }

        if let Some(engines) = staged {
            self.base
                .install_session_engines(engines, self.key_derivation_rate);
        }
        self.update(index);
        Ok(out.freeze())
    }

    fn auth_tag_len(&self) -> usize {
        if self.base.policy.auth != AuthKind::Null {
            self.base.policy.rtcp_auth_tag_len
        } else {
            0
        }
    }

    fn check_replay(&self, index: u32) -> Result<()> {
        if !self.replay_protection {
            return Ok(());
        }
        let delta = i64::from(index) - i64::from(self.index);
        match self.window.check(delta) {
            ReplayCheck::Ahead | ReplayCheck::InWindow => Ok(()),
            ReplayCheck::Duplicate => Err(Error::Replayed(self.base.ssrc, i64::from(index))),
            ReplayCheck::TooOld => Err(Error::TooOld(self.base.ssrc, i64::from(index))),
        }
    }

    /// Builds candidate engines for a first or per-epoch derivation without
    /// installing them; the caller commits only once the packet has passed
    /// every check.
    fn stage_session_keys(&self, index: u32) -> Result<Option<SessionEngines>> {
        let kdr = self.key_derivation_rate;
        if !self.base.derived() || (kdr != 0 && u64::from(index) % kdr == 0) {
            Ok(Some(self.base.build_session_engines(
                RTCP_LABELS,
                u64::from(index),
                kdr,
            )?))
        } else {
            Ok(None)
        }
    }

    fn update(&mut self, index: u32) {
        let delta = i64::from(index) - i64::from(self.index);
        self.window.accept(delta);
        if index > self.index {
            self.index = index;
        }
    }
}

/// Runs the payload transform over the RTCP body (everything after the
/// header and sender SSRC). `index_word` carries the E flag so F8 IVs see
/// the same word that goes on the wire.
fn process_payload(
    engines: &mut SessionEngines,
    encryption: EncryptionKind,
    ssrc: u32,
    index_word: u32,
    raw: &[u8],
    payload: &mut [u8],
) -> Result<()> {
    match encryption {
        EncryptionKind::Null => Ok(()),
        EncryptionKind::AesCm | EncryptionKind::TwofishCm => {
            let index = u64::from(index_word & MAX_SRTCP_INDEX);
            let iv = engines.counter_iv(ssrc, index);
            engines.cipher()?.process(payload, &iv)
        }
        EncryptionKind::AesF8 | EncryptionKind::TwofishF8 => {
            // RFC 3711 4.1.2.3: four zero bytes, the E+index word, then the
            // first eight bytes of the RTCP packet.
            let mut iv = [0u8; BLOCK_LEN];
            BigEndian::write_u32(&mut iv[4..8], index_word);
            iv[8..].copy_from_slice(&raw[..HEADER_LENGTH + SSRC_LENGTH]);
            engines.iv_store = iv;
            engines.cipher()?.process(payload, &iv)
        }
    }
}
