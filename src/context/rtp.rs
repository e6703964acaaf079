use bytes::{Bytes, BytesMut};
use util::marshal::*;

use super::{BaseContext, SessionEngines};
use crate::crypto::BLOCK_LEN;
use crate::error::{Error, Result};
use crate::key_derivation::RTP_LABELS;
use crate::policy::{AuthKind, EncryptionKind, Policy};
use crate::replay::{ReplayCheck, ReplayWindow};

const RTP_FIXED_HEADER_LEN: usize = 12;

/// SRTP state machine for one media stream, RFC 3711 section 3.2. One
/// context protects exactly one SSRC in exactly one direction; a sender
/// context turns RTP into SRTP via [`RtpContext::transform`] and a receiver
/// context reverses it via [`RtpContext::reverse_transform`].
///
/// The packet index is 48 bits: a 32-bit rollover counter maintained here on
/// top of the 16-bit sequence number on the wire.
pub struct RtpContext {
    pub(crate) base: BaseContext,
    pub(crate) sender: bool,
    /// Rollover counter, the high 32 bits of the packet index.
    pub(crate) roc: u32,
    /// Highest authenticated sequence number, `s_l` of RFC 3711 3.3.1.
    pub(crate) s_l: u16,
    pub(crate) seq_initialized: bool,
    /// Rollover counter guessed for the packet currently being processed.
    /// Only committed to `roc` once the packet authenticates.
    pub(crate) guessed_roc: u32,
    pub(crate) window: ReplayWindow,
    pub(crate) key_derivation_rate: u64,
    pub(crate) replay_protection: bool,
}

impl RtpContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender: bool,
        ssrc: u32,
        initial_roc: u32,
        key_derivation_rate: u64,
        master_key: &[u8],
        master_salt: &[u8],
        policy: Policy,
        replay_protection: bool,
    ) -> Result<Self> {
        let base = BaseContext::new(ssrc, master_key, master_salt, policy)?;
        log::debug!(
            "creating srtp context ssrc={ssrc} sender={sender} roc={initial_roc} kdr={key_derivation_rate}"
        );
        Ok(RtpContext {
            base,
            sender,
            roc: initial_roc,
            s_l: 0,
            seq_initialized: false,
            guessed_roc: 0,
            window: ReplayWindow::default(),
            key_derivation_rate,
            replay_protection,
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.base.ssrc
    }

    pub fn roc(&self) -> u32 {
        self.roc
    }

    pub fn is_sender(&self) -> bool {
        self.sender
    }

    /// Protects an outgoing RTP packet: encrypts the payload in a copy and
    /// appends the truncated auth tag computed over header, payload and the
    /// rollover counter.
    pub fn transform(&mut self, packet: &[u8]) -> Result<Bytes> {
        let mut buf = packet;
        let header = rtp::header::Header::unmarshal(&mut buf)?;
        let seq = header.sequence_number;

        if !self.seq_initialized {
            self.s_l = seq;
            self.seq_initialized = true;
        }

        let guessed_index = self.guess_index(seq);
        if self.roc == u32::MAX && self.guessed_roc == 0 {
            // 2^48 packets sent on one key: the index space is exhausted.
            return Err(Error::IndexOverflow);
        }

        // Not replay protection on the way out, but a consistency check on
        // the sender's own sequence numbering.
        if let Err(e) = self.check_replay(guessed_index) {
            log::error!(
                "discarding outgoing rtp packet ssrc={} seq={seq} roc={} s_l={}: {e}",
                self.base.ssrc,
                self.roc,
                self.s_l
            );
            return Err(e);
        }

        let mut staged = self.stage_session_keys(guessed_index)?;

        let payload_offset = header.marshal_size();
        let tag_len = self.auth_tag_len();
        let mut out = BytesMut::with_capacity(packet.len() + tag_len);
        out.extend_from_slice(packet);
        {
            let ssrc = self.base.ssrc;
            let encryption = self.base.policy.encryption;
            let auth = self.base.policy.auth;
            let guessed_roc = self.guessed_roc;
            let engines = match staged.as_mut() {
                Some(engines) => engines,
                None => self.base.engines()?,
            };
            process_payload(
                engines,
                encryption,
                ssrc,
                guessed_roc,
                packet,
                seq,
                &mut out[payload_offset..],
            )?;
            if auth != AuthKind::Null {
                engines.append_auth_tag(&mut out, Some(guessed_roc), tag_len)?;
            }
        }

        if let Some(engines) = staged {
            self.base
                .install_session_engines(engines, self.key_derivation_rate);
        }
        self.update(seq, guessed_index);
        Ok(out.freeze())
    }

    /// Reverses an incoming SRTP packet: replay check, constant-time tag
    /// verification, decryption, then state commit. On any rejection the
    /// context state is left exactly as it was — a re-derivation epoch a
    /// rejected packet lands on is built off to the side and dropped with
    /// it — except that a first packet failing authentication also rolls
    /// the sequence initialization back so the next packet starts clean.
    pub fn reverse_transform(&mut self, packet: &[u8]) -> Result<Bytes> {
        let mut buf = packet;
        let header = rtp::header::Header::unmarshal(&mut buf)?;
        let seq = header.sequence_number;
        let payload_offset = header.marshal_size();
        let tag_len = self.auth_tag_len();
        if packet.len() < payload_offset + tag_len {
            return Err(Error::PacketTooShort(packet.len(), payload_offset + tag_len));
        }

        let seq_was_just_set = !self.seq_initialized;
        if seq_was_just_set {
            self.s_l = seq;
            self.seq_initialized = true;
        }

        let guessed_index = self.guess_index(seq);
        self.check_replay(guessed_index)?;
        let mut staged = self.stage_session_keys(guessed_index)?;

        if self.base.policy.auth != AuthKind::Null {
            let (authed, tag) = packet.split_at(packet.len() - tag_len);
            let roc = self.guessed_roc;
            let engines = match staged.as_mut() {
                Some(engines) => engines,
                None => self.base.engines()?,
            };
            if !engines.verify_auth_tag(authed, Some(roc), tag)? {
                if seq_was_just_set {
                    // The initial s_l came from a packet we cannot trust.
                    self.seq_initialized = false;
                    self.s_l = 0;
                }
                log::debug!("srtp auth failed for ssrc={} seq={seq}", self.base.ssrc);
                return Err(Error::AuthFailed);
            }
        }

        let mut out = BytesMut::with_capacity(packet.len() - tag_len);
        out.extend_from_slice(&packet[..packet.len() - tag_len]);
        {
            let ssrc = self.base.ssrc;
            let encryption = self.base.policy.encryption;
            let guessed_roc = self.guessed_roc;
            let engines = match staged.as_mut() {
                Some(engines) => engines,
                None => self.base.engines()?,
            };
            process_payload(
                engines,
                encryption,
                ssrc,
                guessed_roc,
                packet,
                seq,
                &mut out[payload_offset..],
            )?;
        }

        if let Some(engines) = staged {
            self.base
                .install_session_engines(engines, self.key_derivation_rate);
        }
        self.update(seq, guessed_index);
        Ok(out.freeze())
    }

    fn auth_tag_len(&self) -> usize {
        if self.base.policy.auth != AuthKind::Null {
            self.base.policy.auth_tag_len
        } else {
            0
        }
    }

    /// Estimates the 48-bit index of a packet from its sequence number,
    /// RFC 3711 section 3.3.1, leaving the guessed rollover counter in
    /// `self.guessed_roc`. A guess of `roc - 1` on a stream that never
    /// wrapped sign-extends to a negative index, which the replay window
    /// then rejects as too old.
    pub(crate) fn guess_index(&mut self, seq: u16) -> i64 {
        if self.s_l < 32_768 {
            if i32::from(seq) - i32::from(self.s_l) > 32_768 {
                self.guessed_roc = self.roc.wrapping_sub(1);
            } else {
                self.guessed_roc = self.roc;
            }
        } else if i32::from(self.s_l) - 32_768 > i32::from(seq) {
            self.guessed_roc = self.roc.wrapping_add(1);
        } else {
            self.guessed_roc = self.roc;
        }
        (i64::from(self.guessed_roc as i32) << 16) | i64::from(seq)
    }

    pub(crate) fn local_index(&self) -> i64 {
        (i64::from(self.roc as i32) << 16) | i64::from(self.s_l)
    }

    fn check_replay(&self, guessed_index: i64) -> Result<()> {
        if !self.replay_protection {
            return Ok(());
        }
        let delta = guessed_index - self.local_index();
        match self.window.check(delta) {
            ReplayCheck::Ahead | ReplayCheck::InWindow => Ok(()),
            ReplayCheck::Duplicate => Err(Error::Replayed(self.base.ssrc, guessed_index)),
            ReplayCheck::TooOld => Err(Error::TooOld(self.base.ssrc, guessed_index)),
        }
    }

    /// Builds candidate engines when this packet requires a first or
    /// per-epoch derivation. Nothing is installed here: the caller commits
    /// the result only after every check on the packet has passed, so a
    /// forged packet landing on an epoch boundary cannot disturb the keys
    /// in use.
    fn stage_session_keys(&self, guessed_index: i64) -> Result<Option<SessionEngines>> {
        let kdr = self.key_derivation_rate;
        let index = guessed_index.max(0) as u64;
        if !self.base.derived() || (kdr != 0 && index % kdr == 0) {
            Ok(Some(self.base.build_session_engines(RTP_LABELS, index, kdr)?))
        } else {
            Ok(None)
        }
    }

    /// Commits an accepted packet: slides the replay window and advances
    /// `s_l` and the rollover counter, RFC 3711 3.3.1. A `roc - 1` guess is
    /// a late packet from before the last wrap and changes nothing.
    fn update(&mut self, seq: u16, guessed_index: i64) {
        let delta = guessed_index - self.local_index();
        self.window.accept(delta);

        if self.guessed_roc == self.roc {
            if seq > self.s_l {
                self.s_l = seq;
            }
        } else if self.guessed_roc == self.roc.wrapping_add(1) {
            self.s_l = seq;
            self.roc = self.guessed_roc;
        }
    }
}

/// Runs the policy's payload transform in place over `payload`, which
/// aliases the bytes after the RTP header in the output buffer.
fn process_payload(
    engines: &mut SessionEngines,
    encryption: EncryptionKind,
    ssrc: u32,
    guessed_roc: u32,
    raw: &[u8],
    seq: u16,
    payload: &mut [u8],
) -> Result<()> {
    match encryption {
        EncryptionKind::Null => Ok(()),
        EncryptionKind::AesCm | EncryptionKind::TwofishCm => {
            let index = (u64::from(guessed_roc) << 16) | u64::from(seq);
            let iv = engines.counter_iv(ssrc, index);
            engines.cipher()?.process(payload, &iv)
        }
        EncryptionKind::AesF8 | EncryptionKind::TwofishF8 => {
            // RFC 3711 4.1.2.2: the IV is the fixed RTP header with its
            // first byte zeroed, followed by the rollover counter.
            let mut iv = [0u8; BLOCK_LEN];
            iv[..RTP_FIXED_HEADER_LEN].copy_from_slice(&raw[..RTP_FIXED_HEADER_LEN]);
            iv[0] = 0;
            iv[RTP_FIXED_HEADER_LEN..].copy_from_slice(&guessed_roc.to_be_bytes());
            engines.iv_store = iv;
            engines.cipher()?.process(payload, &iv)
        }
    }
}
