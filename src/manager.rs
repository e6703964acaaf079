use std::collections::hash_map::Entry;
use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use rtcp::header::{HEADER_LENGTH, SSRC_LENGTH};
use util::marshal::*;

use crate::config::{Config, MasterKeys};
use crate::context::rtcp::RtcpContext;
use crate::context::rtp::RtpContext;
use crate::error::{Error, Result};
use crate::key_derivation::MASTER_SALT_LEN;
use crate::policy::Policy;

/// SrtpManager owns every cryptographic context of one session and routes
/// packets to them by SSRC: outbound RTP, inbound RTP, outbound RTCP and
/// inbound RTCP each get their own map. Contexts are created lazily the
/// first time an SSRC shows up, outbound streams keyed with the local
/// master material and inbound streams with the remote one.
///
/// The manager hands each packet to exactly one context and a context is
/// only ever entered through `&mut self`, so distinct managers (or managers
/// behind independent locks) may run in parallel while a single stream's
/// state stays serialized.
pub struct SrtpManager {
    policy: Policy,
    key_derivation_rate: u64,
    replay_protection: bool,
    keys: MasterKeys,
    rtp_send_contexts: HashMap<u32, RtpContext>,
    rtp_recv_contexts: HashMap<u32, RtpContext>,
    rtcp_send_contexts: HashMap<u32, RtcpContext>,
    rtcp_recv_contexts: HashMap<u32, RtcpContext>,
}

impl SrtpManager {
    pub fn new(config: Config) -> Result<Self> {
        let policy = config.profile.policy();
        policy.validate()?;

        for key in [&config.keys.local_master_key, &config.keys.remote_master_key] {
            if key.len() != policy.enc_key_len {
                return Err(Error::MasterKeyLength(policy.enc_key_len, key.len()));
            }
        }
        for salt in [
            &config.keys.local_master_salt,
            &config.keys.remote_master_salt,
        ] {
            if salt.len() != MASTER_SALT_LEN {
                return Err(Error::MasterSaltLength(MASTER_SALT_LEN, salt.len()));
            }
        }

        Ok(SrtpManager {
            policy,
            key_derivation_rate: config.key_derivation_rate,
            replay_protection: config.replay_protection,
            keys: config.keys,
            rtp_send_contexts: HashMap::new(),
            rtp_recv_contexts: HashMap::new(),
            rtcp_send_contexts: HashMap::new(),
            rtcp_recv_contexts: HashMap::new(),
        })
    }

    /// Protects an outgoing RTP packet with the sender context of its SSRC.
    pub fn transform_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let mut buf = packet;
        let header = rtp::header::Header::unmarshal(&mut buf)?;
        let ctx = match self.rtp_send_contexts.entry(header.ssrc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(RtpContext::new(
                true,
                header.ssrc,
                0,
                self.key_derivation_rate,
                &self.keys.local_master_key,
                &self.keys.local_master_salt,
                self.policy,
                self.replay_protection,
            )?),
        };
        ctx.transform(packet)
    }

    /// Unprotects an incoming SRTP packet with the receiver context of its
    /// SSRC. Replay, authentication and decryption failures surface as
    /// errors; the caller decides whether to drop the packet or tear the
    /// stream down.
    pub fn reverse_transform_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let mut buf = packet;
        let header = rtp::header::Header::unmarshal(&mut buf)?;
        let ctx = match self.rtp_recv_contexts.entry(header.ssrc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(RtpContext::new(
                false,
                header.ssrc,
                0,
                self.key_derivation_rate,
                &self.keys.remote_master_key,
                &self.keys.remote_master_salt,
                self.policy,
                self.replay_protection,
            )?),
        };
        ctx.reverse_transform(packet)
    }

    pub fn transform_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let ssrc = rtcp_ssrc(packet)?;
        let ctx = match self.rtcp_send_contexts.entry(ssrc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(RtcpContext::new(
                true,
                ssrc,
                self.key_derivation_rate,
                &self.keys.local_master_key,
                &self.keys.local_master_salt,
                self.policy,
                self.replay_protection,
            )?),
        };
        ctx.transform(packet)
    }

    pub fn reverse_transform_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let ssrc = rtcp_ssrc(packet)?;
        let ctx = match self.rtcp_recv_contexts.entry(ssrc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(RtcpContext::new(
                false,
                ssrc,
                self.key_derivation_rate,
                &self.keys.remote_master_key,
                &self.keys.remote_master_salt,
                self.policy,
                self.replay_protection,
            )?),
        };
        ctx.reverse_transform(packet)
    }

    /// Mints a context for a fresh stream of this session, reusing the
    /// negotiated cipher suite and master material but starting from a
    /// caller-chosen rollover counter and key derivation rate. The context
    /// is returned rather than installed so late joiners can be prepared
    /// before their first packet.
    pub fn derive_rtp_context(
        &self,
        sender: bool,
        ssrc: u32,
        initial_roc: u32,
        key_derivation_rate: u64,
    ) -> Result<RtpContext> {
        let (key, salt) = self.direction_keys(sender);
        RtpContext::new(
            sender,
            ssrc,
            initial_roc,
            key_derivation_rate,
            key,
            salt,
            self.policy,
            self.replay_protection,
        )
    }

    pub fn derive_rtcp_context(
        &self,
        sender: bool,
        ssrc: u32,
        key_derivation_rate: u64,
    ) -> Result<RtcpContext> {
        let (key, salt) = self.direction_keys(sender);
        RtcpContext::new(
            sender,
            ssrc,
            key_derivation_rate,
            key,
            salt,
            self.policy,
            self.replay_protection,
        )
    }

    /// Installs a context prepared with [`SrtpManager::derive_rtp_context`].
    pub fn add_rtp_context(&mut self, ctx: RtpContext) {
        let map = if ctx.is_sender() {
            &mut self.rtp_send_contexts
        } else {
            &mut self.rtp_recv_contexts
        };
        map.insert(ctx.ssrc(), ctx);
    }

    pub fn add_rtcp_context(&mut self, ctx: RtcpContext) {
        let map = if ctx.is_sender() {
            &mut self.rtcp_send_contexts
        } else {
            &mut self.rtcp_recv_contexts
        };
        map.insert(ctx.ssrc(), ctx);
    }

    fn direction_keys(&self, sender: bool) -> (&[u8], &[u8]) {
        if sender {
            (&self.keys.local_master_key, &self.keys.local_master_salt)
        } else {
            (&self.keys.remote_master_key, &self.keys.remote_master_salt)
        }
    }
}

fn rtcp_ssrc(packet: &[u8]) -> Result<u32> {
    if packet.len() < HEADER_LENGTH + SSRC_LENGTH {
        return Err(Error::PacketTooShort(
            packet.len(),
            HEADER_LENGTH + SSRC_LENGTH,
        ));
    }
    Ok(BigEndian::read_u32(
        &packet[HEADER_LENGTH..HEADER_LENGTH + SSRC_LENGTH],
    ))
}
