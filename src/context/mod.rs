#[cfg(test)]
mod rtp_test;

pub mod rtcp;
pub mod rtp;

use aes::Aes128;
use bytes::BytesMut;
use subtle::ConstantTimeEq;
use twofish::Twofish;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{
    AesCounterMode, F8Mode, HmacSha1Auth, PacketMac, SkeinAuth, StreamCipherEngine,
    TwofishCounterMode, BLOCK_LEN,
};
use crate::error::{Error, Result};
use crate::key_derivation::{self, KeyLabels, MASTER_SALT_LEN};
use crate::policy::{AuthKind, EncryptionKind, Policy};

/// One derivation epoch's worth of session state: the keyed cipher and MAC
/// engines, the session salt feeding per-packet counter IVs, and the scratch
/// buffers reused across packets. Built away from the installed state so a
/// packet that is later rejected can be processed against candidate keys and
/// dropped without touching the context.
pub(crate) struct SessionEngines {
    cipher: Option<Box<dyn StreamCipherEngine>>,
    mac: Option<Box<dyn PacketMac>>,
    salt_key: Zeroizing<Vec<u8>>,
    pub(crate) iv_store: [u8; BLOCK_LEN],
    tag_store: Zeroizing<Vec<u8>>,
}

impl SessionEngines {
    pub fn cipher(&mut self) -> Result<&mut dyn StreamCipherEngine> {
        match self.cipher.as_mut() {
            Some(cipher) => Ok(cipher.as_mut()),
            None => Err(Error::KeyNotDerived),
        }
    }

    /// Builds the per-packet counter IV in the scratch buffer and returns a
    /// copy of it.
    pub fn counter_iv(&mut self, ssrc: u32, index: u64) -> [u8; BLOCK_LEN] {
        self.iv_store = key_derivation::generate_counter(index, ssrc, &self.salt_key);
        self.iv_store
    }

    /// Computes the auth tag over `packet` (plus the rollover counter for
    /// RTP) and appends the leftmost `tag_len` bytes.
    pub fn append_auth_tag(
        &mut self,
        packet: &mut BytesMut,
        roc: Option<u32>,
        tag_len: usize,
    ) -> Result<()> {
        let mac = self.mac.as_mut().ok_or(Error::KeyNotDerived)?;
        mac.update(packet);
        if let Some(roc) = roc {
            mac.update(&roc.to_be_bytes());
        }
        mac.finalize_into(&mut self.tag_store);
        packet.extend_from_slice(&self.tag_store[..tag_len]);
        self.tag_store.as_mut_slice().zeroize();
        Ok(())
    }

    /// Recomputes the tag over `authed` and compares it against the received
    /// one in constant time.
    pub fn verify_auth_tag(
        &mut self,
        authed: &[u8],
        roc: Option<u32>,
        received_tag: &[u8],
    ) -> Result<bool> {
        let mac = self.mac.as_mut().ok_or(Error::KeyNotDerived)?;
        mac.update(authed);
        if let Some(roc) = roc {
            mac.update(&roc.to_be_bytes());
        }
        mac.finalize_into(&mut self.tag_store);
        let ok = received_tag
            .ct_eq(&self.tag_store[..received_tag.len()])
            .unwrap_u8()
            == 1;
        self.tag_store.as_mut_slice().zeroize();
        Ok(ok)
    }
}

/// Long-lived per-SSRC crypto state shared by the RTP and RTCP state
/// machines: the master material and the currently installed session
/// engines. A context is never entered concurrently.
///
/// Derivation is split into build and install so that per-packet
/// re-derivation cannot be triggered by a packet that ends up rejected:
/// [`BaseContext::build_session_engines`] is pure and
/// [`BaseContext::install_session_engines`] only runs once every check on
/// the packet has passed.
pub(crate) struct BaseContext {
    pub(crate) ssrc: u32,
    pub(crate) policy: Policy,
    master_key: Zeroizing<Vec<u8>>,
    master_salt: Zeroizing<Vec<u8>>,
    engines: Option<SessionEngines>,
}

impl BaseContext {
    pub fn new(ssrc: u32, master_key: &[u8], master_salt: &[u8], policy: Policy) -> Result<Self> {
        policy.validate()?;
        if master_key.len() != policy.enc_key_len {
            return Err(Error::MasterKeyLength(policy.enc_key_len, master_key.len()));
        }
        if master_salt.len() != MASTER_SALT_LEN {
            return Err(Error::MasterSaltLength(MASTER_SALT_LEN, master_salt.len()));
        }
        Ok(BaseContext {
            ssrc,
            policy,
            master_key: Zeroizing::new(master_key.to_vec()),
            master_salt: Zeroizing::new(master_salt.to_vec()),
            engines: None,
        })
    }

    pub fn derived(&self) -> bool {
        self.engines.is_some()
    }

    pub fn engines(&mut self) -> Result<&mut SessionEngines> {
        self.engines.as_mut().ok_or(Error::KeyNotDerived)
    }

    /// Derives the session keys for `index` and builds fresh engines from
    /// them without touching the installed ones. The caller processes the
    /// packet against the result and either commits it with
    /// [`BaseContext::install_session_engines`] or drops it on rejection.
    pub fn build_session_engines(
        &self,
        labels: KeyLabels,
        index: u64,
        key_derivation_rate: u64,
    ) -> Result<SessionEngines> {
        if self.master_key.len() != self.policy.enc_key_len {
            // The master key was wiped after a one-time derivation.
            return Err(Error::KeyNotDerived);
        }
        let keys = key_derivation::derive_session_keys(
            &self.policy,
            &self.master_key,
            &self.master_salt,
            labels,
            index,
            key_derivation_rate,
        )?;

        let mac: Option<Box<dyn PacketMac>> = match (&self.policy.auth, &keys.auth_key) {
            (AuthKind::Null, _) => None,
            (AuthKind::HmacSha1, Some(key)) => Some(Box::new(HmacSha1Auth::new(key)?)),
            (AuthKind::Skein, Some(key)) => Some(Box::new(SkeinAuth::new(key)?)),
            _ => return Err(Error::KeyNotDerived),
        };
        let cipher: Option<Box<dyn StreamCipherEngine>> = match self.policy.encryption {
            EncryptionKind::Null => None,
            EncryptionKind::AesCm => Some(Box::new(AesCounterMode::new(&keys.enc_key)?)),
            EncryptionKind::TwofishCm => Some(Box::new(TwofishCounterMode::new(&keys.enc_key)?)),
            EncryptionKind::AesF8 => {
                Some(Box::new(F8Mode::<Aes128>::new(&keys.enc_key, &keys.salt_key)?))
            }
            EncryptionKind::TwofishF8 => {
                Some(Box::new(F8Mode::<Twofish>::new(&keys.enc_key, &keys.salt_key)?))
            }
        };

        let tag_len = mac.as_ref().map(|m| m.tag_len()).unwrap_or(0);
        Ok(SessionEngines {
            cipher,
            mac,
            salt_key: keys.salt_key,
            iv_store: [0u8; BLOCK_LEN],
            tag_store: Zeroizing::new(vec![0u8; tag_len]),
        })
    }

    /// Commits engines built for an accepted packet. With a zero key
    /// derivation rate no further derivation can occur, so the master
    /// material is wiped; with a non-zero rate it has to stay around for
    /// future epochs and is only wiped on drop.
    pub fn install_session_engines(&mut self, engines: SessionEngines, key_derivation_rate: u64) {
        self.engines = Some(engines);
        if key_derivation_rate == 0 {
            self.master_key.zeroize();
            self.master_salt.zeroize();
        }
    }
}
