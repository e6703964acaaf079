use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::protection_profile::ProtectionProfile;

const LABEL_EXTRACTOR_DTLS_SRTP: &str = "EXTRACTOR-dtls_srtp";

/// KeyingMaterialExporter lets the SRTP layer pull keying material out of an
/// established DTLS connection, RFC 5705 / RFC 5764.
pub trait KeyingMaterialExporter {
    fn export_keying_material(
        &self,
        label: &str,
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>>;
}

/// Master keys and salts for both directions of a session. Wiped on drop.
#[derive(Default)]
pub struct MasterKeys {
    pub local_master_key: Zeroizing<Vec<u8>>,
    pub local_master_salt: Zeroizing<Vec<u8>>,
    pub remote_master_key: Zeroizing<Vec<u8>>,
    pub remote_master_salt: Zeroizing<Vec<u8>>,
}

/// Config is used to set up an [`crate::SrtpManager`]. Provide the keys
/// directly or extract them from DTLS with
/// [`Config::extract_session_keys_from_dtls`]. After a Config is passed to a
/// manager it must not be modified.
pub struct Config {
    pub keys: MasterKeys,
    pub profile: ProtectionProfile,
    /// 0 disables session key re-derivation.
    pub key_derivation_rate: u64,
    pub replay_protection: bool,
}

impl Config {
    pub fn new(profile: ProtectionProfile) -> Self {
        Config {
            keys: MasterKeys::default(),
            profile,
            key_derivation_rate: 0,
            replay_protection: true,
        }
    }

    /// Fills in the master keys from a DTLS exporter, RFC 5764 section 4.2:
    /// the exporter output is split into client write key, server write key,
    /// client write salt and server write salt, and which pair is local
    /// depends on which side of the handshake we were.
    pub fn extract_session_keys_from_dtls(
        &mut self,
        exporter: &impl KeyingMaterialExporter,
        is_client: bool,
    ) -> Result<()> {
        let key_len = self.profile.key_len();
        let salt_len = self.profile.salt_len();
        let material_len = self.profile.keying_material_len();

        let material = Zeroizing::new(exporter.export_keying_material(
            LABEL_EXTRACTOR_DTLS_SRTP,
            &[],
            material_len,
        )?);
        if material.len() != material_len {
            return Err(Error::KeyingMaterialLength(material_len, material.len()));
        }

        let mut offset = 0;
        let client_write_key = Zeroizing::new(material[offset..offset + key_len].to_vec());
        offset += key_len;
        let server_write_key = Zeroizing::new(material[offset..offset + key_len].to_vec());
        offset += key_len;
        let client_write_salt = Zeroizing::new(material[offset..offset + salt_len].to_vec());
        offset += salt_len;
        let server_write_salt = Zeroizing::new(material[offset..offset + salt_len].to_vec());

        if is_client {
            self.keys.local_master_key = client_write_key;
            self.keys.local_master_salt = client_write_salt;
            self.keys.remote_master_key = server_write_key;
            self.keys.remote_master_salt = server_write_salt;
        } else {
            self.keys.local_master_key = server_write_key;
            self.keys.local_master_salt = server_write_salt;
            self.keys.remote_master_key = client_write_key;
            self.keys.remote_master_salt = client_write_salt;
        }
        Ok(())
    }
}
