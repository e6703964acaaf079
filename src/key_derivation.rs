use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use byteorder::{BigEndian, ByteOrder};
use twofish::Twofish;
use zeroize::Zeroizing;

use crate::crypto::BLOCK_LEN;
use crate::error::{Error, Result};
use crate::policy::{AuthKind, EncryptionKind, Policy};

pub(crate) const LABEL_RTP_ENCRYPTION: u8 = 0x00;
pub(crate) const LABEL_RTP_AUTHENTICATION: u8 = 0x01;
pub(crate) const LABEL_RTP_SALT: u8 = 0x02;
pub(crate) const LABEL_RTCP_ENCRYPTION: u8 = 0x03;
pub(crate) const LABEL_RTCP_AUTHENTICATION: u8 = 0x04;
pub(crate) const LABEL_RTCP_SALT: u8 = 0x05;

pub(crate) const MASTER_SALT_LEN: usize = 14;

/// Key derivation labels for one packet family.
#[derive(Clone, Copy)]
pub(crate) struct KeyLabels {
    pub encryption: u8,
    pub authentication: u8,
    pub salt: u8,
}

pub(crate) const RTP_LABELS: KeyLabels = KeyLabels {
    encryption: LABEL_RTP_ENCRYPTION,
    authentication: LABEL_RTP_AUTHENTICATION,
    salt: LABEL_RTP_SALT,
};

pub(crate) const RTCP_LABELS: KeyLabels = KeyLabels {
    encryption: LABEL_RTCP_ENCRYPTION,
    authentication: LABEL_RTCP_AUTHENTICATION,
    salt: LABEL_RTCP_SALT,
};

/// Session keys derived from one master key, RFC 3711 section 4.3.
pub(crate) struct SessionKeys {
    pub enc_key: Zeroizing<Vec<u8>>,
    pub auth_key: Option<Zeroizing<Vec<u8>>>,
    pub salt_key: Zeroizing<Vec<u8>>,
}

pub(crate) fn derive_session_keys(
    policy: &Policy,
    master_key: &[u8],
    master_salt: &[u8],
    labels: KeyLabels,
    index: u64,
    key_derivation_rate: u64,
) -> Result<SessionKeys> {
    let enc_key = derive(
        policy,
        master_key,
        master_salt,
        labels.encryption,
        index,
        key_derivation_rate,
        policy.enc_key_len,
    )?;
    let auth_key = if policy.auth == AuthKind::Null {
        None
    } else {
        Some(derive(
            policy,
            master_key,
            master_salt,
            labels.authentication,
            index,
            key_derivation_rate,
            policy.auth_key_len,
        )?)
    };
    let salt_key = derive(
        policy,
        master_key,
        master_salt,
        labels.salt,
        index,
        key_derivation_rate,
        policy.salt_key_len,
    )?;
    Ok(SessionKeys {
        enc_key,
        auth_key,
        salt_key,
    })
}

fn derive(
    policy: &Policy,
    master_key: &[u8],
    master_salt: &[u8],
    label: u8,
    index: u64,
    key_derivation_rate: u64,
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let iv = compute_iv(label, master_salt, index, key_derivation_rate)?;
    // The PRF runs the suite's own block cipher in counter mode.
    match policy.encryption {
        EncryptionKind::TwofishCm | EncryptionKind::TwofishF8 => {
            prf::<Twofish>(master_key, &iv, out_len)
        }
        _ => prf::<Aes128>(master_key, &iv, out_len),
    }
}

/// IV for deriving the key of a given label, RFC 3711 section 4.3.1:
/// the master salt XORed with `(label << 48) | (index DIV kdr)` placed in
/// the low seven bytes, left-padded to a cipher block with two zero bytes.
fn compute_iv(
    label: u8,
    master_salt: &[u8],
    index: u64,
    key_derivation_rate: u64,
) -> Result<[u8; BLOCK_LEN]> {
    if master_salt.len() != MASTER_SALT_LEN {
        return Err(Error::MasterSaltLength(MASTER_SALT_LEN, master_salt.len()));
    }
    let key_id = if key_derivation_rate == 0 {
        u64::from(label) << 48
    } else {
        (u64::from(label) << 48) | (index / key_derivation_rate)
    };
    let mut iv = [0u8; BLOCK_LEN];
    iv[..7].copy_from_slice(&master_salt[..7]);
    for i in 7..MASTER_SALT_LEN {
        iv[i] = ((key_id >> (8 * (13 - i))) as u8) ^ master_salt[i];
    }
    Ok(iv)
}

/// AES-CM keystream generator of RFC 3711 section 4.1.1, used as the key
/// derivation PRF: encrypt successive counter blocks and truncate.
fn prf<C>(master_key: &[u8], iv: &[u8; BLOCK_LEN], out_len: usize) -> Result<Zeroizing<Vec<u8>>>
where
    C: BlockEncrypt + KeyInit,
{
    let cipher = C::new_from_slice(master_key)
        .map_err(|_| Error::MasterKeyLength(BLOCK_LEN, master_key.len()))?;
    let blocks = (out_len + BLOCK_LEN - 1) / BLOCK_LEN;
    let mut out = Zeroizing::new(vec![0u8; blocks * BLOCK_LEN]);
    for (i, block) in out.chunks_mut(BLOCK_LEN).enumerate() {
        block.copy_from_slice(iv);
        BigEndian::write_u16(&mut block[BLOCK_LEN - 2..], i as u16);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out.truncate(out_len);
    Ok(out)
}

/// Per-packet counter-mode IV, RFC 3711 section 4.1.1: the session salt
/// XORed with the SSRC at bytes 4..8 and the 48-bit packet index at
/// bytes 8..14, with the block counter in the trailing two bytes.
pub(crate) fn generate_counter(index: u64, ssrc: u32, session_salt: &[u8]) -> [u8; BLOCK_LEN] {
    debug_assert_eq!(session_salt.len(), MASTER_SALT_LEN);

    let mut counter = [0u8; BLOCK_LEN];
    counter[..4].copy_from_slice(&session_salt[..4]);
    let ssrc = ssrc.to_be_bytes();
    for i in 0..4 {
        counter[4 + i] = ssrc[i] ^ session_salt[4 + i];
    }
    for i in 0..6 {
        counter[8 + i] = ((index >> (8 * (5 - i))) as u8) ^ session_salt[8 + i];
    }
    counter
}
