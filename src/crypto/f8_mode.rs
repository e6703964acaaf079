use aes::cipher::{Block, BlockEncrypt, KeyInit};
use zeroize::Zeroizing;

use super::{StreamCipherEngine, BLOCK_LEN};
use crate::error::{Error, Result};

/// F8 feedback mode, RFC 3711 section 4.1.2. The IV is first masked by
/// encrypting it under `k_e XOR m` where `m` is the session salt padded
/// with 0x55 bytes; each keystream block then feeds the next:
///
/// ```text
/// S(j) = E(k_e, IV' XOR j XOR S(j-1))
/// ```
pub(crate) struct F8Mode<C> {
    cipher: C,
    iv_cipher: C,
}

impl<C> F8Mode<C>
where
    C: BlockEncrypt + KeyInit,
{
    pub fn new(session_key: &[u8], session_salt: &[u8]) -> Result<Self> {
        let mut masked = Zeroizing::new(session_key.to_vec());
        for (i, b) in masked.iter_mut().enumerate() {
            *b ^= if i < session_salt.len() {
                session_salt[i]
            } else {
                0x55
            };
        }
        let cipher = C::new_from_slice(session_key)
            .map_err(|_| Error::SessionKeyLength(session_key.len()))?;
        let iv_cipher =
            C::new_from_slice(&masked).map_err(|_| Error::SessionKeyLength(masked.len()))?;
        Ok(F8Mode { cipher, iv_cipher })
    }
}

impl<C> StreamCipherEngine for F8Mode<C>
where
    C: BlockEncrypt + KeyInit + Send,
{
    fn process(&mut self, buf: &mut [u8], iv: &[u8; BLOCK_LEN]) -> Result<()> {
        let mut masked_iv = Block::<C>::clone_from_slice(iv);
        self.iv_cipher.encrypt_block(&mut masked_iv);

        let mut keystream = Block::<C>::clone_from_slice(&[0u8; BLOCK_LEN]);
        let mut j: u32 = 0;
        for chunk in buf.chunks_mut(BLOCK_LEN) {
            for (s, m) in keystream.iter_mut().zip(masked_iv.iter()) {
                *s ^= m;
            }
            for (s, c) in keystream[BLOCK_LEN - 4..].iter_mut().zip(j.to_be_bytes()) {
                *s ^= c;
            }
            self.cipher.encrypt_block(&mut keystream);
            for (b, k) in chunk.iter_mut().zip(keystream.iter()) {
                *b ^= k;
            }
            j = j.wrapping_add(1);
        }
        Ok(())
    }
}
