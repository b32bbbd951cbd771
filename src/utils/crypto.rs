//! Session cipher and hashing primitives for the zero-knowledge layer.
//!
//! Messages are encrypted with AES-256-CBC under the negotiated session key. Every
//! message gets a fresh random IV, sent in front of the ciphertext:
//!
//! ```text
//! [IV(16)] [AES-256-CBC(plaintext + ISO 10126 padding)]
//! ```
//!
//! ISO 10126 padding fills with random bytes and stores the pad length in the last byte,
//! so even identical plaintexts never produce identical padding blocks.

use crate::error::{constants, Result, RpcError};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;

/// Fill a fixed-size array from the OS random number generator.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    getrandom::fill(&mut out).map_err(|e| {
        RpcError::AuthenticationFailed(format!("OS random number generator failed: {e}"))
    })?;
    Ok(out)
}

/// SHA-256 over the concatenation of `parts`.
pub fn zk_hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Compare two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// AES-256-CBC cipher bound to one authenticated session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ZkCipher {
    key: [u8; 32],
}

impl ZkCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv: [u8; BLOCK_SIZE] = random_bytes().map_err(|_| RpcError::EncryptionFailure)?;

        let pad_len = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
        let mut padded = Vec::with_capacity(plaintext.len() + pad_len);
        padded.extend_from_slice(plaintext);
        let mut filler = [0u8; BLOCK_SIZE];
        rand::rng().fill_bytes(&mut filler[..pad_len - 1]);
        padded.extend_from_slice(&filler[..pad_len - 1]);
        padded.push(pad_len as u8);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<NoPadding>(&padded);
        padded.zeroize();

        let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
            return Err(RpcError::DecryptionFailure(
                constants::ERR_BAD_CIPHERTEXT_LEN.to_string(),
            ));
        }

        let (iv, ciphertext) = data.split_at(BLOCK_SIZE);
        let mut iv_block = [0u8; BLOCK_SIZE];
        iv_block.copy_from_slice(iv);

        let mut plaintext = Aes256CbcDec::new(&self.key.into(), &iv_block.into())
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| RpcError::DecryptionFailure(constants::ERR_BAD_PADDING.to_string()))?;

        let pad_len = plaintext.last().copied().unwrap_or(0) as usize;
        if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > plaintext.len() {
            plaintext.zeroize();
            return Err(RpcError::DecryptionFailure(
                constants::ERR_BAD_PADDING.to_string(),
            ));
        }
        plaintext.truncate(plaintext.len() - pad_len);
        Ok(plaintext)
    }
}

impl std::fmt::Debug for ZkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZkCipher { .. }")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_padding_lengths() {
        let cipher = ZkCipher::new([7u8; 32]);
        for len in 0..=48 {
            let plain: Vec<u8> = (0..len as u8).collect();
            let sealed = cipher.encrypt(&plain).unwrap();
            assert_eq!(sealed.len() % BLOCK_SIZE, 0);
            assert!(sealed.len() >= plain.len() + BLOCK_SIZE + 1);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), plain);
        }
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let cipher = ZkCipher::new([1u8; 32]);
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_or_length_fails() {
        let sealed = ZkCipher::new([1u8; 32]).encrypt(b"secret").unwrap();
        let other = ZkCipher::new([2u8; 32]);
        // a wrong key almost always yields a bad pad byte; it must never yield the plaintext
        assert_ne!(other.decrypt(&sealed).ok(), Some(b"secret".to_vec()));

        assert!(matches!(
            other.decrypt(&sealed[..20]),
            Err(RpcError::DecryptionFailure(_))
        ));
        assert!(other.decrypt(&[]).is_err());
    }

    #[test]
    fn test_hash_and_compare() {
        let h1 = zk_hash(&[b"ab", b"c"]);
        let h2 = zk_hash(&[b"a", b"bc"]);
        assert_eq!(h1, h2);
        assert!(constant_time_eq(&h1, &h2));
        assert!(!constant_time_eq(&h1, &zk_hash(&[b"abd"])));
        assert!(!constant_time_eq(&h1, &h1[..31]));
    }
}
