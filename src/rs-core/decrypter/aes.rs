use aes::{
    cipher::{
        generic_array::GenericArray, BlockDecrypt, BlockDecryptMut, BlockEncrypt,
        BlockEncryptMut, InnerIvInit, KeyInit,
    },
    Aes128, Aes192, Aes256,
};
use thiserror::Error;

pub(crate) const BLOCK_SIZE: usize = 16;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesError {
    #[error("Invalid AES key length: {0} bytes (16, 24 or 32 expected)")]
    InvalidKeyLength(usize),
}

/// An AES block cipher whose key schedule has been computed.
///
/// Keys of 4, 6 or 8 32-bit words (AES-128, AES-192 and AES-256) are
/// supported.
#[derive(Clone)]
pub(crate) enum Aes {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

/// Run `$body` with `$cipher` bound to the inner cipher, whatever its key size.
macro_rules! with_cipher {
    ($aes:expr, $cipher:ident => $body:expr) => {
        match $aes {
            Aes::Aes128($cipher) => $body,
            Aes::Aes192($cipher) => $body,
            Aes::Aes256($cipher) => $body,
        }
    };
}

impl Aes {
    pub(crate) fn new(key: &[u8]) -> Result<Self, AesError> {
        let invalid = |_| AesError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Ok(Aes::Aes128(Aes128::new_from_slice(key).map_err(invalid)?)),
            24 => Ok(Aes::Aes192(Aes192::new_from_slice(key).map_err(invalid)?)),
            32 => Ok(Aes::Aes256(Aes256::new_from_slice(key).map_err(invalid)?)),
            len => Err(AesError::InvalidKeyLength(len)),
        }
    }

    /// Create a cipher from a key given as big-endian 32-bit words.
    pub(crate) fn from_words(words: &[u32]) -> Result<Self, AesError> {
        let key: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        Self::new(&key)
    }

    pub(crate) fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        with_cipher!(self, c => c.decrypt_block(block))
    }

    pub(crate) fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        with_cipher!(self, c => c.encrypt_block(block))
    }

    /// Decrypt in place `data`, whose length has to be a multiple of the
    /// block size, in CBC mode. Trailing bytes not forming a whole block are
    /// left untouched.
    pub(crate) fn decrypt_cbc(&self, data: &mut [u8], iv: &[u8; BLOCK_SIZE]) {
        let iv = GenericArray::from_slice(iv);
        with_cipher!(self, c => {
            let mut decryptor = cbc::Decryptor::inner_iv_init(c.clone(), iv);
            for block in data.chunks_exact_mut(BLOCK_SIZE) {
                decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        })
    }

    /// Encrypt in place `data` in CBC mode. Trailing bytes not forming a
    /// whole block are left untouched.
    pub(crate) fn encrypt_cbc(&self, data: &mut [u8], iv: &[u8; BLOCK_SIZE]) {
        let iv = GenericArray::from_slice(iv);
        with_cipher!(self, c => {
            let mut encryptor = cbc::Encryptor::inner_iv_init(c.clone(), iv);
            for block in data.chunks_exact_mut(BLOCK_SIZE) {
                encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence_key(len: u8) -> Vec<u8> {
        (0..len).collect()
    }

    const PLAINTEXT: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];

    #[test]
    fn test_known_vectors() {
        let cases: [(u8, [u8; 16]); 3] = [
            (
                16,
                [
                    0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70,
                    0xb4, 0xc5, 0x5a,
                ],
            ),
            (
                24,
                [
                    0xdd, 0xa9, 0x7c, 0xa4, 0x86, 0x4c, 0xdf, 0xe0, 0x6e, 0xaf, 0x70, 0xa0, 0xec,
                    0x0d, 0x71, 0x91,
                ],
            ),
            (
                32,
                [
                    0x8e, 0xa2, 0xb7, 0xca, 0x51, 0x67, 0x45, 0xbf, 0xea, 0xfc, 0x49, 0x90, 0x4b,
                    0x49, 0x60, 0x89,
                ],
            ),
        ];
        for (key_len, expected) in cases {
            let aes = Aes::new(&sequence_key(key_len)).unwrap();
            let mut block = PLAINTEXT;
            aes.encrypt_block(&mut block);
            assert_eq!(block, expected);
            aes.decrypt_block(&mut block);
            assert_eq!(block, PLAINTEXT);
        }
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            Aes::new(&[0; 20]).err(),
            Some(AesError::InvalidKeyLength(20))
        );
        assert_eq!(
            Aes::from_words(&[0; 5]).err(),
            Some(AesError::InvalidKeyLength(20))
        );
    }

    #[test]
    fn test_from_words() {
        let aes = Aes::from_words(&[0x00010203, 0x04050607, 0x08090a0b, 0x0c0d0e0f]).unwrap();
        let mut block = PLAINTEXT;
        aes.encrypt_block(&mut block);
        assert_eq!(block[0], 0x69);
    }

    #[test]
    fn test_cbc_round_trip() {
        let aes = Aes::new(&sequence_key(16)).unwrap();
        let iv = [7; 16];
        let original: Vec<u8> = (0..64).collect();
        let mut data = original.clone();
        aes.encrypt_cbc(&mut data, &iv);
        assert_ne!(data, original);
        // identical plaintext blocks give different ciphertext blocks
        let mut same = vec![0; 32];
        aes.encrypt_cbc(&mut same, &iv);
        assert_ne!(same[..16], same[16..]);
        aes.decrypt_cbc(&mut data, &iv);
        assert_eq!(data, original);
    }
}
