//! AES-CBC decryption of encrypted segments.
//!
//! Segments can be big, so decryption is split into chunks which are
//! processed one at a time by a `DecryptJobQueue`, each call to
//! `DecryptJobQueue::step` being meant to run in its own scheduling quantum.

use crate::Logger;
use thiserror::Error;

mod aes;
mod pkcs7;

pub use self::aes::AesError;
use self::aes::{Aes, BLOCK_SIZE};

/// Default number of 32-bit words decrypted per job.
pub const DEFAULT_CHUNK_WORDS: usize = 8000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptError {
    #[error("Encrypted data length ({0} bytes) is not a multiple of the AES block size")]
    UnalignedInput(usize),
    #[error(transparent)]
    Key(#[from] AesError),
}

/// Build a 16-byte IV from four big-endian 32-bit words.
pub fn iv_from_words(words: [u32; 4]) -> [u8; 16] {
    let mut iv = [0; 16];
    for (dst, word) in iv.chunks_exact_mut(4).zip(words) {
        dst.copy_from_slice(&word.to_be_bytes());
    }
    iv
}

/// IV used for a segment whose key declares none: its media sequence number
/// as a big-endian 128-bit integer.
pub fn iv_from_sequence_number(media_sequence: u32) -> [u8; 16] {
    iv_from_words([0, 0, 0, media_sequence])
}

/// Decrypt a whole AES-CBC encrypted, PKCS#7 padded, payload at once.
pub fn decrypt(encrypted: &[u8], key: &[u8], iv: [u8; 16]) -> Result<Vec<u8>, DecryptError> {
    if encrypted.len() % BLOCK_SIZE != 0 {
        return Err(DecryptError::UnalignedInput(encrypted.len()));
    }
    let aes = Aes::new(key)?;
    let mut decrypted = encrypted.to_vec();
    aes.decrypt_cbc(&mut decrypted, &iv);
    let len = pkcs7::unpad(&decrypted).len();
    decrypted.truncate(len);
    Ok(decrypted)
}

/// Result of a single `DecryptJobQueue::step` call.
#[derive(Debug, PartialEq, Eq)]
pub enum DecryptProgress {
    /// Chunks remain, `step` should be called again at the next occasion.
    Pending,
    /// Everything has been decrypted and unpadded.
    Done(Vec<u8>),
}

/// Decrypts an encrypted payload chunk by chunk.
///
/// Chunk `i > 0` uses as IV the last ciphertext block of chunk `i - 1`, so
/// the concatenation of all chunks is the same as a single-shot decryption.
pub struct DecryptJobQueue {
    aes: Aes,
    data: Vec<u8>,
    /// Offset in `data` of the next chunk to decrypt.
    offset: usize,
    chunk_size: usize,
    iv: [u8; 16],
    done: bool,
}

impl DecryptJobQueue {
    /// Create a new queue decrypting `encrypted` with the given 16, 24 or 32
    /// bytes `key`, `chunk_words` 32-bit words at a time.
    pub fn new(
        encrypted: Vec<u8>,
        key: &[u8],
        iv: [u8; 16],
        chunk_words: usize,
    ) -> Result<Self, DecryptError> {
        if encrypted.len() % BLOCK_SIZE != 0 {
            return Err(DecryptError::UnalignedInput(encrypted.len()));
        }
        let aes = Aes::new(key)?;

        // Chunks have to stay aligned on blocks for the IV hand-off to work.
        let chunk_size = (chunk_words.max(4) * 4) / BLOCK_SIZE * BLOCK_SIZE;
        Logger::lazy_debug(&|| {
            format!(
                "Decrypter: new job queue ({} bytes, {} bytes per chunk)",
                encrypted.len(),
                chunk_size
            )
        });
        Ok(Self {
            aes,
            data: encrypted,
            offset: 0,
            chunk_size,
            iv,
            done: false,
        })
    }

    /// Number of chunks not yet decrypted.
    pub fn remaining_chunks(&self) -> usize {
        if self.done {
            return 0;
        }
        let remaining = self.data.len() - self.offset;
        (remaining + self.chunk_size - 1) / self.chunk_size
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decrypt the next chunk.
    ///
    /// Once the last chunk has been decrypted, the padding is removed and the
    /// whole plaintext is returned through `DecryptProgress::Done`. Calling
    /// `step` after that (or after `cancel`) returns an empty `Done`.
    pub fn step(&mut self) -> Result<DecryptProgress, DecryptError> {
        if self.done {
            return Ok(DecryptProgress::Done(vec![]));
        }
        let end = usize::min(self.offset + self.chunk_size, self.data.len());
        let chunk = &mut self.data[self.offset..end];
        let mut next_iv = [0; 16];
        if chunk.len() >= BLOCK_SIZE {
            next_iv.copy_from_slice(&chunk[chunk.len() - BLOCK_SIZE..]);
        }
        self.aes.decrypt_cbc(chunk, &self.iv);
        self.iv = next_iv;
        self.offset = end;

        if self.offset < self.data.len() {
            return Ok(DecryptProgress::Pending);
        }
        self.done = true;
        let unpadded_len = pkcs7::unpad(&self.data).len();
        let mut data = std::mem::take(&mut self.data);
        data.truncate(unpadded_len);
        Logger::lazy_debug(&|| format!("Decrypter: done ({} bytes)", unpadded_len));
        Ok(DecryptProgress::Done(data))
    }

    /// Drop all remaining jobs.
    pub fn cancel(&mut self) {
        if !self.done {
            Logger::debug("Decrypter: job queue cancelled");
        }
        self.done = true;
        self.data.clear();
        self.offset = 0;
    }
}
