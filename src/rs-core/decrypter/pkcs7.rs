use super::aes::BLOCK_SIZE;
use crate::Logger;

/// Returns `data` without its PKCS#7 padding: the last byte gives the number
/// of padding bytes to remove.
///
/// The padding is not validated. Data decrypted with the wrong key or IV just
/// loses up to 255 trailing bytes instead of failing.
pub(crate) fn unpad(data: &[u8]) -> &[u8] {
    let padding = match data.last() {
        None => return data,
        Some(p) => *p as usize,
    };
    if padding == 0 || padding > BLOCK_SIZE {
        Logger::lazy_warn(&|| format!("Decrypter: unexpected PKCS#7 padding byte {}", padding));
    }
    &data[..data.len() - usize::min(padding, data.len())]
}

/// Pad `data` to a multiple of the block size.
pub(crate) fn pad(data: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(padding as u8).take(padding));
    padded
}
