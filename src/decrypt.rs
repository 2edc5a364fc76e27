//! The single hard-coded D-Link SHRS decryption case (cascade stage 2). Not
//! a general-purpose crypto module - this firmware family ships a fixed
//! AES-128-CBC key and IV baked into every image.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use cbc::Decryptor;

use crate::error::Fw2tarError;

const SHRS_KEY_HEX: &str = "c05fbf1936c99429ce2a0781f08d6ad8";
const SHRS_IV_HEX: &str = "67c6697351ff4aec29cdbaabf2fbe346";
const SHRS_SKIP_BYTES: usize = 1756;
pub const SHRS_MAGIC: &[u8; 4] = b"SHRS";

/// Decrypts a D-Link `SHRS`-framed firmware payload: skip the first 1756
/// bytes of wrapper header, then AES-128-CBC decrypt the remainder with no
/// padding and no salt. The ciphertext length after the skip must be a
/// multiple of the block size.
pub fn dlink_decrypt(ciphertext_with_header: &[u8]) -> Result<Vec<u8>, Fw2tarError> {
    if ciphertext_with_header.len() <= SHRS_SKIP_BYTES {
        return Err(Fw2tarError::ParseError(
            "SHRS payload shorter than the fixed header skip".into(),
        ));
    }

    let key = hex::decode(SHRS_KEY_HEX)
        .map_err(|e| Fw2tarError::ParseError(format!("bad SHRS key constant: {e}")))?;
    let iv = hex::decode(SHRS_IV_HEX)
        .map_err(|e| Fw2tarError::ParseError(format!("bad SHRS iv constant: {e}")))?;

    let mut buf = ciphertext_with_header[SHRS_SKIP_BYTES..].to_vec();

    let decryptor = Decryptor::<Aes128>::new_from_slices(&key, &iv)
        .map_err(|e| Fw2tarError::ParseError(format!("bad SHRS key/iv length: {e}")))?;

    let plaintext_len = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| Fw2tarError::ParseError(format!("SHRS decryption failed: {e}")))?
        .len();

    buf.truncate(plaintext_len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::Aes128;
    use cbc::cipher::BlockEncryptMut;
    use cbc::Encryptor;

    #[test]
    fn round_trips_a_synthetic_payload() {
        let key = hex::decode(SHRS_KEY_HEX).unwrap();
        let iv = hex::decode(SHRS_IV_HEX).unwrap();

        let plaintext = vec![0x41u8; 32]; // two AES blocks, already block-aligned
        let encryptor = Encryptor::<Aes128>::new_from_slices(&key, &iv).unwrap();
        let ciphertext = encryptor
            .encrypt_padded_vec_mut::<NoPadding>(&plaintext);

        let mut framed = vec![0u8; SHRS_SKIP_BYTES];
        framed.extend_from_slice(&ciphertext);

        let recovered = dlink_decrypt(&framed).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn rejects_payload_shorter_than_header() {
        let short = vec![0u8; 10];
        assert!(dlink_decrypt(&short).is_err());
    }
}
