// SPDX-FileCopyrightText: 2026 meshfw contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Password-based AES-128-CBC in the "salted" container format produced by
//! `openssl enc -aes-128-cbc -md sha256 -iv <iv>`.
//!
//! The key is derived from the password and salt. The KDF also derives an IV,
//! but that is discarded. The IV that is actually used is supplied by the
//! caller because factory images carry it separately in ASCII form. This
//! weakens the scheme (the IV is fixed), but it is what devices expect.

use aes::Aes128;
use bstr::ByteSlice;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand::RngCore;
use sha2::{Digest, Sha256, digest::Output};
use thiserror::Error;
use tracing::{trace, warn};

/// Tag at the start of a salted container.
pub const SALTED_MAGIC: [u8; 8] = *b"Salted__";

/// Size of the salt following [`SALTED_MAGIC`].
pub const SALT_SIZE: usize = 8;

/// Size of [`SALTED_MAGIC`] plus the salt.
pub const SALTED_PREFIX_SIZE: usize = SALTED_MAGIC.len() + SALT_SIZE;

/// AES block size, which is also the IV size.
pub const BLOCK_SIZE: usize = 16;

const KEY_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Salted container is truncated: {0} < {size} bytes", size = SALTED_PREFIX_SIZE)]
    Truncated(usize),
    #[error("Ciphertext size is not a multiple of {BLOCK_SIZE}: {0}")]
    InvalidCiphertextSize(usize),
    #[error("Invalid padding after decryption")]
    InvalidPadding,
}

type Result<T> = std::result::Result<T, Error>;

/// OpenSSL's `EVP_BytesToKey` with a single iteration. Fills `out` with
/// `D(D_prev || password || salt)` blocks, where `D_prev` is empty for the
/// first block.
pub fn bytes_to_key<D: Digest>(password: &[u8], salt: &[u8], out: &mut [u8]) {
    let mut prev: Option<Output<D>> = None;
    let mut filled = 0;

    while filled < out.len() {
        let mut hasher = D::new();
        if let Some(p) = &prev {
            hasher.update(p);
        }
        hasher.update(password);
        hasher.update(salt);

        let block = hasher.finalize();
        let n = (out.len() - filled).min(block.len());
        out[filled..filled + n].copy_from_slice(&block[..n]);
        filled += n;

        prev = Some(block);
    }
}

/// Derive the AES-128 key and IV from a password and salt using SHA-256.
pub fn derive_key_and_iv(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
) -> ([u8; KEY_SIZE], [u8; BLOCK_SIZE]) {
    let mut material = [0u8; KEY_SIZE + BLOCK_SIZE];
    bytes_to_key::<Sha256>(password, salt, &mut material);

    let mut key = [0u8; KEY_SIZE];
    let mut iv = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&material[..KEY_SIZE]);
    iv.copy_from_slice(&material[KEY_SIZE..]);

    (key, iv)
}

/// Generate a random salt.
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Encrypt `plaintext` with PKCS#7 padding and return the salted container
/// (tag, salt, ciphertext).
pub fn encrypt(
    plaintext: &[u8],
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    iv: &[u8; BLOCK_SIZE],
) -> Vec<u8> {
    let (key, _) = derive_key_and_iv(password, salt);

    let ciphertext = cbc::Encryptor::<Aes128>::new(&key.into(), &(*iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    trace!(
        "Encrypted {} bytes into {} bytes",
        plaintext.len(),
        ciphertext.len(),
    );

    let mut container = Vec::with_capacity(SALTED_PREFIX_SIZE + ciphertext.len());
    container.extend_from_slice(&SALTED_MAGIC);
    container.extend_from_slice(salt);
    container.extend_from_slice(&ciphertext);

    container
}

/// Decrypt a salted container. The salt is taken from the container and the
/// tag is not required to be present.
pub fn decrypt(container: &[u8], password: &[u8], iv: &[u8; BLOCK_SIZE]) -> Result<Vec<u8>> {
    if container.len() < SALTED_PREFIX_SIZE {
        return Err(Error::Truncated(container.len()));
    }

    let (prefix, ciphertext) = container.split_at(SALTED_PREFIX_SIZE);
    let (tag, salt_bytes) = prefix.split_at(SALTED_MAGIC.len());

    if tag != SALTED_MAGIC {
        warn!("Salted container has unexpected tag: {:?}", tag.as_bstr());
    }

    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::InvalidCiphertextSize(ciphertext.len()));
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(salt_bytes);

    let (key, _) = derive_key_and_iv(password, &salt);

    cbc::Decryptor::<Aes128>::new(&key.into(), &(*iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::InvalidPadding)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const PASSWORD: &[u8] = b"6b29f1d663a21b35fb45b69a42649f5e";
    const SALT: [u8; SALT_SIZE] = [0x65, 0xfc, 0x43, 0xbc, 0x67, 0xa3, 0x23, 0x35];
    const IV: [u8; BLOCK_SIZE] = [
        0x99, 0x38, 0x0c, 0x25, 0xae, 0xcc, 0x79, 0xd3, 0x9b, 0x14, 0x5a, 0xc0, 0x43, 0x53, 0xbb,
        0xe9,
    ];
    const PLAINTEXT: &[u8] = b"The quick brown fox jumps over the lazy dog";

    #[test]
    fn kdf_matches_openssl() {
        // openssl enc -aes-128-cbc -md sha256 -S 0102030405060708 -pass pass:password -P
        let (key, iv) = derive_key_and_iv(b"password", &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(hex::encode(key), "2435177f1410536baad2acc155c0f947");
        assert_eq!(hex::encode(iv), "83d58384573cb0f72157443606285d3f");

        let (key, iv) = derive_key_and_iv(PASSWORD, &SALT);
        assert_eq!(hex::encode(key), "44a9fa919cb13a73ec17d224961a5ea0");
        assert_eq!(hex::encode(iv), "5076e1ef68a09f04832085a576e31498");
    }

    #[test]
    fn encrypt_uses_explicit_iv() {
        let container = encrypt(PLAINTEXT, PASSWORD, &SALT, &IV);

        assert_eq!(
            hex::encode(&container),
            "53616c7465645f5f65fc43bc67a32335dba79416faa112c2f9ef50c1d173eb22\
             41ca71afd1fc81564fa20cb7a545b45cfae71ddea723a5f5c072c814f39f195e",
        );
        assert_eq!(decrypt(&container, PASSWORD, &IV).unwrap(), PLAINTEXT);
    }

    #[test]
    fn padding_always_added() {
        for len in [0, 1, 15, 16, 17, 32] {
            let plaintext = vec![0xa5u8; len];
            let container = encrypt(&plaintext, PASSWORD, &SALT, &IV);

            assert_eq!(
                container.len(),
                SALTED_PREFIX_SIZE + (len / BLOCK_SIZE + 1) * BLOCK_SIZE,
            );
            assert_eq!(decrypt(&container, PASSWORD, &IV).unwrap(), plaintext);
        }
    }

    #[test]
    fn decrypt_wrong_password() {
        let container = encrypt(PLAINTEXT, PASSWORD, &SALT, &IV);

        assert_matches!(
            decrypt(&container, b"4d5ee2c8b5d0fdd9a9a2d351ba897752", &IV),
            Err(Error::InvalidPadding)
        );
    }

    #[test]
    fn decrypt_malformed() {
        let container = encrypt(PLAINTEXT, PASSWORD, &SALT, &IV);

        assert_matches!(
            decrypt(&container[..15], PASSWORD, &IV),
            Err(Error::Truncated(15))
        );
        let short = &container[..container.len() - 1];
        assert_matches!(
            decrypt(short, PASSWORD, &IV),
            Err(Error::InvalidCiphertextSize(n)) if n == short.len() - SALTED_PREFIX_SIZE
        );
        assert_matches!(
            decrypt(short, PASSWORD, &IV),
            Err(Error::InvalidCiphertextSize(47))
        );
        assert_matches!(
            decrypt(&container[..SALTED_PREFIX_SIZE], PASSWORD, &IV),
            Err(Error::InvalidPadding)
        );
    }
}
