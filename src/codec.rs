//! Content codec: hashing, per-block authenticated encryption, and the
//! hash-suffix integrity protocol (§4.1).
//!
//! Encryption is AES-256 in counter mode over a 128-bit IV. Because CTR is
//! a stream cipher, OpenSSL reports its block size as 1; the 16-byte suffix
//! used for integrity checking and IV derivation below is the underlying
//! AES block size, not the stream mode's reported block size, and is kept
//! as an explicit constant rather than queried from the `Cipher`.

use openssl::hash::{Hasher, MessageDigest};
use openssl::pkey::PKey;
use openssl::sign::Signer;
use openssl::symm::{Cipher, Crypter, Mode};

use crate::content_id::{ContentID, PackFile};
use crate::error::{Error, Result};

pub const HASH_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const CIPHER_BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

pub type Iv = [u8; IV_SIZE];
pub type Key = [u8; KEY_SIZE];

/// SHA-256 over `plaintext`. Used both as the content identifier's hex part
/// and, truncated, as the integrity suffix.
pub fn hash(plaintext: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Hasher::new(MessageDigest::sha256()).expect("sha256 hasher");
    hasher.update(plaintext).expect("hasher update");
    let digest = hasher.finish().expect("hasher finish");
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// AES-256-CTR encrypt. Length-preserving.
pub fn encrypt(plaintext: &[u8], key: &Key, iv: &Iv) -> Result<Vec<u8>> {
    ctr_crypt(plaintext, key, iv, Mode::Encrypt)
}

/// AES-256-CTR decrypt (identical operation to encrypt under CTR). Length-preserving.
pub fn decrypt(ciphertext: &[u8], key: &Key, iv: &Iv) -> Result<Vec<u8>> {
    ctr_crypt(ciphertext, key, iv, Mode::Decrypt)
}

fn ctr_crypt(input: &[u8], key: &Key, iv: &Iv, mode: Mode) -> Result<Vec<u8>> {
    let cipher = Cipher::aes_256_ctr();
    let mut crypter =
        Crypter::new(cipher, mode, key, Some(iv)).map_err(|e| anyhow::anyhow!(e))?;
    crypter.pad(false);
    let mut out = vec![0u8; input.len() + cipher.block_size()];
    let count = crypter.update(input, &mut out).map_err(|e| anyhow::anyhow!(e))?;
    let rest = crypter.finalize(&mut out[count..]).map_err(|e| anyhow::anyhow!(e))?;
    out.truncate(count + rest);
    Ok(out)
}

/// Decrypt `ciphertext` taken from `[absolute_offset, absolute_offset+len)`
/// of a single continuous AES-256-CTR keystream seeded by `base_iv` at
/// offset 0. Used for version-0 packs, where every entry is a slice of one
/// whole-pack encryption rather than its own independently-keyed stream:
/// the 128-bit counter is advanced by `absolute_offset / 16` blocks, and any
/// partial-block remainder is produced and discarded rather than skipped,
/// since CTR keystream bytes can't be generated starting mid-block.
pub fn decrypt_at_offset(
    ciphertext: &[u8],
    key: &Key,
    base_iv: &Iv,
    absolute_offset: u64,
) -> Result<Vec<u8>> {
    ctr_crypt_at_offset(ciphertext, key, base_iv, absolute_offset, Mode::Decrypt)
}

fn ctr_crypt_at_offset(
    input: &[u8],
    key: &Key,
    base_iv: &Iv,
    absolute_offset: u64,
    mode: Mode,
) -> Result<Vec<u8>> {
    let block_size = CIPHER_BLOCK_SIZE as u64;
    let block_index = absolute_offset / block_size;
    let skip = (absolute_offset % block_size) as usize;
    let iv = advance_counter(base_iv, block_index);

    let mut padded = vec![0u8; skip + input.len()];
    padded[skip..].copy_from_slice(input);
    let out = ctr_crypt(&padded, key, &iv, mode)?;
    Ok(out[skip..].to_vec())
}

fn advance_counter(iv: &Iv, blocks: u64) -> Iv {
    let value = u128::from_be_bytes(*iv).wrapping_add(blocks as u128);
    value.to_be_bytes()
}

/// The raw hash bytes encoded in a `ContentID`'s hex part.
pub fn content_hash_bytes(id: &ContentID) -> Result<[u8; HASH_SIZE]> {
    let decoded = hex::decode(id.hex_part())
        .map_err(|_| Error::InvalidIdentifier(id.as_str().to_string()))?;
    if decoded.len() != HASH_SIZE {
        return Err(Error::InvalidIdentifier(id.as_str().to_string()));
    }
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&decoded);
    Ok(out)
}

/// The IV used for an index block: the trailing 16 bytes of its own content
/// hash, taken directly rather than via a hex round-trip since the caller
/// already has the raw digest.
pub fn iv_from_hash(digest: &[u8; HASH_SIZE]) -> Iv {
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&digest[HASH_SIZE - IV_SIZE..]);
    iv
}

/// HMAC-SHA256, used only to authenticate locally cached bytes -- never for
/// stored pack/index content.
pub fn hmac(bytes: &[u8], secret: &[u8]) -> [u8; HASH_SIZE] {
    let pkey = PKey::hmac(secret).expect("hmac key");
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey).expect("hmac signer");
    signer.update(bytes).expect("hmac update");
    let tag = signer.sign_to_vec().expect("hmac sign");
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&tag);
    out
}

/// A decrypted block is authentic iff `hash(decrypted)` ends with the IV
/// that was used to decrypt it.
pub fn verify_integrity(decrypted: &[u8], iv: &Iv) -> bool {
    let digest = hash(decrypted);
    digest[HASH_SIZE - CIPHER_BLOCK_SIZE..] == iv[..]
}

/// Derive the per-block IV from a `ContentID`'s trailing hex digits.
pub fn iv_from_content_id(id: &ContentID) -> Result<Iv> {
    iv_from_hex_tail(id.hex_part()).ok_or_else(|| Error::InvalidIdentifier(id.as_str().to_string()))
}

/// Derive the pack-wide IV (used only for format-version 0, legacy reads)
/// from a `PackFile` name: the hex before a `-` separator if present,
/// otherwise the hex tail of the whole name.
pub fn iv_from_pack_file(pack: &PackFile) -> Result<Iv> {
    let name = pack.as_str();
    let source = match name.find('-') {
        Some(idx) => &name[..idx],
        None => name,
    };
    iv_from_hex_tail(source).ok_or_else(|| Error::InvalidIdentifier(name.to_string()))
}

fn iv_from_hex_tail(hex_str: &str) -> Option<Iv> {
    let needed_hex_chars = IV_SIZE * 2;
    if hex_str.len() < needed_hex_chars {
        return None;
    }
    let tail = &hex_str[hex_str.len() - needed_hex_chars..];
    let bytes = hex::decode(tail).ok()?;
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&bytes);
    Some(iv)
}

/// Derive the per-block encryption key from the content hash (so the key
/// space and the identifier space share the same secret-free root -- any
/// additional secrecy comes from the repository-wide master key supplied by
/// the embedder via `CryptConfig`).
pub fn derive_block_key(master_key: &Key, content_hash: &[u8; HASH_SIZE]) -> Key {
    // HKDF-ish: HMAC(master_key, content_hash), truncated to the key size.
    let pkey = PKey::hmac(master_key).expect("hmac key");
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey).expect("hmac signer");
    signer.update(content_hash).expect("hmac update");
    let tag = signer.sign_to_vec().expect("hmac sign");
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&tag[..KEY_SIZE]);
    key
}
