//! PDF standard security handler - decryption support
//!
//! Implements key derivation and string/stream decryption for the standard
//! security handler, V 1-4 (RC4 40/128-bit and AES-128/CBC). The rest of
//! the crate consumes this through `Document::decrypt_string` and
//! `decrypt_stream_bytes`; both are no-ops until encryption has been
//! initialized, which keeps the `/Encrypt` dictionary itself readable.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::object::ObjGen;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// PDF password padding (ISO 32000-1, 7.6.3.3)
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

/// Per-class crypt filter method (V4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptFilterMethod {
    /// No transformation
    Identity,
    /// RC4 with the object key
    Rc4,
    /// AES-128 in CBC mode with a per-string/stream IV
    Aesv2,
}

/// Encryption state of a document
#[derive(Debug, Clone)]
pub struct EncryptionParameters {
    pub encrypted: bool,
    pub initialized: bool,
    pub v: i64,
    pub r: i64,
    pub p: u32,
    /// File key length in bytes
    pub key_length: usize,
    pub encrypt_metadata: bool,
    pub cf_stream: CryptFilterMethod,
    pub cf_string: CryptFilterMethod,
    pub cf_file: CryptFilterMethod,
    pub user_password_matched: bool,
    pub owner_password_matched: bool,
    pub(crate) provided_password: Vec<u8>,
    pub(crate) key: Vec<u8>,
}

impl Default for EncryptionParameters {
    fn default() -> Self {
        Self {
            encrypted: false,
            initialized: false,
            v: 0,
            r: 0,
            p: 0,
            key_length: 5,
            encrypt_metadata: true,
            cf_stream: CryptFilterMethod::Rc4,
            cf_string: CryptFilterMethod::Rc4,
            cf_file: CryptFilterMethod::Rc4,
            user_password_matched: false,
            owner_password_matched: false,
            provided_password: Vec::new(),
            key: Vec::new(),
        }
    }
}

// ============================================================================
// Primitives
// ============================================================================

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let n = password.len().min(32);
    padded[..n].copy_from_slice(&password[..n]);
    padded[n..].copy_from_slice(&PADDING[..32 - n]);
    padded
}

/// RC4 stream cipher; encryption and decryption are the same operation
fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: Vec<u8> = (0..=255).collect();
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let mut result = Vec::with_capacity(data.len());
    let mut i: u8 = 0;
    let mut j: u8 = 0;
    for &byte in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        result.push(byte ^ k);
    }
    result
}

/// File encryption key (Algorithm 2)
pub(crate) fn compute_file_key(
    password: &[u8],
    o_value: &[u8],
    p: u32,
    id1: &[u8],
    r: i64,
    key_length: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(o_value);
    hasher.update(p.to_le_bytes());
    hasher.update(id1);
    if r >= 4 && !encrypt_metadata {
        hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }
    let mut key = hasher.finalize().to_vec();
    if r >= 3 {
        for _ in 0..50 {
            let mut h = Md5::new();
            h.update(&key[..key_length]);
            key = h.finalize().to_vec();
        }
    }
    key.truncate(key_length);
    key
}

/// Expected `/U` check bytes for a file key (Algorithms 4 and 5)
pub(crate) fn compute_user_check(key: &[u8], r: i64, id1: &[u8]) -> Vec<u8> {
    if r == 2 {
        return rc4(key, &PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(id1);
    let hash = hasher.finalize();
    let mut data = rc4(key, &hash);
    for i in 1..=19u8 {
        let pass: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        data = rc4(&pass, &data);
    }
    data
}

/// Recover the user password from the owner password (Algorithm 7)
pub(crate) fn recover_user_password(
    owner_password: &[u8],
    o_value: &[u8],
    r: i64,
    key_length: usize,
) -> Vec<u8> {
    let mut key = Md5::digest(pad_password(owner_password)).to_vec();
    if r >= 3 {
        for _ in 0..50 {
            key = Md5::digest(&key[..]).to_vec();
        }
    }
    key.truncate(key_length);

    if r == 2 {
        rc4(&key, o_value)
    } else {
        let mut data = o_value.to_vec();
        for i in (0..=19u8).rev() {
            let pass: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            data = rc4(&pass, &data);
        }
        data
    }
}

/// Per-object key: md5 of the file key, the low object/generation bytes,
/// and the AES salt when applicable
fn compute_object_key(file_key: &[u8], og: ObjGen, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(&og.obj.to_le_bytes()[..3]);
    hasher.update(&(og.generation as u32).to_le_bytes()[..2]);
    if aes {
        hasher.update(b"sAlT");
    }
    let hash = hasher.finalize();
    let len = (file_key.len() + 5).min(16);
    hash[..len].to_vec()
}

fn decrypt_aes_cbc(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < 16 || (data.len() - 16) % 16 != 0 {
        return Err(Error::logic("AES-encrypted data has invalid length"));
    }
    let (iv, body) = data.split_at(16);
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| Error::logic(format!("AES key/IV error: {e:?}")))?;
    let mut buf = body.to_vec();
    let plain = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| Error::logic(format!("AES decryption error: {e:?}")))?;
    Ok(plain.to_vec())
}

/// Decrypt `data` belonging to object `og` with the given method
pub(crate) fn decrypt_bytes(
    encp: &EncryptionParameters,
    data: Vec<u8>,
    og: ObjGen,
    method: CryptFilterMethod,
) -> Result<Vec<u8>> {
    if !encp.encrypted || !encp.initialized {
        return Ok(data);
    }
    match method {
        CryptFilterMethod::Identity => Ok(data),
        CryptFilterMethod::Rc4 => {
            let key = compute_object_key(&encp.key, og, false);
            Ok(rc4(&key, &data))
        }
        CryptFilterMethod::Aesv2 => {
            let key = compute_object_key(&encp.key, og, true);
            decrypt_aes_cbc(&key, &data)
        }
    }
}

/// Decrypt raw stream bytes with the document's stream crypt filter
pub(crate) fn decrypt_stream_bytes(
    encp: &EncryptionParameters,
    data: Vec<u8>,
    og: ObjGen,
) -> Result<Vec<u8>> {
    decrypt_bytes(encp, data, og, encp.cf_stream)
}

fn hex_decode(text: &[u8]) -> Option<Vec<u8>> {
    fn val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }
    if text.len() % 2 != 0 {
        return None;
    }
    text.chunks(2)
        .map(|pair| Some(val(pair[0])? * 16 + val(pair[1])?))
        .collect()
}

// ============================================================================
// Document-level initialization
// ============================================================================

impl Document {
    /// Read `/Encrypt` and derive the file key, verifying the password
    pub(crate) fn initialize_encryption(&self) -> Result<()> {
        let trailer = self.trailer();
        let encrypt = trailer.get_key("Encrypt");
        if encrypt.is_null() {
            return Ok(());
        }
        if !encrypt.is_dictionary() {
            return Err(self.damaged_pdf("/Encrypt dictionary is not a dictionary"));
        }
        if !encrypt.get_key("Filter").is_name_equal("Standard") {
            return Err(Error::unsupported(
                "only the standard security handler is supported",
            ));
        }

        let mut encp = EncryptionParameters {
            encrypted: true,
            v: encrypt.get_key("V").as_int().unwrap_or(0),
            r: encrypt.get_key("R").as_int().unwrap_or(0),
            p: encrypt.get_key("P").as_int().unwrap_or(0) as i32 as u32,
            encrypt_metadata: encrypt
                .get_key("EncryptMetadata")
                .as_bool()
                .unwrap_or(true),
            ..Default::default()
        };
        if encp.v >= 5 {
            return Err(Error::unsupported(
                "AES-256 (V5/R6) encryption is not supported",
            ));
        }
        let length_bits = encrypt.get_key("Length").as_int().unwrap_or(40);
        encp.key_length = (length_bits / 8).clamp(5, 16) as usize;

        let o_value = encrypt
            .get_key("O")
            .as_string()
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| self.damaged_pdf("/Encrypt dictionary is missing /O"))?;
        let u_value = encrypt
            .get_key("U")
            .as_string()
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| self.damaged_pdf("/Encrypt dictionary is missing /U"))?;

        if encp.v == 4 {
            let cf = encrypt.get_key("CF");
            let method_of = |name: Handle| -> CryptFilterMethod {
                // an absent /StmF or /StrF means /Identity
                let filter = match name.as_name() {
                    Some(n) if n.as_str() == "Identity" => return CryptFilterMethod::Identity,
                    Some(n) => cf.get_key(n.as_str()),
                    None => return CryptFilterMethod::Identity,
                };
                match filter.get_key("CFM").as_name() {
                    Some(m) if m.as_str() == "AESV2" => CryptFilterMethod::Aesv2,
                    Some(m) if m.as_str() == "V2" => CryptFilterMethod::Rc4,
                    _ => CryptFilterMethod::Identity,
                }
            };
            encp.cf_stream = method_of(encrypt.get_key("StmF"));
            encp.cf_string = method_of(encrypt.get_key("StrF"));
            encp.cf_file = encp.cf_stream;
        }

        let id1 = trailer
            .get_key("ID")
            .array_item(0)
            .as_string()
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default();

        let provided = self.provided_password();
        if self.password_is_hex_key() {
            encp.key = hex_decode(&provided)
                .ok_or_else(|| Error::logic("supplied password is not a valid hex key"))?;
        } else {
            let user_key = compute_file_key(
                &provided,
                &o_value,
                encp.p,
                &id1,
                encp.r,
                encp.key_length,
                encp.encrypt_metadata,
            );
            if check_user_key(&user_key, &u_value, encp.r, &id1) {
                encp.user_password_matched = true;
                encp.key = user_key;
            } else {
                let recovered =
                    recover_user_password(&provided, &o_value, encp.r, encp.key_length);
                let owner_key = compute_file_key(
                    &recovered,
                    &o_value,
                    encp.p,
                    &id1,
                    encp.r,
                    encp.key_length,
                    encp.encrypt_metadata,
                );
                if check_user_key(&owner_key, &u_value, encp.r, &id1) {
                    encp.owner_password_matched = true;
                    encp.key = owner_key;
                } else {
                    return Err(Error::Password);
                }
            }
        }
        encp.provided_password = provided;
        encp.initialized = true;
        self.install_encryption(encp);
        Ok(())
    }

    /// Decrypt a string belonging to object `og`; no-op when the document
    /// is not encrypted or encryption is not yet initialized
    pub(crate) fn decrypt_string(&self, data: Vec<u8>, og: ObjGen) -> Result<Vec<u8>> {
        let encp = self.encryption_parameters();
        let method = if encp.v >= 4 {
            encp.cf_string
        } else {
            CryptFilterMethod::Rc4
        };
        decrypt_bytes(&encp, data, og, method)
    }
}

fn check_user_key(key: &[u8], u_value: &[u8], r: i64, id1: &[u8]) -> bool {
    let expected = compute_user_check(key, r, id1);
    if r >= 3 {
        u_value.len() >= 16 && expected[..16] == u_value[..16]
    } else {
        expected == u_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_password() {
        let padded = pad_password(b"user");
        assert_eq!(&padded[..4], b"user");
        assert_eq!(&padded[4..], &PADDING[..28]);
        assert_eq!(pad_password(b""), PADDING);
    }

    #[test]
    fn test_rc4_symmetric() {
        let key = b"secret key";
        let plain = b"attack at dawn";
        let cipher = rc4(key, plain);
        assert_ne!(cipher.as_slice(), plain.as_slice());
        assert_eq!(rc4(key, &cipher), plain);
    }

    #[test]
    fn test_file_key_deterministic() {
        let o = [7u8; 32];
        let k1 = compute_file_key(b"pw", &o, 0xFFFF_FFFC, b"id", 3, 16, true);
        let k2 = compute_file_key(b"pw", &o, 0xFFFF_FFFC, b"id", 3, 16, true);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
        let k3 = compute_file_key(b"other", &o, 0xFFFF_FFFC, b"id", 3, 16, true);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_object_key_length() {
        let file_key = vec![1u8; 5];
        assert_eq!(
            compute_object_key(&file_key, ObjGen::new(1, 0), false).len(),
            10
        );
        let file_key = vec![1u8; 16];
        assert_eq!(
            compute_object_key(&file_key, ObjGen::new(1, 0), false).len(),
            16
        );
    }

    #[test]
    fn test_object_key_varies_by_object() {
        let file_key = vec![9u8; 16];
        let k1 = compute_object_key(&file_key, ObjGen::new(1, 0), false);
        let k2 = compute_object_key(&file_key, ObjGen::new(2, 0), false);
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_owner_recovery_roundtrip_r2() {
        // construct an O value the way a writer would, then recover
        let owner_pw = b"owner";
        let user_pw = b"user";
        let mut key = Md5::digest(pad_password(owner_pw)).to_vec();
        key.truncate(5);
        let o_value = rc4(&key, &pad_password(user_pw));
        let recovered = recover_user_password(owner_pw, &o_value, 2, 5);
        assert_eq!(recovered, pad_password(user_pw));
    }

    #[test]
    fn test_decrypt_passthrough_when_uninitialized() {
        let encp = EncryptionParameters::default();
        let data = b"plain".to_vec();
        let out =
            decrypt_bytes(&encp, data.clone(), ObjGen::new(1, 0), CryptFilterMethod::Rc4).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_aes_invalid_length() {
        assert!(decrypt_aes_cbc(&[0u8; 16], &[1, 2, 3]).is_err());
        assert_eq!(decrypt_aes_cbc(&[0u8; 16], &[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_hex_decode() {
        assert_eq!(hex_decode(b"0aFF").unwrap(), vec![0x0a, 0xff]);
        assert!(hex_decode(b"0aF").is_none());
        assert!(hex_decode(b"zz").is_none());
    }
}
