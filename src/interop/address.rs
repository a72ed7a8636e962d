//! Native and external address codecs
//!
//! Native addresses are 34 bytes: a kind byte followed by 33 bytes of key
//! material, rendered as a one-letter kind prefix plus base58. Neo addresses
//! are base58check over a version byte and a 20-byte script hash.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub const NATIVE_ADDRESS_LEN: usize = 34;

const NEO_ADDRESS_VERSION: u8 = 0x17;
const PUSH_33: u8 = 0x21;
const CHECKSIG: u8 = 0xac;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    User = 1,
    System = 2,
    Interop = 3,
}

impl AddressKind {
    fn prefix(&self) -> char {
        match self {
            AddressKind::User => 'P',
            AddressKind::System => 'S',
            AddressKind::Interop => 'X',
        }
    }

    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'P' => Some(AddressKind::User),
            'S' => Some(AddressKind::System),
            'X' => Some(AddressKind::Interop),
            _ => None,
        }
    }
}

fn encode_native(bytes: &[u8; NATIVE_ADDRESS_LEN]) -> String {
    let kind = match bytes[0] {
        1 => AddressKind::User,
        2 => AddressKind::System,
        _ => AddressKind::Interop,
    };
    format!("{}{}", kind.prefix(), bs58::encode(bytes).into_string())
}

/// Decode native address text into its raw bytes
pub fn decode_native(text: &str) -> Option<[u8; NATIVE_ADDRESS_LEN]> {
    let mut chars = text.chars();
    let kind = AddressKind::from_prefix(chars.next()?)?;
    let bytes = bs58::decode(chars.as_str()).into_vec().ok()?;
    if bytes.len() != NATIVE_ADDRESS_LEN || bytes[0] != kind as u8 {
        return None;
    }
    let mut out = [0u8; NATIVE_ADDRESS_LEN];
    out.copy_from_slice(&bytes);
    Some(out)
}

pub fn is_valid_native(text: &str) -> bool {
    decode_native(text).is_some()
}

/// User address owned by a public key (33-byte compressed or 32-byte raw)
pub fn native_from_public_key(public_key: &[u8]) -> Option<String> {
    let key_len = NATIVE_ADDRESS_LEN - 1;
    if public_key.is_empty() || public_key.len() > key_len {
        return None;
    }
    let mut bytes = [0u8; NATIVE_ADDRESS_LEN];
    bytes[0] = AddressKind::User as u8;
    bytes[NATIVE_ADDRESS_LEN - public_key.len()..].copy_from_slice(public_key);
    Some(encode_native(&bytes))
}

/// Interop address standing in for an external account on `platform_id`
pub fn native_from_interop(platform_id: u8, external: &[u8]) -> String {
    let mut bytes = [0u8; NATIVE_ADDRESS_LEN];
    bytes[0] = AddressKind::Interop as u8;
    bytes[1] = platform_id;
    let len = external.len().min(NATIVE_ADDRESS_LEN - 2);
    bytes[2..2 + len].copy_from_slice(&external[..len]);
    encode_native(&bytes)
}

/// Standard single-signature verification script
pub fn neo_verification_script(public_key: &[u8; 33]) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    script.push(PUSH_33);
    script.extend_from_slice(public_key);
    script.push(CHECKSIG);
    script
}

/// Extract the public key of a standard single-signature verification script
pub fn neo_public_key_from_script(script: &[u8]) -> Option<[u8; 33]> {
    if script.len() != 35 || script[0] != PUSH_33 || script[34] != CHECKSIG {
        return None;
    }
    let mut key = [0u8; 33];
    key.copy_from_slice(&script[1..34]);
    Some(key)
}

pub fn neo_script_hash(script: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(script);
    let digest = Ripemd160::digest(sha);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    hash
}

pub fn neo_address_from_script_hash(hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(NEO_ADDRESS_VERSION);
    payload.extend_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

pub fn neo_script_hash_from_address(address: &str) -> Option<[u8; 20]> {
    let payload = bs58::decode(address).with_check(None).into_vec().ok()?;
    if payload.len() != 21 || payload[0] != NEO_ADDRESS_VERSION {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Some(hash)
}

pub fn neo_address_from_public_key(public_key: &[u8; 33]) -> String {
    neo_address_from_script_hash(&neo_script_hash(&neo_verification_script(public_key)))
}
