use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;
use stakd_consensus::Hash256;

fn to_array<const N: usize>(digest: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}

pub fn sha256(data: &[u8]) -> Hash256 {
    to_array(&Sha256::digest(data))
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    to_array(&Sha256::digest(Sha256::digest(data)))
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    to_array(&Ripemd160::digest(sha256(data)))
}

/// Hash of two concatenated hashes, as used by merkle trees.
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}
