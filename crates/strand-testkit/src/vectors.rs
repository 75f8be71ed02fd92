//! Golden test vectors for deterministic verification.
//!
//! Every implementation must produce identical domain and snapshot hashes
//! for these inputs, and the same address for the fixed key.

use strand_core::{domain_hash, snapshot_hash, Keypair, StreamKind};

/// A golden hash vector.
#[derive(Debug, Clone)]
pub struct HashVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub input: Vec<u8>,
    /// Expected `domain_hash(input)`, 0x-prefixed hex.
    pub domain_hash: &'static str,
    /// Expected `snapshot_hash(input)`, 0x-prefixed hex.
    pub snapshot_hash: &'static str,
}

/// Secret scalar 1 and the address it controls.
pub const ADDRESS_VECTOR: ([u8; 32], &str) = (
    {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        secret
    },
    "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf",
);

/// First id byte of each stream kind.
pub const STREAM_KIND_PREFIXES: [(StreamKind, u8); 5] = [
    (StreamKind::User, 0xa8),
    (StreamKind::Space, 0x10),
    (StreamKind::Channel, 0x20),
    (StreamKind::Dm, 0x88),
    (StreamKind::Gdm, 0x77),
];

/// Get all golden hash vectors.
pub fn all_vectors() -> Vec<HashVector> {
    vec![
        HashVector {
            name: "empty",
            input: Vec::new(),
            domain_hash: "0xb8708b7c9869887f0b0b7e8b12954b683c0c74796d93b94e90da87cacd303030",
            snapshot_hash: "0x754f5b4c694b277dd5b8c01b414c0327114293643482083834514b93a63bcffa",
        },
        HashVector {
            name: "hello",
            input: b"hello".to_vec(),
            domain_hash: "0x31819ac309b1248649eb311f437797ef74121e0322a27cc0618c7ccbae730072",
            snapshot_hash: "0xfaae1cd30a46d527e5f2b793aec0c79c34aeeb9e9378d41477eb4c97584e9e86",
        },
        HashVector {
            name: "bytes 0..32",
            input: (0u8..32).collect(),
            domain_hash: "0xbbb64506abead98ef0e52c10791901673145c302a21b457a0d02dc9857d4a4ab",
            snapshot_hash: "0xd70f3c1acc30e6aa5ce1db4d0c74d40c570b6e049c7e0c79852559351d33c3a1",
        },
        HashVector {
            name: "Hello, World!",
            input: b"Hello, World!".to_vec(),
            domain_hash: "0xc6252c41c99028ea8600a2d9818d8dcfdf13ab69f9d4df54cbc1d1ed1a475592",
            snapshot_hash: "0xaa9c9da6dba0ec7e68e3648bc4818576cec7e1c2dc8be44820523313a06574bf",
        },
    ]
}

/// Check every vector against this implementation.
///
/// Returns each vector's name and whether both hashes matched.
pub fn verify_all_vectors() -> Vec<(String, bool)> {
    all_vectors()
        .iter()
        .map(|v| {
            let matches = domain_hash(&v.input).to_hex() == v.domain_hash
                && snapshot_hash(&v.input).to_hex() == v.snapshot_hash;
            (v.name.to_string(), matches)
        })
        .collect()
}

/// Address derived from [`ADDRESS_VECTOR`]'s secret.
pub fn address_vector_matches() -> bool {
    let (secret, expected) = ADDRESS_VECTOR;
    Keypair::from_secret_bytes(&secret)
        .map(|kp| kp.address().to_hex() == expected)
        .unwrap_or(false)
}
