//! Shared fixtures for unit tests.

use std::sync::OnceLock;

use crate::keygen::{self, KeyMaterial};
use crate::types::{CaProfile, Passphrase, SubjectName};

const CACHED_KEYS: usize = 3;

/// Returns one of a few cached 2048-bit keys; RSA generation is slow.
pub fn test_key(index: usize) -> KeyMaterial {
    static KEYS: OnceLock<Vec<KeyMaterial>> = OnceLock::new();
    let keys = KEYS.get_or_init(|| {
        (0..CACHED_KEYS)
            .map(|_| keygen::generate(2048, &Passphrase::new("test-pass")).expect("keygen"))
            .collect()
    });
    keys[index % CACHED_KEYS].clone()
}

/// Builds a profile with a complete subject.
pub fn profile(common_name: &str, days: i64) -> CaProfile {
    CaProfile::new(
        SubjectName {
            country: "DE".into(),
            state: "Berlin".into(),
            locality: "Berlin".into(),
            organization: "Forge Test".into(),
            common_name: common_name.into(),
        },
        days,
        Passphrase::new("test-pass"),
    )
}
