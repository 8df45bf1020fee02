//! Random resource names and machine credentials.
//!
//! Cloud names must be unique per scope across repeated runs, so every generated name carries a
//! random alphanumeric suffix. Passwords satisfy the usual complexity rule of at least one
//! upper-case letter, lower-case letter, digit and symbol.

use rand::{Rng, distributions::Alphanumeric, seq::SliceRandom};

/// Longest name `random_name` will produce.
pub const MAX_NAME_LENGTH: usize = 24;
/// Suffix length used when the prefix leaves enough room.
const SUFFIX_LENGTH: usize = 8;
const PASSWORD_LENGTH: usize = 16;
const PASSWORD_SYMBOLS: &[u8] = b"!@#$%^&*()-_=+";

/// Appends a random lower-case alphanumeric suffix to `prefix`.
///
/// The result never exceeds [`MAX_NAME_LENGTH`]; long prefixes are truncated to keep at least a
/// short suffix.
pub fn random_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let prefix: String = prefix.chars().take(MAX_NAME_LENGTH - 4).collect();
    let suffix_length = SUFFIX_LENGTH.min(MAX_NAME_LENGTH - prefix.chars().count());
    let suffix: String = (0..suffix_length)
        .map(|_| rng.sample(Alphanumeric) as char)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{prefix}{suffix}")
}

/// Random RFC 4122 version 4 identifier, used for resources that must be named by GUID.
pub fn random_guid() -> String {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

/// Administrator user name for a new machine.
pub fn generate_username() -> String {
    random_name("tirekicker")
}

/// Administrator password for a new machine.
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    let mut characters: Vec<char> = vec![
        rng.gen_range(b'A'..=b'Z') as char,
        rng.gen_range(b'a'..=b'z') as char,
        rng.gen_range(b'0'..=b'9') as char,
        PASSWORD_SYMBOLS[rng.gen_range(0..PASSWORD_SYMBOLS.len())] as char,
    ];
    while characters.len() < PASSWORD_LENGTH {
        characters.push(rng.sample(Alphanumeric) as char);
    }
    characters.shuffle(&mut rng);
    characters.into_iter().collect()
}
