use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

fn noise() -> Option<&'static Regex> {
    static NOISE: OnceLock<Option<Regex>> = OnceLock::new();
    NOISE.get_or_init(|| Regex::new(r"(?m)#.*$|\s+").ok()).as_ref()
}

/// SHA-256 of `source` with comments and all whitespace removed, hex encoded.
///
/// Two sources that differ only in formatting or comments hash the same.
pub fn code_hash(source: &str) -> String {
    let cleaned = match noise() {
        Some(re) => re.replace_all(source, ""),
        None => source.split_whitespace().collect::<String>().into(),
    };
    hex::encode(Sha256::digest(cleaned.as_bytes()))
}
