//! Name hashing (spec.md 2 component 10, 4.11): NFD decomposition + optional
//! case fold + CRC32C -> 22-bit directory-entry hash.
//!
//! Grounded on the teacher's `da_btree.rs::hashname` (a directory-name hash
//! feeding tree lookups) generalized from XFS's rotate-left hash to APFS's
//! Unicode-aware pipeline, and `sb.rs`'s `CRC_32_ISCSI` table (same crate,
//! same algorithm, reused verbatim for the final mix).

use crc::{Crc, CRC_32_ISCSI};
use unicode_normalization::UnicodeNormalization;

use crate::libapfs::error::{Error, Result};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const HASH_MASK: u32 = 0x003F_FFFF;

/// Decode `name`, apply NFD (and case fold, if `case_insensitive`), and
/// return the resulting codepoint sequence (spec.md 4.11 steps 1-3). Shared
/// between hashing and name comparison so both use identical normalization.
pub fn normalize(name: &str, case_insensitive: bool) -> Vec<char> {
    if case_insensitive {
        name.nfd().flat_map(|c| c.to_lowercase()).nfd().collect()
    } else {
        name.nfd().collect()
    }
}

/// `name_hash` (spec.md 4.11): NFD-normalize, optionally case-fold, encode
/// each codepoint as a little-endian u32 word, and CRC32C the result with a
/// `!0` seed; return the low 22 bits of the raw running register.
///
/// `CRC_32_ISCSI` carries `xorout = 0xFFFF_FFFF`, so `finalize()` hands back
/// the bitwise complement of the register the original keeps chaining
/// (`apfshash.cpp::GetNameHash`'s `hash = ~0u; hash = crc32c(hash, …)`, no
/// final complement). Un-complementing before masking is what makes
/// `name_hash("root", false) == 0x2D9C79` match the on-disk value.
pub fn name_hash(name: &str, case_insensitive: bool) -> u32 {
    let codepoints = normalize(name, case_insensitive);
    let mut digest = CASTAGNOLI.digest();
    for c in codepoints {
        digest.update(&(c as u32).to_le_bytes());
    }
    (digest.finalize() ^ 0xFFFF_FFFF) & HASH_MASK
}

/// Validate a name is well-formed UTF-8 with no interior NUL (spec.md
/// 4.11 step 1's `BadName` condition), then hash it.
pub fn hash_validated(name: &str, case_insensitive: bool) -> Result<u32> {
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(Error::BadParams(format!("invalid directory entry name {name:?}")));
    }
    Ok(name_hash(name, case_insensitive))
}

/// Name comparison for collision resolution (spec.md 4.11): compare the
/// normalized codepoint sequences, not the raw UTF-8 bytes.
pub fn names_equal(a: &str, b: &str, case_insensitive: bool) -> bool {
    normalize(a, case_insensitive) == normalize(b, case_insensitive)
}
