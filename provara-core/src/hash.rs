//! SHA-256 primitives and the binary Merkle tree over manifest leaves.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

const FILE_CHUNK_SIZE: usize = 1 << 20;

/// SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

/// Lower-hex SHA-256 of an in-memory byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_bytes(data))
}

/// Lower-hex SHA-256 of a file's contents, read in chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Binary Merkle root over ordered leaf byte-slices, as 64-char lower hex.
///
/// `leaf_hash = SHA-256(leaf_bytes)`, `parent = SHA-256(left || right)`. An
/// odd node at any level is paired with itself. The empty leaf set hashes to
/// `SHA-256("")`.
pub fn merkle_root_hex<L: AsRef<[u8]>>(leaves: &[L]) -> String {
    if leaves.is_empty() {
        return sha256_hex(b"");
    }

    let mut level: Vec<[u8; 32]> = leaves.iter().map(|l| sha256_bytes(l.as_ref())).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(&pair[0]);
            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            let digest = hasher.finalize();
            let mut parent = [0u8; 32];
            parent.copy_from_slice(&digest);
            next.push(parent);
        }
        level = next;
    }
    hex::encode(level[0])
}

/// Merkle root over manifest file entries: each leaf is the canonical bytes
/// of one entry, and entries are sorted by `path` before hashing.
pub fn merkle_root_from_entries(entries: &[Value]) -> Result<String> {
    let mut sorted: Vec<&Value> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        let path_a = a.get("path").and_then(Value::as_str).unwrap_or("");
        let path_b = b.get("path").and_then(Value::as_str).unwrap_or("");
        path_a.cmp(path_b)
    });

    let mut leaves = Vec::with_capacity(sorted.len());
    for entry in sorted {
        leaves.push(jcs_rs::canonicalize(entry)?);
    }
    Ok(merkle_root_hex(&leaves))
}

/// True for a 64-char lower-hex SHA-256 digest.
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn empty_leaf_set_is_empty_string_hash() {
        let leaves: Vec<Vec<u8>> = Vec::new();
        assert_eq!(merkle_root_hex(&leaves), EMPTY_SHA256);
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
    }

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let root = merkle_root_hex(&[b"leaf".to_vec()]);
        assert_eq!(root, sha256_hex(b"leaf"));
    }

    #[test]
    fn odd_leaf_duplicates_last() {
        // With three leaves the third pairs with itself at the first level.
        let leaves = [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let ha = sha256_bytes(b"a");
        let hb = sha256_bytes(b"b");
        let hc = sha256_bytes(b"c");

        let mut cat = Vec::new();
        cat.extend_from_slice(&ha);
        cat.extend_from_slice(&hb);
        let p_ab = sha256_bytes(&cat);

        cat.clear();
        cat.extend_from_slice(&hc);
        cat.extend_from_slice(&hc);
        let p_cc = sha256_bytes(&cat);

        cat.clear();
        cat.extend_from_slice(&p_ab);
        cat.extend_from_slice(&p_cc);
        let expected = hex::encode(sha256_bytes(&cat));

        assert_eq!(merkle_root_hex(&leaves), expected);
    }

    #[test]
    fn five_leaves_match_oracle() {
        // Manual reduction: [a b c d e] -> [ab cd ee] -> [abcd eeee] -> root.
        let leaves: Vec<Vec<u8>> = [b"a", b"b", b"c", b"d", b"e"]
            .iter()
            .map(|l| l.to_vec())
            .collect();
        let h: Vec<[u8; 32]> = leaves.iter().map(|l| sha256_bytes(l)).collect();
        let pair = |l: &[u8; 32], r: &[u8; 32]| {
            let mut cat = Vec::with_capacity(64);
            cat.extend_from_slice(l);
            cat.extend_from_slice(r);
            sha256_bytes(&cat)
        };
        let ab = pair(&h[0], &h[1]);
        let cd = pair(&h[2], &h[3]);
        let ee = pair(&h[4], &h[4]);
        let abcd = pair(&ab, &cd);
        let eeee = pair(&ee, &ee);
        let expected = hex::encode(pair(&abcd, &eeee));

        assert_eq!(merkle_root_hex(&leaves), expected);
    }

    #[test]
    fn entry_root_matches_reference_vector() {
        let entries = vec![
            json!({
                "path": "a.txt",
                "sha256": "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 0
            }),
            json!({
                "path": "b.txt",
                "sha256": "315f5bdb76d078c43b8ac00c33e22F06d20353842d059013e96196a84f33161",
                "size": 1
            }),
        ];
        let root = merkle_root_from_entries(&entries).unwrap();
        assert_eq!(
            root,
            "fa577a0bb290df978337de3342ebc17fcd3ad261f9ece7ce41622c36ccc2ed03"
        );
    }

    #[test]
    fn entry_order_is_normalized_by_path() {
        let a = json!({"path": "x", "sha256": "0", "size": 1});
        let b = json!({"path": "y", "sha256": "1", "size": 2});
        let fwd = merkle_root_from_entries(&[a.clone(), b.clone()]).unwrap();
        let rev = merkle_root_from_entries(&[b, a]).unwrap();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn digest_format_check() {
        assert!(is_hex_digest(EMPTY_SHA256));
        assert!(!is_hex_digest("abc"));
        assert!(!is_hex_digest(&EMPTY_SHA256.to_uppercase()));
    }
}
