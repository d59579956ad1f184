//! Seeded test ordering with package buckets.
//!
//! Tests are grouped by the package that contains their module. Packages keep
//! their first-appearance order; tests inside a package are reordered by a
//! seeded hash, so the same seed always yields the same order and no test is
//! ever moved across a package boundary.

use sha2::{Digest, Sha256};

/// Package bucket of a test id.
///
/// Path-style node ids (`tests/sub/test_x.py::TestA::test_b`) bucket by the
/// module's directory. Dotted ids (`pkg.sub.test_x.TestA.test_b`) bucket by
/// everything before the first `test_` component.
pub fn package_of(test_id: &str) -> &str {
    let module = test_id.split("::").next().unwrap_or(test_id);
    if module.contains('/') {
        return module.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    }
    let parts: Vec<&str> = module.split('.').collect();
    match parts.iter().position(|p| p.starts_with("test_")) {
        Some(0) | None => "",
        Some(i) => {
            let len: usize = parts[..i].iter().map(|p| p.len()).sum::<usize>() + (i - 1);
            &module[..len]
        }
    }
}

/// Derive a shuffle seed from an arbitrary build identifier.
pub fn derive_seed(build_id: &str) -> u64 {
    let digest = Sha256::digest(build_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn sort_key(seed: u64, test_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(test_id.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Reorder `test_ids` within package buckets.
pub fn bucket_shuffle<S: AsRef<str>>(test_ids: &[S], seed: u64) -> Vec<String> {
    let mut buckets: Vec<(&str, Vec<&str>)> = Vec::new();
    for id in test_ids {
        let id = id.as_ref();
        let package = package_of(id);
        match buckets.iter_mut().find(|(p, _)| *p == package) {
            Some((_, members)) => members.push(id),
            None => buckets.push((package, vec![id])),
        }
    }

    let mut out = Vec::with_capacity(test_ids.len());
    for (_, mut members) in buckets {
        members.sort_by_cached_key(|id| sort_key(seed, id));
        out.extend(members.into_iter().map(str::to_string));
    }
    out
}
