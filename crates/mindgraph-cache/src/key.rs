use sha2::{Digest, Sha256};

/// Hex SHA-256 over the parts, separated by NUL so that `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
pub fn content_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Key for a single text embedded by a given model.
pub fn embedding_key(model: &str, text: &str) -> String {
    format!("emb_{}", content_hash(&[model, text]))
}

/// Key for an extraction scope described by several id sets. Each set is
/// sorted so the key does not depend on iteration order.
pub fn id_set_key(namespace: &str, sets: &[&[String]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    for set in sets {
        let mut ids: Vec<&str> = set.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        hasher.update(b"\x1e");
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\x1f");
        }
    }
    format!("{}_{:x}", namespace, hasher.finalize())
}
