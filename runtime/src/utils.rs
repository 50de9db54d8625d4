use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex sha256 of `content` with a namespace prefix, e.g. `result-1f3a...`.
pub fn compute_hash_id(content: &[u8], prefix: &str) -> String {
    let digest = Sha256::digest(content);
    let mut hex = String::with_capacity(prefix.len() + digest.len() * 2);
    hex.push_str(prefix);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

pub fn generate_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

/// Keeps the tail of noisy tool output so error messages stay readable.
pub fn truncate_tail(input: &str, max_chars: usize) -> String {
    let trimmed = input.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - max_chars).collect();
    format!("…{tail}")
}
