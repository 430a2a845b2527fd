use sha2::{Digest, Sha256};

const SANDBOX_PREFIX: &str = "sk-";
// 16 hex chars (64 bits): a namespacing prefix, not a security token.
const SANDBOX_HEX_LEN: usize = 16;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Derives a tenant's sandbox identifier: `"sk-"` plus the first 16 hex
/// characters of `SHA-256(tenant_id)`. Pure and stateless: recomputed
/// on every use, never persisted, so the derivation can change scope
/// without a migration.
pub fn derive_sandbox_id(tenant_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    let digest = hasher.finalize();

    let mut id = String::with_capacity(SANDBOX_PREFIX.len() + SANDBOX_HEX_LEN);
    id.push_str(SANDBOX_PREFIX);
    for byte in digest.iter().take(SANDBOX_HEX_LEN / 2) {
        id.push(HEX_CHARS[usize::from(byte >> 4)] as char);
        id.push(HEX_CHARS[usize::from(byte & 0x0f)] as char);
    }
    id
}
