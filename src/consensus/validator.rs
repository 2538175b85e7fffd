//! Inbound hash validation

use crate::error::{Error, Result};

/// Longest accepted hash, in hex characters
pub const MAX_HASH_LEN: usize = 128;

/// Accept non-empty hex digests of even length
pub fn check_hash(hash: &str) -> Result<()> {
    if hash.is_empty() || hash.len() > MAX_HASH_LEN {
        return Err(Error::Validation(format!(
            "hash must be 1..={} hex characters",
            MAX_HASH_LEN
        )));
    }
    hex::decode(hash).map_err(|e| Error::Validation(format!("invalid hash {}: {}", hash, e)))?;
    Ok(())
}
