//! Admin gate contract.

/// Decides whether a presented secret unlocks administrative operations
/// (renaming, re-keying, photo replacement, deletion, listing).
pub trait AdminGate: Send + Sync {
    fn authenticate(&self, secret: &str) -> bool;
}

/// Gate that refuses every secret. Used when no credential is configured.
pub struct DenyAll;

impl AdminGate for DenyAll {
    fn authenticate(&self, _secret: &str) -> bool {
        false
    }
}
