//! Correlation token generation.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Generate a random alphanumeric correlation token of `len` characters.
///
/// Uniqueness among live exchanges is enforced by the registry, which
/// rejects a token that is already registered.
pub fn generate(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
