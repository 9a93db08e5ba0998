//! `secretkeeper keygen`: print a random key.

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::crypto::encryption::check_key_size;
use crate::errors::Result;

/// Generate `length` random alphanumeric characters.
pub fn generate(length: usize) -> Result<String> {
    check_key_size(length)?;
    Ok(rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect())
}

/// Execute the `keygen` command.
pub fn execute(length: usize) -> Result<()> {
    println!("{}", generate(length)?);
    Ok(())
}
