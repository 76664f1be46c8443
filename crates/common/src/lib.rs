//! Shared error plumbing and the secret-masking capability used across
//! switchyard crates.

pub mod error;
pub mod mask;

pub use {
    error::FromMessage,
    mask::{NoopMasker, SecretListMasker, SecretMasker, SharedMasker},
};
