//! Cryptography for credential storage.

mod encryption;

pub use encryption::Encryptor;
