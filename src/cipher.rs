use std::fmt;

/// Symmetric encryption shared with the gateway.
///
/// Key derivation and cipher mode differ per device family and are the
/// implementor's business; the connectors only need the two directions.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    fn decrypt(&self, ciphertext: &str) -> std::result::Result<String, DecryptError>;
}

/// The payload could not be turned back into text, usually a wrong key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptError(pub String);

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decryption failed: {}", self.0)
    }
}

impl std::error::Error for DecryptError {}

impl<C: Cipher + ?Sized> Cipher for std::sync::Arc<C> {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        (**self).encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> std::result::Result<String, DecryptError> {
        (**self).decrypt(ciphertext)
    }
}
