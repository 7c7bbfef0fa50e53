pub mod kdf;
pub mod nonce;
