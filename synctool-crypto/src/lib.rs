//! Encryption layer for synctool.
//!
//! Every uploaded file is sealed under its own random [`FileSecret`] using a
//! chunked ChaCha20-Poly1305 stream, so files of any size can be encrypted to
//! a staging file and decrypted straight off a network stream without
//! buffering the whole object.
//!
//! Secrets are never derived from a password. They are generated per upload
//! and handed to a keyring; the only derived secrets are those of objects
//! stored under a published key (see [`FileSecret::derive_from_public_key`]).

mod error;
mod key;
pub mod stream;

pub use error::{CryptoError, CryptoResult};
pub use key::{FileSecret, SECRET_SIZE};
pub use stream::{
    decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, sealed_len, StreamDecryptor,
    StreamEncryptor, CHUNK_SIZE, HEADER_SIZE, SEALED_CHUNK_SIZE, TAG_SIZE,
};
