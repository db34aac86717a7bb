pub mod codec;
pub mod encryption;
pub mod signing;

pub use codec::{ChangeCodec, CodecError, SealedChangeCodec};
pub use encryption::{derive_group_key, random_bytes, EncryptionError};
pub use signing::{generate_keypair, sign_group_change, verify_group_change, SigningError};
