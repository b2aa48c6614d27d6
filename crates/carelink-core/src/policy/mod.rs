//! Data-handling policies applied before records leave the device.

mod encryption;

pub use encryption::{FieldCipher, FieldEncryptionPolicy};
