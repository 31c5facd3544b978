//! Shared utilities.

pub mod mask;
pub mod mime;

pub use mask::mask_credentials;
pub use mime::{guess_content_type, ContentType};
