pub mod media_entry;
pub mod media_key;

pub use media_entry::*;
pub use media_key::*;
