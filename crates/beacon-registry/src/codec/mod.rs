//! Key and value encoding
//!
//! - `path`: maps (scheme, service, node) tuples to store keys
//! - `value`: maps node metadata to and from the stored payload

pub mod path;
pub mod value;

pub use path::{node_name_from_key, node_path, sanitize, service_path, SEPARATOR};
pub use value::{decode, encode};
