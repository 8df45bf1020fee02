pub mod env;
pub mod naming;
pub mod redaction;

pub use env::{EnvError, optional_env, required_env};
pub use naming::{generate_password, generate_username, random_guid, random_name};
pub use redaction::redact_sensitive;
