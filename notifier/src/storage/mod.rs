pub mod kv;
pub mod layout;
pub mod settings;
