pub mod chime;
pub mod countdown;
pub mod reloader;
pub mod store;
