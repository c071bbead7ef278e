//! Wire models shared by the update notifier and its backend

pub mod models;
