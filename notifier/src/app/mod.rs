pub mod manager;
pub mod options;
pub mod run;
