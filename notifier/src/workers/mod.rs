pub mod dispatcher;
pub mod poller;
pub mod relay;
