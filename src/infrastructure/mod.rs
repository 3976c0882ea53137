pub mod dispatcher;
pub mod logging;
pub mod monitor;
pub mod platform;
pub mod receiver;
pub mod transport;
