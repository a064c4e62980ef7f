pub mod device;
pub mod server;
pub mod watchdog;
