pub mod commands;
pub mod device;
pub mod error;
pub mod fence;
pub mod hal;
