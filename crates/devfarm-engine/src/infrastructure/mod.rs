//! Infrastructure adapters: host tools, scrcpy sockets, screenshots, config
//! files.

pub mod adb;
pub mod capture;
pub mod scrcpy;
pub mod simctl;
pub mod storage;
pub mod tools;
