pub mod cli;
pub mod cursor;
pub mod logging;
pub mod settings;
pub mod store;
pub mod watch;
pub mod writeback;
