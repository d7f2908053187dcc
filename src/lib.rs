pub mod cla;
pub mod config;
pub mod errors;
pub mod logging;
