//! Per chunk persistent stores of placed blocks and their plugin metadata.

pub mod util;
pub mod config;

pub mod loc;
pub mod bits;
pub mod meta;

pub mod store;
pub mod loader;
