//! Various I/O utilities.

mod io;

pub use io::{ReadDataExt, WriteDataExt, new_invalid_data_err};
