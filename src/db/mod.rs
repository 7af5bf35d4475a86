mod catalog;
mod connection;
mod query;

pub use catalog::*;
pub use connection::*;
pub use query::*;
