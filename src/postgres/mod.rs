pub mod connection;
pub mod decoder;
pub mod lsn;
pub mod stream;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use connection::ReplicationConnection;
pub use decoder::PgOutputDecoder;
pub use lsn::Lsn;
pub use stream::{PgOutputStream, StreamOptions};
pub use types::*;
