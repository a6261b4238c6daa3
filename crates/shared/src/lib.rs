pub mod error;
pub mod path;
pub mod protocol;

pub use error::{ProtocolError, RpcError};
pub use path::StatePath;
