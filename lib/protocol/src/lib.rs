pub mod message;
pub mod request;
pub mod subprotocol;

pub use message::{FrameError, MessageKind, WireMessage};
pub use request::{GraphQLRequest, OperationKind};
pub use subprotocol::Subprotocol;
