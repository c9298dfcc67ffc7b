pub mod message;
pub mod transport;

pub use message::{Inbound as InboundMessage, Outbound, StartResponse};
pub use transport::{Channel, Connector, Inbound, WsConnector};
