pub mod connection;
pub mod error;
pub mod fanout;
pub mod registry;

pub use connection::{GatewayConfig, handle_connection};
pub use error::DeliveryError;
pub use fanout::{DeliveryReport, Fanout};
pub use registry::{Connection, ConnectionState, Registry};
