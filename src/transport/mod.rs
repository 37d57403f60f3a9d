pub mod logging;
pub mod loopback;
pub mod traits;

pub use logging::{LoggingTransport, LoggingTransportFactory};
pub use loopback::{AckKind, Acknowledgment, LoopbackHub, LoopbackTransport};
pub use traits::{Transport, TransportFactory};
