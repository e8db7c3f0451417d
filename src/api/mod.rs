pub mod exchange;
pub mod signal;

pub use exchange::{ExchangeClient, OrderAck, OrderRequest, OrderState, OrderType};
pub use signal::SignalClient;
