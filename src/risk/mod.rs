pub mod alerts;
pub mod circuit_breaker;
pub mod short_gate;
pub mod sizer;

pub use alerts::{Alert, AlertKind, RiskAlertMonitor};
pub use circuit_breaker::CircuitBreaker;
pub use short_gate::{ShortDecision, ShortEligibilityGate};
pub use sizer::{PositionSizer, SizedPosition};
