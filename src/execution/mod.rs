pub mod order_watch;
pub mod trailing_stop;

pub use order_watch::{spawn_order_watcher, CorrectionAction};
pub use trailing_stop::{StopUpdate, TrailingStopEngine};
