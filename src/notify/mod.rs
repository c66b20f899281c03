//! New-code notifications: message text, push delivery and per-subscriber fan-out.

pub mod delivery;
pub mod dispatcher;
pub mod message;

pub use delivery::{HttpPushGateway, LogDelivery, PushDelivery};
pub use dispatcher::{DeliveryOutcome, DispatchSettings, Dispatcher};
pub use message::MessageSettings;
