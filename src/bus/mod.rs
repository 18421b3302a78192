// =============================================================================
// Message bus — thin typed pub/sub wrapper with per-channel validation (§4.1)
// =============================================================================

mod adapter;
mod envelope;
mod payloads;
pub mod schema;
pub mod testkit;
mod traits;

pub use adapter::MessageBus;
pub use envelope::Envelope;
pub use payloads::{ProfitReport, RegistrationAction, RegistrationMessage, TickerUpdate};
pub use traits::Bus;
