// Messaging module - provider events and message dispatch
pub mod dispatcher;
pub mod event;

pub use dispatcher::Dispatcher;
pub use event::{ProviderErrorKind, ProviderEvent};
