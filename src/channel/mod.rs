// Module declarations
mod handle;
mod presence;
mod registry;
mod state;
mod subscription;

// Public API exports
pub use handle::{ChannelHandle, ChannelKind};
pub use presence::{Member, Members, MembersChanges, PresenceSnapshot, RawPresenceData};
pub use registry::{Released, SubscriptionRegistry};
pub use state::{ChannelState, ChannelStatus};
pub use subscription::{Disposer, MessageFilter, MessageHandler, SubscriptionId, SubscriptionRecord};
