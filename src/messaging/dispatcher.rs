use crate::channel::SubscriptionRegistry;
use crate::client::StatsReporter;
use crate::types::ChannelMessage;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Routes inbound messages to the handlers registered for their channel.
///
/// Handlers run in registration order. A panicking filter rejects the
/// message for its subscription; a panicking handler is logged and the
/// remaining handlers still run.
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    stats: Arc<StatsReporter>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, stats: Arc<StatsReporter>) -> Self {
        Self { registry, stats }
    }

    /// Delivers one message; returns how many handlers accepted it
    pub fn dispatch(&self, message: &ChannelMessage) -> usize {
        self.stats.record_received(message.size);

        let records = self.registry.matching(&message.channel);
        tracing::debug!(
            "Dispatching {} on {} to {} subscription(s)",
            message.event,
            message.channel,
            records.len()
        );

        let mut delivered = 0;
        for record in records
            .iter()
            .filter(|record| record.accepts_event(&message.event))
        {
            if let Some(filter) = &record.filter {
                match catch_unwind(AssertUnwindSafe(|| filter(message))) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => {
                        tracing::warn!(
                            "Filter of subscription {} panicked; message rejected",
                            record.id
                        );
                        continue;
                    }
                }
            }

            match catch_unwind(AssertUnwindSafe(|| (record.handler)(message))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!(
                    "Handler of subscription {} panicked on {}:{}",
                    record.id,
                    message.channel,
                    message.event
                ),
            }
        }
        delivered
    }
}
