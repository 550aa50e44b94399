// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use codec::{ReasonCode, SubscriptionOptions, TopicFilter};

use crate::error::Error;
use crate::message::MessageHandler;
use crate::store::StoredSubscription;

/// One subscription request, as passed to `AsyncClient::subscribe`.
#[derive(Clone)]
pub struct SubscribeFilter {
    pub filter: String,

    pub options: SubscriptionOptions,

    /// Handler invoked for matching publishes. A subscription without a
    /// handler delivers through the default publish handler.
    pub handler: Option<MessageHandler>,

    /// Persistent subscriptions are saved to the session store and
    /// re-established after a session loss.
    pub persistent: bool,
}

impl SubscribeFilter {
    /// Plain subscription at `qos` with a handler.
    #[must_use]
    pub fn new(filter: &str, qos: codec::QoS, handler: Option<MessageHandler>) -> Self {
        Self {
            filter: filter.to_string(),
            options: SubscriptionOptions::with_qos(qos),
            handler,
            persistent: false,
        }
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }
}

impl std::fmt::Debug for SubscribeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SubscribeFilter")
            .field("filter", &self.filter)
            .field("options", &self.options)
            .field("has_handler", &self.handler.is_some())
            .field("persistent", &self.persistent)
            .finish()
    }
}

/// One active subscription in the registry.
pub(crate) struct Subscription {
    filter: TopicFilter,
    options: SubscriptionOptions,
    granted: Option<ReasonCode>,
    subscription_id: Option<u32>,
    handler: Option<MessageHandler>,
    persistent: bool,
}

impl Subscription {
    pub fn handler(&self) -> Option<MessageHandler> {
        self.handler.clone()
    }

    pub fn granted(&self) -> Option<ReasonCode> {
        self.granted
    }

    pub fn options(&self) -> SubscriptionOptions {
        self.options
    }

    pub fn filter(&self) -> &str {
        self.filter.filter()
    }

    pub fn subscription_id(&self) -> Option<u32> {
        self.subscription_id
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// Registry of active subscriptions, in registration order.
///
/// Routing walks the list front to back so handlers fire in the order
/// their subscriptions were made.
pub(crate) struct SubscriptionRegistry {
    subs: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self { subs: Vec::new() }
    }

    /// Insert or replace the subscription for `filter`. Replacement keeps
    /// the original registration slot.
    pub fn upsert(
        &mut self,
        filter: &str,
        options: SubscriptionOptions,
        subscription_id: Option<u32>,
        handler: Option<MessageHandler>,
        persistent: bool,
    ) -> Result<(), Error> {
        let parsed = TopicFilter::parse(filter)?;
        let subscription = Subscription {
            filter: parsed,
            options,
            granted: None,
            subscription_id,
            handler,
            persistent,
        };
        match self.position(filter) {
            Some(index) => self.subs[index] = subscription,
            None => self.subs.push(subscription),
        }
        Ok(())
    }

    /// Record the granted reason code for `filter` after SUBACK.
    pub fn confirm(&mut self, filter: &str, granted: ReasonCode) {
        if let Some(index) = self.position(filter) {
            self.subs[index].granted = Some(granted);
        }
    }

    pub fn remove(&mut self, filter: &str) -> bool {
        match self.position(filter) {
            Some(index) => {
                self.subs.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.position(filter).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subs.iter()
    }

    /// All subscriptions whose filter matches `topic`, in registration
    /// order.
    pub fn matches(&self, topic: &str) -> Vec<&Subscription> {
        self.subs
            .iter()
            .filter(|sub| sub.filter.is_match(topic))
            .collect()
    }

    /// Store records of the persistent subscriptions.
    pub fn persistent_records(&self) -> Vec<StoredSubscription> {
        self.subs
            .iter()
            .filter(|sub| sub.persistent)
            .map(|sub| StoredSubscription {
                filter: sub.filter.filter().to_string(),
                options: sub.options,
                subscription_id: sub.subscription_id,
            })
            .collect()
    }

    /// Merge subscriptions restored from the store; live registrations
    /// win over stored ones.
    pub fn restore(&mut self, records: Vec<StoredSubscription>) {
        for record in records {
            if self.contains(&record.filter) {
                continue;
            }
            if let Err(err) = self.upsert(
                &record.filter,
                record.options,
                record.subscription_id,
                None,
                true,
            ) {
                log::warn!("registry: dropping restored subscription: {err}");
            }
        }
    }

    fn position(&self, filter: &str) -> Option<usize> {
        self.subs.iter().position(|sub| sub.filter.filter() == filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn options(qos: QoS) -> SubscriptionOptions {
        SubscriptionOptions::with_qos(qos)
    }

    #[test]
    fn test_routing_in_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        registry
            .upsert("sensors/#", options(QoS::AtMostOnce), None, None, false)
            .unwrap();
        registry
            .upsert("sensors/+/temp", options(QoS::AtLeastOnce), None, None, false)
            .unwrap();
        registry
            .upsert("other/topic", options(QoS::AtMostOnce), None, None, false)
            .unwrap();

        let matched = registry.matches("sensors/a/temp");
        let filters: Vec<&str> = matched.iter().map(|sub| sub.filter()).collect();
        assert_eq!(filters, ["sensors/#", "sensors/+/temp"]);
    }

    #[test]
    fn test_upsert_keeps_slot() {
        let mut registry = SubscriptionRegistry::new();
        registry
            .upsert("a", options(QoS::AtMostOnce), None, None, false)
            .unwrap();
        registry
            .upsert("b", options(QoS::AtMostOnce), None, None, false)
            .unwrap();
        registry
            .upsert("a", options(QoS::ExactOnce), None, None, true)
            .unwrap();

        let subs: Vec<&str> = registry.iter().map(Subscription::filter).collect();
        assert_eq!(subs, ["a", "b"]);
        assert!(registry.iter().next().unwrap().is_persistent());
    }

    #[test]
    fn test_persistent_records() {
        let mut registry = SubscriptionRegistry::new();
        registry
            .upsert("keep", options(QoS::AtLeastOnce), Some(4), None, true)
            .unwrap();
        registry
            .upsert("drop", options(QoS::AtMostOnce), None, None, false)
            .unwrap();

        let records = registry.persistent_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filter, "keep");
        assert_eq!(records[0].subscription_id, Some(4));
    }

    #[test]
    fn test_restore_does_not_override_live() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler_counter = Arc::clone(&counter);
        let handler: MessageHandler = Arc::new(move |_msg| {
            handler_counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut registry = SubscriptionRegistry::new();
        registry
            .upsert("live", options(QoS::AtLeastOnce), None, Some(handler), true)
            .unwrap();
        registry.restore(vec![
            StoredSubscription {
                filter: "live".to_string(),
                options: options(QoS::AtMostOnce),
                subscription_id: None,
            },
            StoredSubscription {
                filter: "stored".to_string(),
                options: options(QoS::AtLeastOnce),
                subscription_id: None,
            },
        ]);

        assert!(registry.matches("live")[0].handler().is_some());
        assert!(registry.matches("stored")[0].handler().is_none());
    }

    #[test]
    fn test_remove() {
        let mut registry = SubscriptionRegistry::new();
        registry
            .upsert("a/b", options(QoS::AtMostOnce), None, None, false)
            .unwrap();
        assert!(registry.remove("a/b"));
        assert!(!registry.remove("a/b"));
        assert!(registry.matches("a/b").is_empty());
    }
}
