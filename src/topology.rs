// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topic and subscription discovery.
//!
//! The map is rebuilt from the namespace on every cycle and never cached.
//! Any listing failure aborts the whole discovery; the caller decides
//! whether to skip the route for this cycle.

use crate::broker::TopologyAdmin;
use crate::error::TransportResult;
use crate::metrics;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Topic → subscriptions on one namespace, ordered by topic name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyMap(BTreeMap<String, Vec<String>>);

impl TopologyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same subscription list on every listed topic (legacy static mode).
    pub fn from_static(topics: &[String], subscriptions: &[String]) -> Self {
        Self(
            topics
                .iter()
                .map(|t| (t.clone(), subscriptions.to_vec()))
                .collect(),
        )
    }

    pub fn insert(&mut self, topic: impl Into<String>, subscriptions: Vec<String>) {
        self.0.insert(topic.into(), subscriptions);
    }

    pub fn topic_count(&self) -> usize {
        self.0.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.subscription_count() == 0
    }

    pub fn subscriptions(&self, topic: &str) -> Option<&[String]> {
        self.0.get(topic).map(Vec::as_slice)
    }

    /// Every `(topic, subscription)` pair, topic-major.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(t, subs)| subs.iter().map(move |s| (t.as_str(), s.as_str())))
    }
}

/// List every topic, then every subscription of each.
pub async fn discover<A>(admin: &A, namespace: &str) -> TransportResult<TopologyMap>
where
    A: TopologyAdmin + ?Sized,
{
    let mut map = TopologyMap::new();
    for topic in admin.list_topics().await? {
        let subscriptions = admin.list_subscriptions(&topic).await?;
        debug!(namespace, topic = %topic, subscriptions = subscriptions.len(), "Discovered topic");
        map.insert(topic, subscriptions);
    }

    info!(
        namespace,
        topics = map.topic_count(),
        subscriptions = map.subscription_count(),
        "Topology discovered"
    );
    metrics::record_discovery(namespace, map.topic_count(), map.subscription_count());
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::memory::InMemoryNamespace;

    #[tokio::test]
    async fn test_discover_lists_everything() {
        let ns = InMemoryNamespace::new("primary");
        ns.create_subscription("orders", "audit");
        ns.create_subscription("orders", "archive");
        ns.create_subscription("billing", "ledger");
        ns.create_topic("empty");

        let map = discover(&ns, "primary").await.unwrap();
        assert_eq!(map.topic_count(), 3);
        assert_eq!(map.subscription_count(), 3);
        assert_eq!(map.subscriptions("orders").unwrap(), ["archive", "audit"]);
        assert_eq!(map.subscriptions("empty").unwrap().len(), 0);

        let pairs: Vec<_> = map.pairs().collect();
        assert_eq!(pairs[0], ("billing", "ledger"));
    }

    #[tokio::test]
    async fn test_discover_is_fresh_each_call() {
        let ns = InMemoryNamespace::new("primary");
        ns.create_subscription("orders", "audit");
        assert_eq!(discover(&ns, "p").await.unwrap().subscription_count(), 1);

        ns.create_subscription("orders", "archive");
        assert_eq!(discover(&ns, "p").await.unwrap().subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_discover_aborts_on_any_failure() {
        let ns = InMemoryNamespace::new("primary");
        ns.create_subscription("orders", "audit");
        ns.fail_subscription_listing(Some(TransportError::service_request("timeout")));
        assert!(discover(&ns, "p").await.is_err());
    }

    #[test]
    fn test_from_static() {
        let map = TopologyMap::from_static(
            &["orders".to_string()],
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(map.subscription_count(), 2);
        assert!(!map.is_empty());
        assert!(TopologyMap::from_static(&[], &["a".to_string()]).is_empty());
    }
}
