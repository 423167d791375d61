//! Domain-based routing of validated messages to topics.
//!
//! A [`Router`] holds an ordered list of [`Route`]s fixed at construction.
//! Lookup walks the list in order and the first route whose domain equals the
//! header's domain wins; later routes for the same domain are never reached.
//! A header whose domain matches nothing yields no route, which callers treat
//! as a normal drop rather than an error.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Deserialize;

use crate::message::{DecodedHeader, RoutedMessage, ValidatedMessage};

/// Function choosing a partition from a header.
pub type PartitionFn = Arc<dyn Fn(&DecodedHeader) -> i32 + Send + Sync>;

/// How a route assigns partitions.
#[derive(Clone)]
pub enum Partitioning {
    /// Always the same partition.
    Fixed(i32),
    /// Computed from the header.
    Custom(PartitionFn),
}

impl Partitioning {
    /// Partition for `header`.
    #[must_use]
    pub fn partition(&self, header: &DecodedHeader) -> i32 {
        match self {
            Self::Fixed(partition) => *partition,
            Self::Custom(f) => f(header),
        }
    }
}

impl Default for Partitioning {
    fn default() -> Self { Self::Fixed(0) }
}

impl fmt::Debug for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(partition) => f.debug_tuple("Fixed").field(partition).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Static rule mapping a domain to a destination.
#[derive(Clone, Debug)]
pub struct Route {
    domain: String,
    target_topic: String,
    partitioning: Partitioning,
}

impl Route {
    /// Route `domain` to partition 0 of `target_topic`.
    #[must_use]
    pub fn new(domain: impl Into<String>, target_topic: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            target_topic: target_topic.into(),
            partitioning: Partitioning::default(),
        }
    }

    /// Replace the partitioning rule.
    #[must_use]
    pub fn with_partitioning(mut self, partitioning: Partitioning) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Domain this route matches.
    #[must_use]
    pub fn domain(&self) -> &str { &self.domain }

    /// Destination topic.
    #[must_use]
    pub fn target_topic(&self) -> &str { &self.target_topic }

    /// Partition this route assigns to `header`.
    #[must_use]
    pub fn partition(&self, header: &DecodedHeader) -> i32 { self.partitioning.partition(header) }

    fn matches(&self, header: &DecodedHeader) -> bool {
        header.domain.as_deref() == Some(self.domain.as_str())
    }
}

/// Route as written in configuration files.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Domain to match.
    pub domain: String,
    /// Destination topic.
    pub topic: String,
    /// Fixed destination partition.
    #[serde(default)]
    pub partition: i32,
}

impl From<RouteConfig> for Route {
    fn from(config: RouteConfig) -> Self {
        Route::new(config.domain, config.topic)
            .with_partitioning(Partitioning::Fixed(config.partition))
    }
}

/// Ordered, immutable route table shared by all connections.
#[derive(Clone, Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Build a router from routes in priority order.
    ///
    /// Routes shadowed by an earlier route for the same domain are kept but
    /// can never match; each one is reported with a warning.
    #[must_use]
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        let routes: Vec<Route> = routes.into_iter().collect();
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.domain.as_str()) {
                tracing::warn!(
                    domain = %route.domain,
                    topic = %route.target_topic,
                    "route is unreachable: an earlier route matches the same domain"
                );
            }
        }
        Self { routes }
    }

    /// Find the first route matching the header's domain.
    #[must_use]
    pub fn route(&self, header: &DecodedHeader) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(header))
    }

    /// Route a validated message, or hand it back if no route matches.
    ///
    /// # Errors
    ///
    /// Returns the message unchanged when its domain has no route.
    pub fn route_message(
        &self,
        message: ValidatedMessage,
    ) -> Result<RoutedMessage, ValidatedMessage> {
        match self.route(message.header()) {
            Some(route) => Ok(RoutedMessage {
                target_topic: route.target_topic.clone(),
                partition: route.partition(message.header()),
                message,
            }),
            None => Err(message),
        }
    }

    /// Configured routes in evaluation order.
    #[must_use]
    pub fn routes(&self) -> &[Route] { &self.routes }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn header(domain: Option<&str>) -> DecodedHeader {
        DecodedHeader {
            domain: domain.map(str::to_owned),
            sequence: Some(7),
            ..DecodedHeader::default()
        }
    }

    #[test]
    fn first_matching_route_wins() {
        let router = Router::new([
            Route::new("D", "first"),
            Route::new("D", "second"),
        ]);

        let route = router.route(&header(Some("D"))).expect("route");
        assert_eq!(route.target_topic(), "first");
    }

    #[rstest]
    #[case(Some("X"))]
    #[case(Some(""))]
    #[case(None)]
    fn unmatched_domain_has_no_route(#[case] domain: Option<&str>) {
        let router = Router::new([Route::new("perf3gpp", "PERF")]);
        assert!(router.route(&header(domain)).is_none());
    }

    #[test]
    fn custom_partitioning_uses_header() {
        let route = Route::new("D", "topic").with_partitioning(Partitioning::Custom(Arc::new(
            |h: &DecodedHeader| h.sequence.map_or(0, |s| i32::try_from(s % 4).unwrap_or(0)),
        )));
        assert_eq!(route.partition(&header(Some("D"))), 3);
    }

    #[test]
    fn route_config_defaults_partition_to_zero() {
        let config: RouteConfig =
            toml::from_str("domain = \"perf3gpp\"\ntopic = \"PERF\"").expect("valid route");
        let route = Route::from(config);
        assert_eq!(route.domain(), "perf3gpp");
        assert_eq!(route.partition(&header(None)), 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn shadowed_routes_are_reported() {
        let router = Router::new([Route::new("D", "a"), Route::new("D", "b")]);
        assert_eq!(router.routes().len(), 2);
        assert!(logs_contain("route is unreachable"));
    }
}
