//! Topic routing - maps MQTT topics to stream kinds

use crate::domain::types::StreamKind;
use crate::infra::config::Config;

/// Ordered (filter, stream) routes. Exact single-topic streams are checked
/// before the collar filters so a broad sensor wildcard cannot shadow them.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    routes: Vec<(String, StreamKind)>,
}

impl TopicRouter {
    pub fn new(routes: Vec<(String, StreamKind)>) -> Self {
        let mut routes = routes;
        // Stable sort keeps configured order within each group
        routes.sort_by_key(|(filter, kind)| (is_wildcard(filter), *kind == StreamKind::Sensor));
        Self { routes }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut routes = vec![
            (config.environment_topic().to_string(), StreamKind::Environment),
            (config.gate_topic().to_string(), StreamKind::Gate),
            (config.feed_topic().to_string(), StreamKind::Feed),
        ];
        routes.extend(config.sensor_topics().iter().map(|t| (t.clone(), StreamKind::Sensor)));
        Self::new(routes)
    }

    /// Resolve the stream a topic belongs to
    pub fn route(&self, topic: &str) -> Option<StreamKind> {
        self.routes.iter().find(|(filter, _)| topic_matches(filter, topic)).map(|(_, kind)| *kind)
    }

    /// Distinct filters to subscribe to
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = Vec::with_capacity(self.routes.len());
        for (filter, _) in &self.routes {
            if !filters.contains(filter) {
                filters.push(filter.clone());
            }
        }
        filters
    }
}

#[inline]
fn is_wildcard(filter: &str) -> bool {
    filter.contains('+') || filter.contains('#')
}

/// MQTT filter matching: `+` matches one level, a trailing `#` matches the rest
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("farm/gate", "farm/gate"));
        assert!(!topic_matches("farm/gate", "farm/gate/extra"));
        assert!(topic_matches("farm/sensors/+", "farm/sensors/COW001"));
        assert!(!topic_matches("farm/sensors/+", "farm/sensors"));
        assert!(!topic_matches("farm/sensors/+", "farm/sensors/a/b"));
        assert!(topic_matches("farm/#", "farm/anything/deep"));
        assert!(topic_matches("farm/#", "farm"));
        assert!(!topic_matches("barn/#", "farm/gate"));
    }

    #[test]
    fn test_default_routes() {
        let router = TopicRouter::from_config(&Config::default());
        assert_eq!(router.route("farm/sensor1"), Some(StreamKind::Sensor));
        assert_eq!(router.route("farm/sensors/COW003"), Some(StreamKind::Sensor));
        assert_eq!(router.route("farm/environment"), Some(StreamKind::Environment));
        assert_eq!(router.route("farm/gate"), Some(StreamKind::Gate));
        assert_eq!(router.route("farm/feed_monitor"), Some(StreamKind::Feed));
        assert_eq!(router.route("farm/unknown"), None);
    }

    #[test]
    fn test_exact_topics_win_over_sensor_wildcard() {
        let router = TopicRouter::new(vec![
            ("farm/+".to_string(), StreamKind::Sensor),
            ("farm/gate".to_string(), StreamKind::Gate),
        ]);
        assert_eq!(router.route("farm/gate"), Some(StreamKind::Gate));
        assert_eq!(router.route("farm/collar7"), Some(StreamKind::Sensor));
    }

    #[test]
    fn test_filters_deduplicated() {
        let router = TopicRouter::new(vec![
            ("farm/a".to_string(), StreamKind::Sensor),
            ("farm/a".to_string(), StreamKind::Sensor),
            ("farm/gate".to_string(), StreamKind::Gate),
        ]);
        assert_eq!(router.filters().len(), 2);
    }
}
