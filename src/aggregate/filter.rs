use crate::source::event::LogEvent;

/// Primary acceptance filter, applied in order: time range, entity
/// substring, level class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Inclusive lower bound, epoch seconds.
    pub from: Option<f64>,
    /// Inclusive upper bound, epoch seconds.
    pub to: Option<f64>,
    pub entity: Option<String>,
    pub errors_only: bool,
}

impl EventFilter {
    pub fn accepts(&self, event: &LogEvent) -> bool {
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        if let Some(entity) = self.entity.as_deref() {
            if !entity.is_empty() && !event.entity.contains(entity) {
                return false;
            }
        }
        if self.errors_only && !event.level.is_error_class() {
            return false;
        }
        true
    }
}

/// Substring query selecting a subset of entities for drill-down.
/// An empty query matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusQuery(String);

impl FocusQuery {
    pub fn new(query: impl Into<String>) -> Option<Self> {
        let query = query.into();
        (!query.is_empty()).then_some(Self(query))
    }

    pub fn matches(&self, entity: &str) -> bool {
        entity.contains(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::event::Level;

    fn event(ts: f64, entity: &str, level: Level) -> LogEvent {
        LogEvent::new(ts, entity, level)
    }

    #[test]
    fn test_default_accepts_everything() {
        let filter = EventFilter::default();
        assert!(filter.accepts(&event(0.0, "x", Level::Debug)));
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let filter = EventFilter {
            from: Some(10.0),
            to: Some(20.0),
            ..Default::default()
        };
        assert!(!filter.accepts(&event(9.9, "x", Level::Info)));
        assert!(filter.accepts(&event(10.0, "x", Level::Info)));
        assert!(filter.accepts(&event(20.0, "x", Level::Info)));
        assert!(!filter.accepts(&event(20.1, "x", Level::Info)));
    }

    #[test]
    fn test_entity_substring() {
        let filter = EventFilter {
            entity: Some("motor".to_string()),
            ..Default::default()
        };
        assert!(filter.accepts(&event(0.0, "motor_driver-11", Level::Info)));
        assert!(!filter.accepts(&event(0.0, "lidar", Level::Info)));
    }

    #[test]
    fn test_errors_only() {
        let filter = EventFilter {
            errors_only: true,
            ..Default::default()
        };
        assert!(filter.accepts(&event(0.0, "x", Level::Warn)));
        assert!(filter.accepts(&event(0.0, "x", Level::Fatal)));
        assert!(!filter.accepts(&event(0.0, "x", Level::Info)));
    }

    #[test]
    fn test_focus_query() {
        assert!(FocusQuery::new("").is_none());
        let focus = FocusQuery::new("nav").unwrap();
        assert!(focus.matches("nav2_controller"));
        assert!(!focus.matches("lidar"));
    }
}
