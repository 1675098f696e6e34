use crate::source::event::{Level, LogEvent};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Turns one raw log line into an event, or `None` when no known format matches.
///
/// The ingestion engines only depend on this trait, so they are agnostic to
/// which textual format produced the event.
pub trait LineParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<LogEvent>;
}

/// Parser for robot launch logs. Tries three formats in order:
///
/// 1. `TS [LEVEL] [entity]: msg` (launch output)
/// 2. `TS [entity] [LEVEL] ...` (logging-library output)
/// 3. `TS [entity] ...` (direct process output, level inferred from the
///    first bold color escape, INFO when absent)
#[derive(Debug, Clone)]
pub struct LaunchLogParser {
    launch: Regex,
    logging: Regex,
    direct: Regex,
    color: Regex,
}

impl LaunchLogParser {
    pub fn new() -> Result<Self, ParserError> {
        Ok(Self {
            launch: Regex::new(r"^(\d+\.\d+)\s+\[(INFO|ERROR|WARN|DEBUG|FATAL)\]\s+\[([^\]]+)\]")?,
            logging: Regex::new(r"^(\d+\.\d+)\s+\[([^\]]+)\]\s+\[(INFO|ERROR|WARN|DEBUG|FATAL)\]")?,
            direct: Regex::new(r"^(\d+\.\d+)\s+\[([^\]]+)\]")?,
            color: Regex::new(r"\x1b\[1;(\d+)m")?,
        })
    }

    fn level_from_color(&self, line: &str) -> Level {
        let Some(caps) = self.color.captures(line) else {
            return Level::Info;
        };
        match &caps[1] {
            "31" => Level::Error,
            "33" => Level::Warn,
            "32" => Level::Debug,
            "35" => Level::Fatal,
            _ => Level::Info,
        }
    }
}

impl LineParser for LaunchLogParser {
    fn parse(&self, line: &str) -> Option<LogEvent> {
        if let Some(caps) = self.launch.captures(line) {
            let ts = caps[1].parse().ok()?;
            let level = caps[2].parse().ok()?;
            let entity = caps[3].trim_end_matches(':');
            return Some(LogEvent::new(ts, entity, level));
        }

        if let Some(caps) = self.logging.captures(line) {
            let ts = caps[1].parse().ok()?;
            let level = caps[3].parse().ok()?;
            return Some(LogEvent::new(ts, &caps[2], level));
        }

        if let Some(caps) = self.direct.captures(line) {
            let ts = caps[1].parse().ok()?;
            let level = self.level_from_color(line);
            return Some(LogEvent::new(ts, &caps[2], level));
        }

        None
    }
}

/// Removes SGR color sequences (`ESC [ ... m`).
pub fn strip_ansi(line: &str) -> String {
    static SGR: OnceLock<Regex> = OnceLock::new();
    let re = SGR.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("SGR pattern is valid"));
    re.replace_all(line, "").into_owned()
}

/// Extracts the message part that follows the entity's closing bracket,
/// truncated to `max_len` characters. Falls back to the line's tail when the
/// entity is not found.
pub fn extract_message(line: &str, entity: &str, max_len: usize) -> String {
    let clean = strip_ansi(line.trim());
    let clean = clean.trim();
    if clean.is_empty() {
        return String::new();
    }

    if !entity.is_empty() {
        if let Some(idx) = clean.find(entity) {
            if let Some(rel) = clean[idx..].find(']') {
                let after = clean[idx + rel + 1..].trim();
                return after.chars().take(max_len).collect();
            }
        }
    }

    let count = clean.chars().count();
    clean.chars().skip(count.saturating_sub(max_len)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LaunchLogParser {
        LaunchLogParser::new().unwrap()
    }

    #[test]
    fn test_launch_format() {
        let event = parser()
            .parse("1769472000.123 [ERROR] [motor_driver-11]: overcurrent")
            .unwrap();
        assert_eq!(event.timestamp, 1769472000.123);
        assert_eq!(event.entity, "motor_driver-11");
        assert_eq!(event.level, Level::Error);
    }

    #[test]
    fn test_launch_format_strips_trailing_colon() {
        let event = parser()
            .parse("1769472000.5 [INFO] [planner:] ready")
            .unwrap();
        assert_eq!(event.entity, "planner");
    }

    #[test]
    fn test_logging_format() {
        let event = parser()
            .parse("1769472000.250 [nav2] [WARN] [1769472000.249] [controller]: slow")
            .unwrap();
        assert_eq!(event.entity, "nav2");
        assert_eq!(event.level, Level::Warn);
    }

    #[test]
    fn test_direct_format_infers_level_from_color() {
        let p = parser();
        let red = p
            .parse("1769472000.0 [lidar] \x1b[1;31m[12:00:00] [drv.cpp(10)]read() timeout\x1b[0m")
            .unwrap();
        assert_eq!(red.level, Level::Error);

        let magenta = p.parse("1769472000.0 [lidar] \x1b[1;35mboom").unwrap();
        assert_eq!(magenta.level, Level::Fatal);

        let plain = p.parse("1769472000.0 [lidar] no color here").unwrap();
        assert_eq!(plain.level, Level::Info);
    }

    #[test]
    fn test_unparseable_line() {
        assert!(parser().parse("this is not a log line").is_none());
        assert!(parser().parse("").is_none());
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;31mred\x1b[0m text"), "red text");
        assert_eq!(strip_ansi("no codes"), "no codes");
        // Only complete SGR sequences are removed
        assert_eq!(strip_ansi("\x1b[2Jclear \x1b[1;3"), "\x1b[2Jclear \x1b[1;3");
        assert_eq!(strip_ansi("\x1b[m\x1b[0;32mok"), "ok");
    }

    #[test]
    fn test_extract_message_after_entity() {
        let msg = extract_message(
            "1769472000.0 [ERROR] [motor]: \x1b[1;31mstall detected\x1b[0m\n",
            "motor",
            200,
        );
        assert_eq!(msg, ": stall detected");
    }

    #[test]
    fn test_extract_message_truncates() {
        let msg = extract_message("1.0 [INFO] [a] abcdefghij", "a", 4);
        assert_eq!(msg, "abcd");
    }

    #[test]
    fn test_extract_message_falls_back_to_tail() {
        let msg = extract_message("something without entity", "zzz", 6);
        assert_eq!(msg, "entity");
    }
}
