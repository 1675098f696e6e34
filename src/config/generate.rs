pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGTIDE CONFIGURATION
# =============================================================================
# Every setting is optional; an absent key keeps its default. Command-line
# flags override the values here.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logtide/config.yml
#   3. /etc/logtide/config.yml
#
# $env{VAR} is replaced with the value of environment variable VAR.

# =============================================================================
# CHECKPOINT
# =============================================================================
# Resume points for `logtide analyze`, one entry per log file, stored in
# <dir>/.checkpoint.json.

checkpoint:
  dir: ~/.local/share/logtide

# =============================================================================
# BATCH ANALYSIS (`logtide analyze`)
# =============================================================================

analysis:
  # Time bucket width: '10m', '30s', '1h', or a bare integer meaning hours
  interval: 1h
  # Entities listed in the summary
  top_entities: 10
  # Only count ERROR, WARN and FATAL lines
  errors_only: false
  # Only count entities whose name contains this text
  # entity: motor
  # Track entities containing this text in a separate drill-down section
  # focus: nav2
  # Time range (local time): YYYY-MM-DD, YYYY-MM-DD HH:MM[:SS], HH:MM[:SS]
  # from: "2026-01-27 09:00"
  # to: "2026-01-27 18:00"

  # Error samples kept for pattern grouping (earliest first)
  sample_capacity: 500
  focus_sample_capacity: 200
  # Silence longer than this between two lines of one entity is reported
  gap_threshold: 10s
  # Longest gaps kept
  gap_capacity: 50
  # Buckets above this multiple of the mean are reported as spikes
  spike_factor: 2.0
  # How far back to look for a line start when resuming (bytes)
  boundary_scan_cap: 1048576

# =============================================================================
# LIVE MODE (`logtide follow`)
# =============================================================================

follow:
  # Lines before end of file to start from; 0 starts at the end
  tail: 5000
  # Sliding window measured in log time
  window: 5m
  # Dashboard redraw cadence
  refresh: 2s
  # Bucket width of the window volume chart
  interval: 1m
  # Most recent errors/warnings shown
  alert_capacity: 20
  # Seconds the lines/s figure averages over
  rate_window_secs: 10
  # Polling behaviour
  partial_line_backoff: 50ms
  eof_backoff: 200ms
  check_interval: 1s
"#
    .to_string()
}
