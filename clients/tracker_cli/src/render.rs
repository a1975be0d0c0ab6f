use crate::format::{absolute_time, day_label, interval_description, relative_time};
use chrono::TimeZone;
use serde::Deserialize;
use std::fmt::Write as _;

#[derive(Debug, Deserialize)]
pub struct StatusSnapshot {
    pub revision: u64,
    pub epoch: u64,
    pub now: i64,
    pub day_offset: i64,
    pub day: DayWindow,
    pub can_undo: bool,
    pub can_redo: bool,
    pub categories: Vec<CategoryStatus>,
}

#[derive(Debug, Deserialize)]
pub struct DayWindow {
    pub start: i64,
    #[allow(dead_code)]
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct CategoryStatus {
    pub category: String,
    #[serde(default)]
    pub last_time: Option<i64>,
    pub count_in_day: usize,
    #[serde(default)]
    pub toggle: Option<ToggleStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleStatus {
    pub active: bool,
    #[serde(default)]
    pub last_start: Option<i64>,
    #[serde(default)]
    pub last_stop: Option<i64>,
    pub active_ms_in_day: i64,
}

struct PhaseWords {
    active: &'static str,
    inactive: &'static str,
    started: &'static str,
    stopped: &'static str,
}

fn phase_words(category: &str) -> PhaseWords {
    match category {
        "sleep" => PhaseWords {
            active: "Asleep",
            inactive: "Awake",
            started: "Fell asleep",
            stopped: "Woke up",
        },
        _ => PhaseWords {
            active: "In progress",
            inactive: "Idle",
            started: "Started",
            stopped: "Stopped",
        },
    }
}

fn title(category: &str) -> String {
    let mut chars = category.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn since<Tz: TimeZone>(prefix: &str, time: Option<i64>, now: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match time {
        Some(t) => format!(
            "{prefix} {} ({})",
            relative_time(t, now),
            absolute_time(t, now, tz)
        ),
        None => "Not tracked yet".to_string(),
    }
}

/// Plain-text view of a status snapshot, one line per category.
pub fn render_status<Tz: TimeZone>(s: &StatusSnapshot, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    let day = if s.day_offset == 0 {
        "today".to_string()
    } else {
        format!("on {}", day_label(s.day.start, tz))
    };

    let _ = writeln!(
        out,
        "undo: {}  redo: {}",
        if s.can_undo { "yes" } else { "no" },
        if s.can_redo { "yes" } else { "no" }
    );

    // Start/stop activities first, like the status banner.
    for c in s.categories.iter().filter(|c| c.toggle.is_some()) {
        let Some(t) = c.toggle.as_ref() else { continue };
        let words = phase_words(&c.category);
        let (state, detail) = if t.active {
            (words.active, since(words.started, t.last_start, s.now, tz))
        } else {
            (words.inactive, since(words.stopped, t.last_stop, s.now, tz))
        };
        let _ = writeln!(out, "{}: {state}. {detail}", title(&c.category));
        let _ = writeln!(
            out,
            "  {} {day} ({} started)",
            interval_description(t.active_ms_in_day),
            c.count_in_day
        );
    }

    for c in s.categories.iter().filter(|c| c.toggle.is_none()) {
        let _ = writeln!(
            out,
            "{}: {} · {} {day}",
            title(&c.category),
            since("Last", c.last_time, s.now, tz),
            c.count_in_day
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    fn snapshot(json: &str) -> StatusSnapshot {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn renders_sleeping_baby() {
        let now = at("2026-02-15T16:30:00Z");
        let s = snapshot(&format!(
            r#"{{
  "revision": 4, "epoch": 0, "now": {now}, "day_offset": 0,
  "day": {{"start": {}, "end": {}}},
  "can_undo": true, "can_redo": false, "history_len": 4, "redo_depth": 0,
  "categories": [
    {{"category": "feed", "count_in_day": 0}},
    {{"category": "poop", "last_time": {}, "count_in_day": 3}},
    {{"category": "sleep", "count_in_day": 1,
      "toggle": {{"active": true, "last_start": {}, "active_ms_in_day": 1800000}}}}
  ]
}}"#,
            at("2026-02-15T00:00:00Z"),
            at("2026-02-16T00:00:00Z"),
            at("2026-02-15T14:00:00Z"),
            at("2026-02-15T16:00:00Z"),
        ));

        let text = render_status(&s, &Utc);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "undo: yes  redo: no");
        assert_eq!(lines[1], "Sleep: Asleep. Fell asleep 30m ago (4:00PM)");
        assert_eq!(lines[2], "  30m today (1 started)");
        assert_eq!(lines[3], "Feed: Not tracked yet · 0 today");
        assert_eq!(lines[4], "Poop: Last 2h 30m ago (2:00PM) · 3 today");
    }

    #[test]
    fn renders_past_day_label() {
        let now = at("2026-02-15T16:30:00Z");
        let s = snapshot(&format!(
            r#"{{
  "revision": 0, "epoch": 0, "now": {now}, "day_offset": -1,
  "day": {{"start": {}, "end": {}}},
  "can_undo": false, "can_redo": false,
  "categories": [
    {{"category": "sleep", "count_in_day": 0,
      "toggle": {{"active": false, "active_ms_in_day": 0}}}}
  ]
}}"#,
            at("2026-02-14T00:00:00Z"),
            at("2026-02-15T00:00:00Z"),
        ));
        let text = render_status(&s, &Utc);
        assert!(text.contains("Sleep: Awake. Not tracked yet"));
        assert!(text.contains("0m on Sat Feb 14 (0 started)"));
    }
}
