use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

const SUFFIX_START: &str = "_start";
const SUFFIX_STOP: &str = "_stop";

/// Base category of a tracked occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Feed,
    Pee,
    Poop,
    Sleep,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Feed, Category::Pee, Category::Poop, Category::Sleep];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Feed => "feed",
            Category::Pee => "pee",
            Category::Poop => "poop",
            Category::Sleep => "sleep",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Toggle phase of a start/stop activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Stop,
}

impl Phase {
    fn suffix(self) -> &'static str {
        match self {
            Phase::Start => SUFFIX_START,
            Phase::Stop => SUFFIX_STOP,
        }
    }
}

/// Event type tag: a category, optionally suffixed with a phase.
///
/// Serialized as the flat string the log has always used, e.g. `poop` or
/// `sleep_start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventType {
    pub category: Category,
    pub phase: Option<Phase>,
}

impl EventType {
    pub fn plain(category: Category) -> Self {
        Self {
            category,
            phase: None,
        }
    }

    pub fn start(category: Category) -> Self {
        Self {
            category,
            phase: Some(Phase::Start),
        }
    }

    pub fn stop(category: Category) -> Self {
        Self {
            category,
            phase: Some(Phase::Stop),
        }
    }

    pub fn is_start_of(&self, category: Category) -> bool {
        self.category == category && self.phase == Some(Phase::Start)
    }

    pub fn is_stop_of(&self, category: Category) -> bool {
        self.category == category && self.phase == Some(Phase::Stop)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category.as_str())?;
        if let Some(phase) = self.phase {
            f.write_str(phase.suffix())?;
        }
        Ok(())
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(base) = s.strip_suffix(SUFFIX_START) {
            return Ok(EventType::start(base.parse()?));
        }
        if let Some(base) = s.strip_suffix(SUFFIX_STOP) {
            return Ok(EventType::stop(base.parse()?));
        }
        Ok(EventType::plain(s.parse()?))
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| serde::de::Error::custom(format!("unknown event type '{s}'")))
    }
}

/// A single timestamped occurrence. `time` is milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub time: i64,
}

impl EventRecord {
    pub fn new(kind: EventType, time: i64) -> Self {
        Self { kind, time }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parses_phase_suffixes() {
        assert_eq!("poop".parse::<EventType>(), Ok(EventType::plain(Category::Poop)));
        assert_eq!(
            "sleep_start".parse::<EventType>(),
            Ok(EventType::start(Category::Sleep))
        );
        assert_eq!(
            "feed_stop".parse::<EventType>(),
            Ok(EventType::stop(Category::Feed))
        );
        assert!("nap".parse::<EventType>().is_err());
        assert!("sleep_pause".parse::<EventType>().is_err());
        assert_eq!(EventType::start(Category::Sleep).to_string(), "sleep_start");
    }

    #[test]
    fn record_uses_legacy_json_shape() {
        let rec = EventRecord::new(EventType::stop(Category::Sleep), 1_700_000_000_000);
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"type":"sleep_stop","time":1700000000000}"#);

        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);

        assert!(serde_json::from_str::<EventRecord>(r#"{"type":"nap","time":1}"#).is_err());
    }
}
