//! Status derived from the committed history.
//!
//! Nothing here is cached: every answer is recomputed from the records so it can
//! never disagree with the log after an undo, redo or reset.

use crate::{
    day::DayWindow,
    event::{Category, EventRecord, EventType, Phase},
};

fn last_index_of(history: &[EventRecord], kind: EventType) -> Option<usize> {
    history.iter().rposition(|e| e.kind == kind)
}

/// Whether a start/stop category is currently running. The latest phase wins.
pub fn is_active(history: &[EventRecord], category: Category) -> bool {
    let last_start = last_index_of(history, EventType::start(category));
    let last_stop = last_index_of(history, EventType::stop(category));
    match (last_start, last_stop) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(start), Some(stop)) => start > stop,
    }
}

/// The phase a toggle of `category` would record next.
pub fn next_phase(history: &[EventRecord], category: Category) -> Phase {
    if is_active(history, category) {
        Phase::Stop
    } else {
        Phase::Start
    }
}

/// Time of the most recent `kind` record, ignoring records after `upper_bound`.
pub fn last_event_time(
    history: &[EventRecord],
    kind: EventType,
    upper_bound: Option<i64>,
) -> Option<i64> {
    history
        .iter()
        .rev()
        .filter(|e| upper_bound.map_or(true, |bound| e.time <= bound))
        .find(|e| e.kind == kind)
        .map(|e| e.time)
}

pub fn event_count_in_day(history: &[EventRecord], kind: EventType, window: DayWindow) -> usize {
    history
        .iter()
        .filter(|e| e.kind == kind && window.contains(e.time))
        .count()
}

/// Total running time of `category` inside `window`, in milliseconds.
///
/// A stop with no start inside the window counts from the window start (the
/// activity crossed midnight). A start with no stop inside the window counts up
/// to the window end, which `now` pulls back for the current day.
pub fn active_duration_in_day(
    history: &[EventRecord],
    category: Category,
    window: DayWindow,
    now: Option<i64>,
) -> i64 {
    let window = match now {
        Some(now) => window.capped_at(now),
        None => window,
    };

    let mut total = 0;
    let mut last_start: Option<i64> = None;

    for e in history {
        if window.contains(e.time) {
            if e.kind.is_stop_of(category) {
                total += e.time - last_start.take().unwrap_or(window.start);
            } else if e.kind.is_start_of(category) {
                last_start = Some(e.time);
            }
        } else if let Some(start) = last_start.take() {
            total += window.end - start;
        }
    }

    // Still running with nothing recorded after it.
    if let Some(start) = last_start {
        total += window.end - start;
    }

    total.max(0)
}
