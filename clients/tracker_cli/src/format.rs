use chrono::{DateTime, TimeZone, Timelike};

const MINUTE_MS: i64 = 60 * 1000;

/// `42m`, `3h`, `3h 5m`. Truncates to whole minutes.
pub fn interval_description(ms: i64) -> String {
    let minutes = ms.max(0) / MINUTE_MS;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let h = minutes / 60;
    let m = minutes % 60;
    if m > 0 {
        format!("{h}h {m}m")
    } else {
        format!("{h}h")
    }
}

pub fn relative_time(time: i64, now: i64) -> String {
    let diff = now - time;
    if diff < MINUTE_MS {
        "just now".to_string()
    } else {
        format!("{} ago", interval_description(diff))
    }
}

/// Clock time for today, `Yesterday, …` for the previous day, `Feb 14, …` before that.
pub fn absolute_time<Tz: TimeZone>(time: i64, now: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let (Some(t), Some(n)) = (local(time, tz), local(now, tz)) else {
        return "?".to_string();
    };
    let clock = clock_12h(&t);
    let days_ago = n.date_naive().signed_duration_since(t.date_naive()).num_days();
    match days_ago {
        0 => clock,
        1 => format!("Yesterday, {clock}"),
        _ => format!("{}, {clock}", t.format("%b %-d")),
    }
}

/// `Sun Feb 15` style label for the day containing `time`.
pub fn day_label<Tz: TimeZone>(time: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    local(time, tz).map_or_else(|| "?".to_string(), |t| t.format("%a %b %-d").to_string())
}

fn local<Tz: TimeZone>(ms: i64, tz: &Tz) -> Option<DateTime<Tz>> {
    tz.timestamp_millis_opt(ms).earliest()
}

fn clock_12h<Tz: TimeZone>(t: &DateTime<Tz>) -> String {
    let (pm, hour) = t.hour12();
    format!("{}:{:02}{}", hour, t.minute(), if pm { "PM" } else { "AM" })
}
