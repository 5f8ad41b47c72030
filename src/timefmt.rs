use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

/// Human bucket for how long ago `ts` happened relative to `now`.
///
/// Thresholds use whole units: under a minute is "Just now" (future
/// timestamps included), then minutes, hours, days up to a week, and the
/// calendar date in `offset` beyond that.
pub fn relative_time(ts: OffsetDateTime, now: OffsetDateTime, offset: UtcOffset) -> String {
    let minutes = (now - ts).whole_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days}d ago");
    }
    calendar_date(ts.to_offset(offset).date())
}

/// `M/D/YYYY`, no time component.
pub fn calendar_date(date: Date) -> String {
    let fmt = format_description!("[month padding:none]/[day padding:none]/[year]");
    date.format(&fmt)
        .unwrap_or_else(|_| date.to_string())
}

/// ISO `YYYY-MM-DD` of `ts` in `offset`; sorts lexicographically in date order.
pub fn iso_date(ts: OffsetDateTime, offset: UtcOffset) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    let date = ts.to_offset(offset).date();
    date.format(&fmt).unwrap_or_else(|_| date.to_string())
}

/// Full date and time for detail rows, e.g. `Oct 19, 2026, 08:15 PM`.
pub fn format_timestamp(ts: OffsetDateTime, offset: UtcOffset) -> String {
    let fmt = format_description!(
        "[month repr:short] [day padding:none], [year], [hour repr:12]:[minute] [period]"
    );
    let local = ts.to_offset(offset);
    local.format(&fmt).unwrap_or_else(|_| local.to_string())
}

/// Offset of the host time zone, falling back to UTC when it cannot be
/// determined (e.g. once other threads are running on some platforms).
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}
