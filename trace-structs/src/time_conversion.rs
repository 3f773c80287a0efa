use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Wall clock of this host, without an offset, the same way trace headers are written.
pub fn now_naive_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Joins the date and time halves of a trace header. The time may carry a fractional
/// part of any length (`15:05:09` or `15:05:09.4410`).
/// Returns None when the digits don't form a real calendar date or clock time.
pub fn parse_trace_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").ok()?;
    Some(date.and_time(time))
}
