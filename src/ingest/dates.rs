//! Free-text date resolution for event announcements.
//!
//! Sources write dates however they like ("August 14", "Sep 11, 2025",
//! "Tuesday, February 04, 2025 6:30 pm"). Resolution runs an ordered list of
//! pattern handlers; the first one that yields a calendar date wins, then an
//! optional time of day is applied on top.
//!
//! Handlers never fail loudly: anything they cannot make sense of, including
//! calendar-invalid days such as "February 30", becomes
//! [`StartTime::Unresolved`].

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::ingest::types::StartTime;

/// How far ahead a stale weekday template is searched for a matching year.
const WEEKDAY_REPAIR_YEARS: i32 = 2;

const MONTHS: &str = r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";
const WEEKDAYS: &str = r"mon(?:day)?|tue(?:s(?:day)?)?|wed(?:nesday)?|thu(?:r(?:s(?:day)?)?)?|fri(?:day)?|sat(?:urday)?|sun(?:day)?";

/// Optional weekday, month name, day, optional year.
static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:(?P<wd>{WEEKDAYS})\.?,?\s+)?(?P<mon>{MONTHS})\.?\s+(?P<day>\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(?P<year>\d{{4}})\b)?"
    ))
    .expect("date regex")
});

static RE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?P<h>\d{1,2})(?::(?P<m>\d{2}))?\s*(?P<ampm>a\.?m\.?|p\.?m\.?)(?:\W|$)")
        .expect("time regex")
});

/// A date-like match broken into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateParts {
    pub weekday: Option<Weekday>,
    pub month: u32,
    pub day: u32,
    pub year: Option<i32>,
}

/// One step of the cascade: parts of the first date-like match plus today's
/// date in, calendar date out.
type Handler = fn(&DateParts, NaiveDate) -> Option<NaiveDate>;

/// Handlers in priority order. Their preconditions are disjoint, so for any
/// given match at most one applies.
const HANDLERS: [(&str, Handler); 3] = [
    ("month_day", month_day_upcoming),
    ("month_day_year", month_day_year),
    ("weekday_month_day_year", weekday_month_day_year),
];

/// "August 14": current year, rolled to next year once the day has passed.
fn month_day_upcoming(p: &DateParts, today: NaiveDate) -> Option<NaiveDate> {
    if p.year.is_some() {
        return None;
    }
    let this_year = NaiveDate::from_ymd_opt(today.year(), p.month, p.day);
    match this_year {
        Some(d) if d >= today => Some(d),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, p.month, p.day),
    }
}

/// "Sep 11, 2025": taken verbatim, never rolled.
fn month_day_year(p: &DateParts, _today: NaiveDate) -> Option<NaiveDate> {
    match (p.weekday, p.year) {
        (None, Some(y)) => NaiveDate::from_ymd_opt(y, p.month, p.day),
        _ => None,
    }
}

/// "Tuesday, February 04, 2025": verbatim unless the stated weekday disagrees
/// with the calendar, in which case the next year (within the repair window)
/// where month/day lands on that weekday is used.
fn weekday_month_day_year(p: &DateParts, _today: NaiveDate) -> Option<NaiveDate> {
    let (asserted, year) = match (p.weekday, p.year) {
        (Some(w), Some(y)) => (w, y),
        _ => return None,
    };
    let verbatim = NaiveDate::from_ymd_opt(year, p.month, p.day)?;
    if verbatim.weekday() == asserted {
        return Some(verbatim);
    }
    (1..=WEEKDAY_REPAIR_YEARS)
        .filter_map(|ahead| NaiveDate::from_ymd_opt(year + ahead, p.month, p.day))
        .find(|d| d.weekday() == asserted)
        .or(Some(verbatim))
}

fn month_number(s: &str) -> Option<u32> {
    let key: String = s.chars().take(3).collect::<String>().to_ascii_lowercase();
    let n = match key.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn weekday_from(s: &str) -> Option<Weekday> {
    let key: String = s.chars().take(3).collect::<String>().to_ascii_lowercase();
    let w = match key.as_str() {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(w)
}

fn parts_from(caps: &Captures<'_>) -> Option<DateParts> {
    let month = month_number(caps.name("mon")?.as_str())?;
    let day = caps.name("day")?.as_str().parse().ok()?;
    let year = match caps.name("year") {
        Some(y) => Some(y.as_str().parse().ok()?),
        None => None,
    };
    let weekday = caps.name("wd").and_then(|w| weekday_from(w.as_str()));
    Some(DateParts {
        weekday,
        month,
        day,
        year,
    })
}

/// Parts of the first date-like substring in `text`.
pub fn parse_parts(text: &str) -> Option<DateParts> {
    RE_DATE.captures(text).and_then(|c| parts_from(&c))
}

/// First date-like substring of `text`, if any.
pub fn find_date_text(text: &str) -> Option<&str> {
    RE_DATE.find(text).map(|m| m.as_str())
}

/// First `H:MM am/pm` (or `H pm`) in `text` as a 24-hour time.
pub fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    RE_TIME.captures_iter(text).find_map(|c| {
        let hour: u32 = c.name("h")?.as_str().parse().ok()?;
        let minute: u32 = match c.name("m") {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = c
            .name("ampm")?
            .as_str()
            .to_ascii_lowercase()
            .starts_with('p');
        let h24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        NaiveTime::from_hms_opt(h24, minute, 0)
    })
}

/// Resolves date text into instants, interpreting wall-clock dates at a fixed
/// UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    offset: FixedOffset,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::utc()
    }
}

impl DateResolver {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("zero offset"),
        }
    }

    /// `hours` outside ±23 falls back to UTC.
    pub fn from_utc_offset_hours(hours: i32) -> Self {
        hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
            .unwrap_or_else(Self::utc)
    }

    /// Local calendar date of `now`.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Local midnight of `now`'s day, as a UTC instant.
    pub fn start_of_today(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.local_to_utc(self.today(now), NaiveTime::MIN)
            .unwrap_or(now)
    }

    /// Resolve `text` relative to `now`. Total: never panics, never errors.
    pub fn resolve(&self, text: &str, now: DateTime<Utc>) -> StartTime {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return StartTime::Unresolved;
        }
        let parts = match parse_parts(trimmed) {
            Some(p) => p,
            None => return StartTime::Unresolved,
        };
        let today = self.today(now);
        let date = HANDLERS.iter().find_map(|(name, handler)| {
            let d = handler(&parts, today)?;
            tracing::trace!(target: "ingest", handler = *name, %d, "date resolved");
            Some(d)
        });
        let Some(date) = date else {
            return StartTime::Unresolved;
        };
        let time = parse_time_of_day(trimmed).unwrap_or(NaiveTime::MIN);
        match self.local_to_utc(date, time) {
            Some(ts) => StartTime::Resolved(ts),
            None => StartTime::Unresolved,
        }
    }

    fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 15, 0, 0).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> StartTime {
        StartTime::Resolved(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    #[test]
    fn month_day_keeps_current_year_when_upcoming() {
        let r = DateResolver::utc();
        assert_eq!(r.resolve("August 14", now()), ymd(2025, 8, 14));
    }

    #[test]
    fn month_day_rolls_forward_once_passed() {
        let r = DateResolver::utc();
        assert_eq!(r.resolve("March 3", now()), ymd(2026, 3, 3));
    }

    #[test]
    fn month_day_today_is_not_rolled() {
        let r = DateResolver::utc();
        assert_eq!(r.resolve("June 10", now()), ymd(2025, 6, 10));
    }

    #[test]
    fn explicit_year_is_never_rolled() {
        let r = DateResolver::utc();
        assert_eq!(r.resolve("Sep 11, 2024", now()), ymd(2024, 9, 11));
    }

    #[test]
    fn abbreviations_and_ordinals() {
        let r = DateResolver::utc();
        assert_eq!(r.resolve("Sept. 21st, 2025", now()), ymd(2025, 9, 21));
        assert_eq!(r.resolve("on dec 5th", now()), ymd(2025, 12, 5));
    }

    #[test]
    fn time_of_day_is_applied() {
        let r = DateResolver::utc();
        let got = r.resolve("Sep 11, 2025 6:30 pm", now());
        let want = Utc.with_ymd_and_hms(2025, 9, 11, 18, 30, 0).unwrap();
        assert_eq!(got, StartTime::Resolved(want));
    }

    #[test]
    fn noon_and_midnight() {
        assert_eq!(
            parse_time_of_day("12:00 pm"),
            NaiveTime::from_hms_opt(12, 0, 0)
        );
        assert_eq!(
            parse_time_of_day("12:15 AM"),
            NaiveTime::from_hms_opt(0, 15, 0)
        );
        assert_eq!(parse_time_of_day("7 p.m."), NaiveTime::from_hms_opt(19, 0, 0));
        assert_eq!(parse_time_of_day("13:00 pm"), None);
    }

    #[test]
    fn offset_shifts_instant() {
        let r = DateResolver::from_utc_offset_hours(-5);
        let got = r.resolve("Sep 11, 2025 1:00 pm", now());
        let want = Utc.with_ymd_and_hms(2025, 9, 11, 18, 0, 0).unwrap();
        assert_eq!(got, StartTime::Resolved(want));
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        for hours in [24, -24, i32::MAX, i32::MIN] {
            let r = DateResolver::from_utc_offset_hours(hours);
            assert_eq!(r.resolve("Sep 11, 2025", now()), ymd(2025, 9, 11));
        }
    }

    #[test]
    fn invalid_calendar_day_is_unresolved() {
        let r = DateResolver::utc();
        assert_eq!(r.resolve("February 30, 2025", now()), StartTime::Unresolved);
        assert_eq!(r.resolve("Feb 29", now()), StartTime::Unresolved);
    }

    #[test]
    fn find_date_text_returns_first_match() {
        assert_eq!(
            find_date_text("Join us Saturday, May 3, 2025 at the hall"),
            Some("Saturday, May 3, 2025")
        );
        assert_eq!(find_date_text("no dates here"), None);
    }
}
