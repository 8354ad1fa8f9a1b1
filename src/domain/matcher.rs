use crate::domain::models::{ScheduleBlock, ScheduleTemplate, MINUTES_PER_DAY};
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Timelike,
};

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];
const OFFSET_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

/// Half-open range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<T> {
    pub start: T,
    pub end: T,
}

impl<T: PartialOrd> Span<T> {
    pub fn new(start: T, end: T) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }
}

pub type TimeRange = Span<NaiveDateTime>;

/// The part of a target range that falls on one calendar day, expressed as
/// weekday plus minutes of day. `end_minute` may be 1440.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySegment {
    pub weekday: u8,
    pub minutes: Span<u16>,
}

pub fn overlaps<T: PartialOrd>(a: &Span<T>, b: &Span<T>) -> bool {
    a.start < b.end && a.end > b.start
}

pub fn contains<T: PartialOrd>(inner: &Span<T>, outer: &Span<T>) -> bool {
    inner.start >= outer.start && inner.end <= outer.end
}

/// Availability implied by the declarations for `target`, or `None` when
/// nothing applies. Busy wins on any overlap, free only on full containment,
/// and absolute blocks are consulted before weekly templates.
pub fn predict(
    target: &TimeRange,
    blocks: &[ScheduleBlock],
    templates: &[ScheduleTemplate],
) -> Option<bool> {
    if blocks
        .iter()
        .filter(|block| !block.available)
        .any(|block| overlaps(&block_span(block), target))
    {
        return Some(false);
    }
    if blocks
        .iter()
        .filter(|block| block.available)
        .any(|block| contains(target, &block_span(block)))
    {
        return Some(true);
    }

    let segments = weekly_segments(target);
    if segments.is_empty() {
        return None;
    }

    let busy_hit = templates.iter().filter(|template| !template.available).any(|template| {
        segments.iter().any(|segment| {
            segment.weekday == template.weekday
                && overlaps(&segment.minutes, &template_span(template))
        })
    });
    if busy_hit {
        return Some(false);
    }

    let free_cover = segments.iter().all(|segment| {
        templates
            .iter()
            .filter(|template| template.available && template.weekday == segment.weekday)
            .any(|template| contains(&segment.minutes, &template_span(template)))
    });
    if free_cover {
        return Some(true);
    }

    None
}

pub fn weekly_segments(range: &TimeRange) -> Vec<WeeklySegment> {
    let mut segments = Vec::new();
    let mut day = range.start.date();
    loop {
        let day_start = day.and_time(NaiveTime::MIN);
        if day_start >= range.end {
            break;
        }
        let segment_start = range.start.max(day_start);
        let segment_end = day_start
            .checked_add_signed(Duration::days(1))
            .map_or(range.end, |next_day_start| range.end.min(next_day_start));
        let start_minute = minutes_since(day_start, segment_start);
        let end_minute = minutes_since(day_start, segment_end);
        if let Some(minutes) = Span::new(start_minute, end_minute) {
            segments.push(WeeklySegment {
                weekday: weekday_index(day),
                minutes,
            });
        }
        let Some(next) = day.succ_opt() else {
            break;
        };
        day = next;
    }
    segments
}

pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Parses a stored or submitted instant as wall-clock time. Values carrying an
/// offset keep the clock fields as written and drop the offset. Fractions of a
/// second are cut off.
pub fn parse_wall_clock(value: &str) -> Result<NaiveDateTime, String> {
    let value = value.trim();
    parse_any_wall_clock(value)
        .map(|parsed| parsed.trunc_subsecs(0))
        .ok_or_else(|| format!("'{value}' is not a recognized date-time"))
}

fn parse_any_wall_clock(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.naive_local());
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// Parses `HH:MM` into minutes of day. `24:00` is only accepted when
/// `allow_end_of_day` is set.
pub fn parse_time_of_day(value: &str, allow_end_of_day: bool) -> Result<u16, String> {
    let value = value.trim();
    if value == "24:00" {
        return if allow_end_of_day {
            Ok(MINUTES_PER_DAY)
        } else {
            Err("24:00 is only valid as an end time".to_string())
        };
    }
    let parsed = NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| format!("'{value}' must be HH:MM"))?;
    Ok((parsed.hour() * 60 + parsed.minute()) as u16)
}

pub fn format_time_of_day(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn minutes_since(origin: NaiveDateTime, value: NaiveDateTime) -> u16 {
    (value - origin)
        .num_minutes()
        .clamp(0, i64::from(MINUTES_PER_DAY)) as u16
}

fn block_span(block: &ScheduleBlock) -> TimeRange {
    Span {
        start: block.start_at,
        end: block.end_at,
    }
}

fn template_span(template: &ScheduleTemplate) -> Span<u16> {
    Span {
        start: template.start_minute,
        end: template.end_minute,
    }
}
