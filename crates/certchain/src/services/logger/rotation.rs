use time::{format_description::BorrowedFormatItem, macros::format_description, Duration, Time};

use crate::config::LogRotation;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Rotation(pub LogRotation);

impl Rotation {
    /// Provides a minutely rotation
    pub const MINUTELY: Self = Self(LogRotation::Minutely);
    /// Provides an hourly rotation
    pub const HOURLY: Self = Self(LogRotation::Hourly);
    /// Provides a daily rotation
    pub const DAILY: Self = Self(LogRotation::Daily);
    /// Provides a rotation that never rotates.
    pub const NEVER: Self = Self(LogRotation::Never);

    /// Start of the period following the one `current_date` falls in
    pub(super) fn next_date(
        &self,
        current_date: &time::OffsetDateTime,
    ) -> Option<time::OffsetDateTime> {
        let unrounded_next_date = match *self {
            Rotation::MINUTELY => *current_date + Duration::minutes(1),
            Rotation::HOURLY => *current_date + Duration::hours(1),
            Rotation::DAILY => *current_date + Duration::days(1),
            _ => return None,
        };
        self.round_date(&unrounded_next_date)
    }

    /// Truncates `date` to the start of its period, `None` for `NEVER`
    pub(super) fn round_date(&self, date: &time::OffsetDateTime) -> Option<time::OffsetDateTime> {
        let midnight = date.replace_time(Time::MIDNIGHT);
        let hours = Duration::hours(i64::from(date.hour()));
        let minutes = Duration::minutes(i64::from(date.minute()));

        match *self {
            Rotation::MINUTELY => Some(midnight + hours + minutes),
            Rotation::HOURLY => Some(midnight + hours),
            Rotation::DAILY => Some(midnight),
            _ => None,
        }
    }

    pub(super) fn date_format(&self) -> &'static [BorrowedFormatItem<'static>] {
        match *self {
            Rotation::MINUTELY => format_description!("[year]-[month]-[day]-[hour]-[minute]"),
            Rotation::HOURLY => format_description!("[year]-[month]-[day]-[hour]"),
            Rotation::DAILY => format_description!("[year]-[month]-[day]"),
            _ => &[],
        }
    }
}
