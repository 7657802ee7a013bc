// libs/appointment-cell/src/services/interval.rs
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, SubsecRound, TimeZone, Utc};

use crate::models::{AppointmentError, TimeInterval};

/// Half-open overlap test: `[a_start, a_end)` and `[b_start, b_end)` overlap
/// iff each one starts before the other ends. Touching endpoints do not
/// overlap.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Stored timestamps carry second precision.
pub fn truncate_to_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}

impl TimeInterval {
    pub fn new(begin_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Result<Self, AppointmentError> {
        let begin_at = truncate_to_seconds(begin_at);
        let end_at = truncate_to_seconds(end_at);

        if begin_at >= end_at {
            return Err(AppointmentError::InvalidInterval);
        }

        Ok(Self { begin_at, end_at })
    }

    pub fn from_duration(begin_at: DateTime<Utc>, duration_minutes: i64) -> Result<Self, AppointmentError> {
        if duration_minutes <= 0 {
            return Err(AppointmentError::InvalidInterval);
        }

        let end_at = Duration::try_minutes(duration_minutes)
            .and_then(|duration| begin_at.checked_add_signed(duration))
            .ok_or_else(|| AppointmentError::ValidationError(
                format!("duration of {} minutes is out of range", duration_minutes)
            ))?;

        Self::new(begin_at, end_at)
    }

    pub fn begin_at(&self) -> DateTime<Utc> {
        self.begin_at
    }

    pub fn end_at(&self) -> DateTime<Utc> {
        self.end_at
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_at - self.begin_at).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        overlaps(self.begin_at, self.end_at, other.begin_at, other.end_at)
    }

    pub fn overlaps_range(&self, begin_at: DateTime<Utc>, end_at: DateTime<Utc>) -> bool {
        overlaps(self.begin_at, self.end_at, begin_at, end_at)
    }
}

/// The single fixed zone appointments are grouped and listed in.
pub fn scheduling_offset(utc_offset_minutes: i32) -> FixedOffset {
    utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// `[start of local day, start of next local day)` for the day containing
/// `instant` in `offset`.
pub fn day_bounds(instant: DateTime<Utc>, offset: FixedOffset) -> TimeInterval {
    let local_midnight = instant
        .with_timezone(&offset)
        .date_naive()
        .and_time(NaiveTime::MIN);
    let start = Utc.from_utc_datetime(
        &(local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()))),
    );

    TimeInterval {
        begin_at: start,
        end_at: start + Duration::days(1),
    }
}
