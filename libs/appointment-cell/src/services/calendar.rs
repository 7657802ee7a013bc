// libs/appointment-cell/src/services/calendar.rs
use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDate};

use crate::models::{Appointment, CalendarDay};

/// Bucket appointments by the local calendar date of `begin_at`, each day
/// sorted ascending. Days are returned in date order.
pub fn group_by_calendar_day(appointments: Vec<Appointment>, offset: FixedOffset) -> Vec<CalendarDay> {
    let mut days: BTreeMap<NaiveDate, Vec<Appointment>> = BTreeMap::new();

    for appointment in appointments {
        let date = appointment.begin_at.with_timezone(&offset).date_naive();
        days.entry(date).or_default().push(appointment);
    }

    days.into_iter()
        .map(|(date, mut appointments)| {
            appointments.sort_by_key(|apt| apt.begin_at);
            CalendarDay { date, appointments }
        })
        .collect()
}
