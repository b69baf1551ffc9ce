//! Local user notifications and when to deliver them.

use chrono::{DateTime, Days, FixedOffset, TimeZone, Timelike as _, Utc};
use chrono_tz::Tz;

/// Identifier of the notification raised when pending lab uploads expired.
pub const UPLOAD_FAILED_IDENTIFIER: &str = "uploadFailed";

/// Notifications are delivered right away between these local hours (start
/// inclusive, end exclusive), otherwise they are held until the next morning.
pub const DELIVERY_HOURS: std::ops::Range<u32> = 8..20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationSound {
    #[default]
    Default,
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub body: String,
    pub sound: NotificationSound,
    pub badge: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTrigger {
    Immediate,
    Calendar(CalendarTrigger),
}

impl NotificationTrigger {
    /// Delivers immediately during [`DELIVERY_HOURS`] of `local_now`, and the next
    /// morning otherwise.
    pub fn for_local_time<Z: TimeZone>(local_now: &DateTime<Z>) -> Self {
        if DELIVERY_HOURS.contains(&local_now.hour()) {
            Self::Immediate
        } else {
            Self::Calendar(CalendarTrigger::morning())
        }
    }
}

/// Fires at a wall clock time in a fixed time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarTrigger {
    pub hour: u32,
    pub minute: u32,
    pub time_zone: Tz,
    pub repeats: bool,
}

impl CalendarTrigger {
    /// 08:00 in Amsterdam, once.
    pub fn morning() -> Self {
        Self {
            hour: 8,
            minute: 0,
            time_zone: chrono_tz::Europe::Amsterdam,
            repeats: false,
        }
    }

    /// The first instant strictly after `now` at which this trigger fires.
    ///
    /// Returns `None` only if the wall clock time does not exist on two consecutive
    /// days in the trigger's time zone.
    pub fn next_fire_date(&self, now: DateTime<Utc>) -> Option<DateTime<Tz>> {
        let local_now = now.with_timezone(&self.time_zone);
        let today = local_now.date_naive();
        [Some(today), today.checked_add_days(Days::new(1))]
            .into_iter()
            .flatten()
            .filter_map(|day| {
                day.and_hms_opt(self.hour, self.minute, 0)?
                    .and_local_timezone(self.time_zone)
                    .earliest()
            })
            .find(|candidate| *candidate > local_now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub identifier: String,
    pub content: NotificationContent,
    pub trigger: NotificationTrigger,
}

impl NotificationRequest {
    /// The notification telling the user that their lab uploads expired.
    pub fn upload_failed(body: impl Into<String>, local_now: &DateTime<FixedOffset>) -> Self {
        Self {
            identifier: UPLOAD_FAILED_IDENTIFIER.to_owned(),
            content: NotificationContent {
                body: body.into(),
                sound: NotificationSound::Default,
                badge: 0,
            },
            trigger: NotificationTrigger::for_local_time(local_now),
        }
    }
}
