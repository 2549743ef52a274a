//! Business-hours window used by campaign pacing and warm-up admission

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc, Weekday,
};
use mailramp_common::config::BusinessHoursConfig;

/// Daily sending window in a fixed local offset
#[derive(Debug, Clone, Copy)]
pub struct BusinessHours {
    enabled: bool,
    start_hour: u32,
    end_hour: u32,
    weekdays_only: bool,
    offset: FixedOffset,
}

impl BusinessHours {
    pub fn new(config: &BusinessHoursConfig) -> Self {
        let start_hour = config.start_hour.min(23);
        let end_hour = config.end_hour.clamp(start_hour + 1, 24);
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or(Utc.fix());

        Self {
            enabled: config.enabled,
            start_hour,
            end_hour,
            weekdays_only: config.weekdays_only,
            offset,
        }
    }

    /// A window that is always open; openings still fall on `start_hour`
    pub fn always_open() -> Self {
        Self::new(&BusinessHoursConfig {
            enabled: false,
            ..BusinessHoursConfig::default()
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of `at` in the local offset
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    fn is_business_day(&self, date: NaiveDate) -> bool {
        if !(self.enabled && self.weekdays_only) {
            return true;
        }
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let local = at.with_timezone(&self.offset);
        self.is_business_day(local.date_naive())
            && local.hour() >= self.start_hour
            && local.hour() < self.end_hour
    }

    /// Opening instant (`start_hour` local) of the given date
    pub fn opening_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let start = NaiveTime::from_hms_opt(self.start_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let local = date.and_time(start);
        let utc = local - Duration::seconds(self.offset.local_minus_utc() as i64);
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }

    /// `at` itself when open, else the next opening
    pub fn next_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_open(at) {
            return at;
        }

        let local = at.with_timezone(&self.offset);
        let today = local.date_naive();
        if self.is_business_day(today) && local.hour() < self.start_hour {
            return self.opening_on(today);
        }

        self.first_opening_after(today)
    }

    /// First opening on a later local date than `at`
    pub fn next_day_opening(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.first_opening_after(self.local_date(at))
    }

    fn first_opening_after(&self, date: NaiveDate) -> DateTime<Utc> {
        let mut day = date;
        for _ in 0..7 {
            day = day.succ_opt().unwrap_or(day);
            if self.is_business_day(day) {
                return self.opening_on(day);
            }
        }
        self.opening_on(day)
    }
}

/// Top of the hour following `at`
pub fn next_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    let floored = at
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(at);
    floored + Duration::hours(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn hours() -> BusinessHours {
        BusinessHours::new(&BusinessHoursConfig::default())
    }

    #[test]
    fn test_open_window() {
        let bh = hours();
        // 2024-03-04 is a Monday
        assert!(bh.is_open(Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()));
        assert!(bh.is_open(Utc.with_ymd_and_hms(2024, 3, 4, 16, 59, 59).unwrap()));
        assert!(!bh.is_open(Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap()));
        assert!(!bh.is_open(Utc.with_ymd_and_hms(2024, 3, 4, 8, 59, 0).unwrap()));
        assert!(!bh.is_open(Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_next_open_skips_weekend() {
        let bh = hours();
        let friday_evening = Utc.with_ymd_and_hms(2024, 3, 8, 18, 0, 0).unwrap();
        assert_eq!(
            bh.next_open(friday_evening),
            Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap()
        );

        let early = Utc.with_ymd_and_hms(2024, 3, 5, 6, 30, 0).unwrap();
        assert_eq!(bh.next_open(early), Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_next_day_opening() {
        let bh = hours();
        let tuesday_noon = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        assert_eq!(
            bh.next_day_opening(tuesday_noon),
            Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_offset_is_applied() {
        let bh = BusinessHours::new(&BusinessHoursConfig {
            utc_offset_minutes: -300,
            ..BusinessHoursConfig::default()
        });
        // 09:00 at UTC-5 is 14:00 UTC
        assert!(!bh.is_open(Utc.with_ymd_and_hms(2024, 3, 4, 13, 59, 0).unwrap()));
        assert!(bh.is_open(Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap()));
        assert_eq!(
            bh.opening_on(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()),
            Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_disabled_is_always_open() {
        let bh = BusinessHours::always_open();
        let sunday_night = Utc.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).unwrap();
        assert!(bh.is_open(sunday_night));
        assert_eq!(bh.next_open(sunday_night), sunday_night);
    }

    #[test]
    fn test_next_hour() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 41, 12).unwrap();
        assert_eq!(next_hour(at), Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap());
    }
}
