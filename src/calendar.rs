use chrono::{Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::US::Eastern;

/// Source of "today" so the calendar can be pinned in tests.
pub trait Clock: Send + Sync {
    fn today_eastern(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today_eastern(&self) -> NaiveDate {
        Utc::now().with_timezone(&Eastern).date_naive()
    }
}

/// Fixed clock for tests.
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today_eastern(&self) -> NaiveDate {
        self.0
    }
}

/// US equity trading calendar: weekends plus the NYSE full-closure holidays.
///
/// All dates flowing through the batch engine are trading dates produced by
/// this calendar; wall-clock dates are converted at the boundary.
pub struct TradingCalendar {
    clock: Box<dyn Clock>,
}

impl TradingCalendar {
    pub fn new() -> Self {
        Self { clock: Box::new(SystemClock) }
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn is_trading_day(&self, d: NaiveDate) -> bool {
        !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) && !is_us_market_holiday(d)
    }

    /// Today in US/Eastern, rolled back to the latest trading day.
    pub fn most_recent_trading_day(&self) -> NaiveDate {
        self.most_recent_trading_day_on_or_before(self.clock.today_eastern())
    }

    pub fn most_recent_trading_day_on_or_before(&self, mut d: NaiveDate) -> NaiveDate {
        while !self.is_trading_day(d) {
            d = d.pred_opt().expect("date underflow rolling back trading day");
        }
        d
    }

    /// Inclusive list of trading days in [start, end], ascending.
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut d = start;
        while d <= end {
            if self.is_trading_day(d) {
                days.push(d);
            }
            match d.succ_opt() {
                Some(next) => d = next,
                None => break,
            }
        }
        days
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new()
    }
}

/// NYSE full-closure holidays, observed dates.
fn is_us_market_holiday(d: NaiveDate) -> bool {
    let (m, day) = (d.month(), d.day());
    let wd = d.weekday();

    // New Year's Day (observed Monday when Jan 1 is a Sunday)
    if m == 1 && day == 1 {
        return true;
    }
    if m == 1 && day == 2 && wd == Weekday::Mon {
        return true;
    }
    // MLK Day: third Monday of January
    if m == 1 && wd == Weekday::Mon && (15..=21).contains(&day) {
        return true;
    }
    // Presidents' Day: third Monday of February
    if m == 2 && wd == Weekday::Mon && (15..=21).contains(&day) {
        return true;
    }
    // Good Friday
    if is_good_friday(d) {
        return true;
    }
    // Memorial Day: last Monday of May
    if m == 5 && wd == Weekday::Mon && day >= 25 {
        return true;
    }
    // Juneteenth (observed)
    if m == 6 && day == 19 && !matches!(wd, Weekday::Sat | Weekday::Sun) {
        return true;
    }
    if m == 6 && day == 18 && wd == Weekday::Fri {
        return true;
    }
    if m == 6 && day == 20 && wd == Weekday::Mon {
        return true;
    }
    // Independence Day (observed)
    if m == 7 && day == 4 && !matches!(wd, Weekday::Sat | Weekday::Sun) {
        return true;
    }
    if m == 7 && day == 3 && wd == Weekday::Fri {
        return true;
    }
    if m == 7 && day == 5 && wd == Weekday::Mon {
        return true;
    }
    // Labor Day: first Monday of September
    if m == 9 && wd == Weekday::Mon && day <= 7 {
        return true;
    }
    // Thanksgiving: fourth Thursday of November
    if m == 11 && wd == Weekday::Thu && (22..=28).contains(&day) {
        return true;
    }
    // Christmas (observed)
    if m == 12 && day == 25 && !matches!(wd, Weekday::Sat | Weekday::Sun) {
        return true;
    }
    if m == 12 && day == 24 && wd == Weekday::Fri {
        return true;
    }
    if m == 12 && day == 26 && wd == Weekday::Mon {
        return true;
    }

    false
}

/// Good Friday via the anonymous Gregorian Easter computus.
fn is_good_friday(d: NaiveDate) -> bool {
    let y = d.year();
    let a = y % 19;
    let b = y / 100;
    let c = y % 100;
    let dd = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - dd - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    let easter = NaiveDate::from_ymd_opt(y, month as u32, day as u32)
        .expect("easter computus produced an invalid date");
    easter.pred_opt().and_then(|s| s.pred_opt()) == Some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fixed(date: NaiveDate) -> TradingCalendar {
        TradingCalendar::with_clock(Box::new(FixedClock(date)))
    }

    #[test]
    fn test_weekends_are_not_trading_days() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(d(2026, 1, 3))); // Saturday
        assert!(!cal.is_trading_day(d(2026, 1, 4))); // Sunday
        assert!(cal.is_trading_day(d(2026, 1, 5))); // Monday
    }

    #[test]
    fn test_fixed_holidays() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(d(2026, 1, 1))); // New Year
        assert!(!cal.is_trading_day(d(2026, 7, 3))); // July 4 observed (Saturday -> Friday)
        assert!(!cal.is_trading_day(d(2026, 12, 25))); // Christmas (Friday)
        assert!(!cal.is_trading_day(d(2025, 12, 25))); // Christmas (Thursday)
    }

    #[test]
    fn test_floating_holidays() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(d(2026, 1, 19))); // MLK: third Monday of Jan
        assert!(!cal.is_trading_day(d(2026, 2, 16))); // Presidents' Day
        assert!(!cal.is_trading_day(d(2026, 5, 25))); // Memorial Day
        assert!(!cal.is_trading_day(d(2026, 9, 7))); // Labor Day
        assert!(!cal.is_trading_day(d(2026, 11, 26))); // Thanksgiving
    }

    #[test]
    fn test_good_friday() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(d(2026, 4, 3)));
        assert!(!cal.is_trading_day(d(2025, 4, 18)));
        assert!(cal.is_trading_day(d(2026, 4, 6))); // Easter Monday is open
    }

    #[test]
    fn test_most_recent_rolls_back_weekend() {
        let cal = fixed(d(2026, 1, 4)); // Sunday
        assert_eq!(cal.most_recent_trading_day(), d(2026, 1, 2));
    }

    #[test]
    fn test_most_recent_rolls_back_holiday() {
        // Thanksgiving Thursday rolls back to Wednesday
        let cal = fixed(d(2026, 11, 26));
        assert_eq!(cal.most_recent_trading_day(), d(2026, 11, 25));
    }

    #[test]
    fn test_trading_days_between_inclusive() {
        let cal = TradingCalendar::new();
        // Mon 2026-01-05 .. Fri 2026-01-09: five trading days
        let days = cal.trading_days_between(d(2026, 1, 5), d(2026, 1, 9));
        assert_eq!(days.len(), 5);
        assert_eq!(days[0], d(2026, 1, 5));
        assert_eq!(days[4], d(2026, 1, 9));
    }

    #[test]
    fn test_trading_days_between_skips_holiday() {
        let cal = TradingCalendar::new();
        // Week of MLK 2026 (Mon Jan 19 closed)
        let days = cal.trading_days_between(d(2026, 1, 16), d(2026, 1, 23));
        assert!(!days.contains(&d(2026, 1, 19)));
        assert_eq!(days.len(), 5); // Fri + Tue..Fri
    }
}
