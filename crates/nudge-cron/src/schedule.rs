//! Pure schedule evaluation: schedule + "last fired" marker → next fire time.
//!
//! Cron expressions are evaluated over local wall-clock time in the job's
//! timezone, so daylight-saving transitions follow local semantics. A match
//! that lands on a nonexistent local time (spring-forward gap) rounds
//! forward to the first valid local minute; an ambiguous local time
//! (fall-back overlap) resolves to the earlier instant.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use nudge_types::Schedule;

use crate::parse::CronExpr;

/// One cron granule. A fire instant within this window of "now" is still
/// considered upcoming rather than missed, so a boundary that just passed
/// fires promptly instead of waiting a full cycle.
const EPSILON_SECS: i64 = 60;

/// How far ahead the cron walk searches before giving up. Bounds
/// expressions that can never match (e.g. `0 0 30 2 *`).
const SEARCH_HORIZON_DAYS: i64 = 365 * 4 + 1;

/// Compute the next fire time for a schedule, or `None` if it will never
/// fire again. Assumes the schedule was validated at add time; a malformed
/// expression or timezone yields `None` rather than a panic.
pub fn next_fire_time(
    schedule: &Schedule,
    last_fired_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Cron { expr, tz } => {
            let expr = CronExpr::parse(expr).ok()?;
            let tz: Tz = tz.as_deref().unwrap_or("UTC").parse().ok()?;
            let floor = now - Duration::seconds(EPSILON_SECS);
            let base = match last_fired_at {
                Some(last) => last.max(floor),
                None => floor,
            };
            next_cron_match(&expr, tz, base)
        }
        Schedule::Every { seconds } => Some(match last_fired_at {
            Some(last) => last + Duration::seconds(*seconds as i64),
            // Never fired: due immediately, then recurs from each fire.
            None => now,
        }),
        Schedule::At { at } => match last_fired_at {
            // Fires even when already past due, but only once.
            None => Some(*at),
            Some(_) => None,
        },
    }
}

/// Earliest instant strictly after `base` matching the expression in `tz`.
fn next_cron_match(expr: &CronExpr, tz: Tz, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local = base.with_timezone(&tz).naive_local();
    let mut cur = truncate_to_minute(local) + Duration::minutes(1);
    let horizon = cur.date() + Duration::days(SEARCH_HORIZON_DAYS);

    while cur.date() <= horizon {
        if !expr.matches_month(cur.month()) {
            cur = first_of_next_month(cur.date())?;
            continue;
        }
        if !expr.matches_day(cur.day(), cur.weekday().num_days_from_sunday()) {
            cur = cur.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
            continue;
        }
        if !expr.matches_hour(cur.hour()) {
            cur = cur.with_minute(0)? + Duration::hours(1);
            continue;
        }
        if !expr.matches_minute(cur.minute()) {
            cur += Duration::minutes(1);
            continue;
        }
        // Wall-clock match; resolve to an instant.
        match resolve_local(tz, cur) {
            Some(instant) if instant > base => return Some(instant),
            // Rounded forward past a gap to an instant not after base,
            // or unresolvable: keep walking.
            _ => cur += Duration::minutes(1),
        }
    }
    None
}

/// Map a local wall-clock time to a UTC instant. Nonexistent times (inside
/// a spring-forward gap) round forward to the first valid local minute;
/// ambiguous times take the earlier of the two instants.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut probe = naive;
    // DST gaps are at most a few hours; 26h covers any offset change.
    for _ in 0..(26 * 60) {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, _) => return Some(earlier.with_timezone(&Utc)),
            LocalResult::None => probe += Duration::minutes(1),
        }
    }
    None
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn cron(expr: &str, tz: Option<&str>) -> Schedule {
        Schedule::Cron {
            expr: expr.into(),
            tz: tz.map(String::from),
        }
    }

    #[test]
    fn test_every_first_fire_is_immediate() {
        let now = utc(2024, 5, 1, 12, 0, 0);
        let next = next_fire_time(&Schedule::Every { seconds: 60 }, None, now);
        assert_eq!(next, Some(now));
    }

    #[test]
    fn test_every_recurs_from_last_fire() {
        let now = utc(2024, 5, 1, 12, 0, 0);
        let next = next_fire_time(&Schedule::Every { seconds: 60 }, Some(now), now);
        assert_eq!(next, Some(utc(2024, 5, 1, 12, 1, 0)));
    }

    #[test]
    fn test_at_fires_once() {
        let at = utc(2024, 5, 2, 8, 0, 0);
        let now = utc(2024, 5, 1, 12, 0, 0);
        let sched = Schedule::At { at };
        assert_eq!(next_fire_time(&sched, None, now), Some(at));
        // Past due but never fired: still due, promptly.
        assert_eq!(next_fire_time(&sched, None, utc(2024, 5, 3, 0, 0, 0)), Some(at));
        // Fired: exhausted forever.
        assert_eq!(next_fire_time(&sched, Some(utc(2024, 5, 2, 8, 0, 1)), now), None);
    }

    #[test]
    fn test_cron_daily_in_utc() {
        let now = utc(2024, 5, 1, 10, 30, 0);
        let next = next_fire_time(&cron("0 9 * * *", None), None, now).unwrap();
        assert_eq!(next, utc(2024, 5, 2, 9, 0, 0));
    }

    #[test]
    fn test_cron_strictly_after_last_fired() {
        let fired = utc(2024, 5, 1, 9, 0, 0);
        let next = next_fire_time(&cron("0 9 * * *", None), Some(fired), fired).unwrap();
        assert!(next > fired);
        assert_eq!(next, utc(2024, 5, 2, 9, 0, 0));
    }

    #[test]
    fn test_cron_boundary_within_epsilon_fires_promptly() {
        // 09:00 passed 30 seconds ago and was never fired: still due.
        let now = utc(2024, 5, 1, 9, 0, 30);
        let next = next_fire_time(&cron("0 9 * * *", None), None, now).unwrap();
        assert_eq!(next, utc(2024, 5, 1, 9, 0, 0));
    }

    #[test]
    fn test_cron_in_timezone() {
        // 09:00 America/Vancouver is 16:00 UTC during PDT.
        let now = utc(2024, 5, 1, 12, 0, 0);
        let next = next_fire_time(&cron("0 9 * * *", Some("America/Vancouver")), None, now).unwrap();
        assert_eq!(next, utc(2024, 5, 1, 16, 0, 0));
    }

    #[test]
    fn test_cron_minute_interval() {
        let now = utc(2024, 5, 1, 12, 7, 10);
        let next = next_fire_time(&cron("*/15 * * * *", None), None, now).unwrap();
        assert_eq!(next, utc(2024, 5, 1, 12, 15, 0));
    }

    #[test]
    fn test_cron_dst_gap_rounds_forward() {
        // US spring-forward 2024-03-10: 02:00-03:00 local does not exist in
        // America/Los_Angeles. 02:30 rounds forward to 03:00 PDT (10:00 UTC).
        let now = utc(2024, 3, 10, 8, 0, 0); // 00:00 PST
        let next =
            next_fire_time(&cron("30 2 * * *", Some("America/Los_Angeles")), None, now).unwrap();
        assert_eq!(next, utc(2024, 3, 10, 10, 0, 0));
    }

    #[test]
    fn test_cron_dst_overlap_takes_earlier() {
        // US fall-back 2024-11-03: 01:30 local happens twice in
        // America/Los_Angeles. The earlier instant is 01:30 PDT (08:30 UTC).
        let now = utc(2024, 11, 3, 7, 0, 0); // 00:00 PDT
        let next =
            next_fire_time(&cron("30 1 * * *", Some("America/Los_Angeles")), None, now).unwrap();
        assert_eq!(next, utc(2024, 11, 3, 8, 30, 0));
    }

    #[test]
    fn test_cron_weekday_names() {
        // 2024-05-01 is a Wednesday; next Monday is 2024-05-06.
        let now = utc(2024, 5, 1, 12, 0, 0);
        let next = next_fire_time(&cron("0 9 * * mon", None), None, now).unwrap();
        assert_eq!(next, utc(2024, 5, 6, 9, 0, 0));
    }

    #[test]
    fn test_cron_impossible_expression_exhausts() {
        // February 30th never exists.
        let now = utc(2024, 5, 1, 12, 0, 0);
        assert_eq!(next_fire_time(&cron("0 0 30 2 *", None), None, now), None);
    }

    #[test]
    fn test_cron_matches_expression_repeatedly() {
        // Walking the schedule forward always yields strictly increasing
        // instants that land on the expression.
        let mut last = None;
        let now = utc(2024, 5, 1, 0, 0, 0);
        let sched = cron("0 */6 * * *", None);
        for _ in 0..8 {
            let next = next_fire_time(&sched, last, now).unwrap();
            if let Some(prev) = last {
                assert!(next > prev);
            }
            assert_eq!(next.minute(), 0);
            assert_eq!(next.hour() % 6, 0);
            last = Some(next);
        }
    }
}
