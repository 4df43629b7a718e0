//! Authoritative schedule arithmetic.
//!
//! The server owns the counters: a pass increments `successes` (a failure
//! never resets it), mastery is recomputed every time, and the next review
//! date follows a Fibonacci interval pair. The applied gap is the pre-step
//! `next_2`, so from (1, 1) the day gaps run 1, 2, 3, 5, 8, ...

use chrono::{Duration, NaiveDateTime};

use super::{MASTERY_THRESHOLD, ScheduleRecord};

/// Applies one review outcome and returns the updated record.
///
/// Mastered records whose review date is still in the future only get the
/// date pushed forward (no-op renewal); mastered records that are due or
/// were never scheduled take a full Fibonacci step. Non-mastered records
/// keep their intervals and are scheduled immediately if they never were.
pub fn apply_outcome(record: &ScheduleRecord, passed: bool, now: NaiveDateTime) -> ScheduleRecord {
    let mut next = record.clone();

    if passed {
        next.successes = record.successes + 1;
    }
    next.is_master = next.successes >= MASTERY_THRESHOLD;

    if next.is_master {
        match record.revise_at {
            Some(at) if now < at => {
                // Review not due: extend revise_at, keep next_1 and next_2 unchanged
                next.revise_at = Some(now + Duration::days(i64::from(record.next_2)));
            }
            _ => {
                // Review due/overdue or never scheduled: full Fibonacci step
                next.revise_at = Some(now + Duration::days(i64::from(record.next_2)));
                next.next_1 = record.next_2;
                next.next_2 = record.next_1 + record.next_2;
            }
        }
    } else {
        next.revise_at = record.revise_at.or(Some(now));
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(successes: i32, next_1: i32, next_2: i32) -> ScheduleRecord {
        ScheduleRecord {
            successes,
            is_master: successes >= MASTERY_THRESHOLD,
            next_1,
            next_2,
            ..ScheduleRecord::fresh(7, "question".into(), Some("answer".into()))
        }
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn pass_increments_successes_and_fail_keeps_them() {
        let now = at(1, 12);
        let rec = record(1, 1, 1);

        let passed = apply_outcome(&rec, true, now);
        assert_eq!(passed.successes, 2);
        assert!(!passed.is_master);

        let failed = apply_outcome(&rec, false, now);
        assert_eq!(failed.successes, 1);
    }

    #[test]
    fn mastery_recomputed_at_threshold() {
        let now = at(1, 12);
        let promoted = apply_outcome(&record(2, 1, 1), true, now);
        assert!(promoted.is_master);
        assert_eq!(promoted.successes, 3);
    }

    #[test]
    fn fibonacci_growth_over_three_due_reviews() {
        // Start at (1, 1) and review each time the record comes due.
        let mut rec = record(3, 1, 1);
        let mut now = at(1, 0);
        let mut gaps = Vec::new();

        for _ in 0..3 {
            let before = rec.clone();
            rec = apply_outcome(&rec, true, now);
            let gap = rec.revise_at.unwrap() - now;
            gaps.push(gap.num_days());
            assert_eq!(rec.next_1, before.next_2);
            assert_eq!(rec.next_2, before.next_1 + before.next_2);
            now = rec.revise_at.unwrap() + Duration::hours(1);
        }

        assert_eq!(gaps, vec![1, 2, 3]);
        assert_eq!((rec.next_1, rec.next_2), (3, 5));
    }

    #[test]
    fn renewal_when_not_yet_due_keeps_intervals() {
        let now = at(10, 12);
        let mut rec = record(4, 2, 3);
        rec.revise_at = Some(at(20, 12));

        let renewed = apply_outcome(&rec, true, now);
        assert_eq!(renewed.next_1, 2);
        assert_eq!(renewed.next_2, 3);
        assert_eq!(renewed.revise_at, Some(now + Duration::days(3)));

        // Repeating the outcome while still not due stays a renewal.
        let again = apply_outcome(&renewed, true, now + Duration::hours(1));
        assert_eq!(again.next_1, 2);
        assert_eq!(again.next_2, 3);
    }

    #[test]
    fn non_mastered_record_keeps_intervals_and_gets_scheduled_once() {
        let now = at(3, 9);
        let unscheduled = record(0, 1, 1);
        let updated = apply_outcome(&unscheduled, false, now);
        assert_eq!(updated.revise_at, Some(now));
        assert_eq!((updated.next_1, updated.next_2), (1, 1));

        let mut scheduled = record(1, 1, 1);
        scheduled.revise_at = Some(at(2, 9));
        let kept = apply_outcome(&scheduled, false, now);
        assert_eq!(kept.revise_at, Some(at(2, 9)));
    }
}
