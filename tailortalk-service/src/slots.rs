//! Free-slot computation.
//!
//! Pure functions over busy intervals: no clocks, no I/O. The engine feeds
//! this from `CalendarGateway::query_busy` and offers the result to the user.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::calendar::{TimeSlot, merge_slots};

/// Constraints for one slot search
#[derive(Debug, Clone)]
pub struct SlotQuery {
    /// Search window start (inclusive)
    pub earliest: DateTime<Utc>,
    /// Search window end (exclusive)
    pub latest: DateTime<Utc>,
    /// Required appointment length
    pub duration: Duration,
    /// Timezone the working-hours mask is expressed in
    pub timezone: Tz,
    /// Daily working hours (start, end), local to `timezone`
    pub workday: (NaiveTime, NaiveTime),
    /// Cap on the number of returned slots
    pub max_offers: usize,
}

/// Compute candidate slots, earliest first.
///
/// The free complement of the busy set is intersected with the per-day
/// working-hours mask, then each free segment is tiled with consecutive
/// `duration`-length slots from its earliest point. An empty or inverted
/// window yields an empty result rather than an error.
pub fn find_slots(busy: &[TimeSlot], query: &SlotQuery) -> Vec<TimeSlot> {
    if query.latest <= query.earliest
        || query.duration <= Duration::zero()
        || query.duration > query.latest - query.earliest
        || query.max_offers == 0
    {
        return Vec::new();
    }

    let merged = merge_slots(busy.to_vec());

    let mut slots = Vec::with_capacity(query.max_offers);
    let mut cursor = query.earliest;
    for interval in merged.iter().filter(|b| b.end > query.earliest) {
        if interval.start >= query.latest {
            break;
        }
        if interval.start > cursor {
            tile_gap(cursor, interval.start.min(query.latest), query, &mut slots);
            if slots.len() >= query.max_offers {
                return slots;
            }
        }
        cursor = cursor.max(interval.end);
    }
    if cursor < query.latest {
        tile_gap(cursor, query.latest, query, &mut slots);
    }

    slots
}

/// Tile one free gap with candidate slots, clipped to the working-hours mask
fn tile_gap(
    gap_start: DateTime<Utc>,
    gap_end: DateTime<Utc>,
    query: &SlotQuery,
    slots: &mut Vec<TimeSlot>,
) {
    let mut day = gap_start.with_timezone(&query.timezone).date_naive();
    let last_day = gap_end.with_timezone(&query.timezone).date_naive();

    while day <= last_day && slots.len() < query.max_offers {
        let (segment_start, segment_end) = match (
            local_instant(day.and_time(query.workday.0), query.timezone),
            local_instant(day.and_time(query.workday.1), query.timezone),
        ) {
            (Some(open), Some(close)) => (open.max(gap_start), close.min(gap_end)),
            // Local time skipped by a transition; no slots on this day
            _ => match day.succ_opt() {
                Some(next) => {
                    day = next;
                    continue;
                }
                None => break,
            },
        };

        let mut start = segment_start;
        while start + query.duration <= segment_end && slots.len() < query.max_offers {
            slots.push(TimeSlot {
                start,
                end: start + query.duration,
            });
            start += query.duration;
        }

        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
}

fn local_instant(naive: chrono::NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    fn ist(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2025, 7, day, hour, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn query(earliest: DateTime<Utc>, latest: DateTime<Utc>, minutes: i64) -> SlotQuery {
        SlotQuery {
            earliest,
            latest,
            duration: Duration::minutes(minutes),
            timezone: Kolkata,
            workday: (
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            ),
            max_offers: 3,
        }
    }

    #[test]
    fn worked_example_tuesday_morning() {
        // Tue Jul 8 2025, window 09:00-18:00 IST, one busy hour at 13:00
        let busy = vec![TimeSlot {
            start: ist(8, 13, 0),
            end: ist(8, 14, 0),
        }];
        let q = query(ist(8, 9, 0), ist(8, 18, 0), 60);

        let slots = find_slots(&busy, &q);
        assert_eq!(
            slots,
            vec![
                TimeSlot { start: ist(8, 9, 0), end: ist(8, 10, 0) },
                TimeSlot { start: ist(8, 10, 0), end: ist(8, 11, 0) },
                TimeSlot { start: ist(8, 11, 0), end: ist(8, 12, 0) },
            ]
        );
    }

    #[test]
    fn empty_window_is_empty() {
        let q = query(ist(8, 18, 0), ist(8, 9, 0), 60);
        assert!(find_slots(&[], &q).is_empty());

        let q = query(ist(8, 9, 0), ist(8, 9, 0), 60);
        assert!(find_slots(&[], &q).is_empty());
    }

    #[test]
    fn duration_longer_than_window_is_empty() {
        let q = query(ist(8, 9, 0), ist(8, 10, 0), 120);
        assert!(find_slots(&[], &q).is_empty());
    }

    #[test]
    fn no_busy_rounds_up_to_working_hours() {
        // Window opens at 06:00, before the workday; first offer is at 09:00
        let q = query(ist(8, 6, 0), ist(8, 18, 0), 60);
        let slots = find_slots(&[], &q);
        assert_eq!(slots[0].start, ist(8, 9, 0));
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn window_outside_working_hours_is_empty() {
        let q = query(ist(8, 19, 0), ist(8, 23, 0), 60);
        assert!(find_slots(&[], &q).is_empty());
    }

    #[test]
    fn slots_avoid_busy_intervals_and_stay_in_window() {
        let busy = vec![
            TimeSlot { start: ist(8, 9, 0), end: ist(8, 11, 30) },
            TimeSlot { start: ist(8, 12, 0), end: ist(8, 16, 0) },
        ];
        let q = query(ist(8, 9, 0), ist(8, 18, 0), 45);

        let slots = find_slots(&busy, &q);
        assert!(!slots.is_empty());
        for slot in &slots {
            assert!(slot.start >= q.earliest && slot.end <= q.latest);
            assert!(busy.iter().all(|b| !b.overlaps(slot)));
        }
        // Earliest fit: the 11:30-12:00 gap is too short for 45 minutes,
        // so the first offer lands right after the second busy block.
        assert_eq!(slots[0].start, ist(8, 16, 0));
    }

    #[test]
    fn earliest_fit_never_skips_a_usable_gap() {
        let busy = vec![TimeSlot { start: ist(8, 10, 0), end: ist(8, 10, 30) }];
        let q = query(ist(8, 9, 0), ist(8, 18, 0), 30);

        let slots = find_slots(&busy, &q);
        // Both halves of the 09:00-10:00 gap come before anything later
        assert_eq!(slots[0].start, ist(8, 9, 0));
        assert_eq!(slots[1].start, ist(8, 9, 30));
        assert_eq!(slots[2].start, ist(8, 10, 30));
    }

    #[test]
    fn search_spans_multiple_days() {
        // Tuesday is fully booked during working hours; offers roll to Wednesday
        let busy = vec![TimeSlot { start: ist(8, 9, 0), end: ist(8, 18, 0) }];
        let q = query(ist(8, 9, 0), ist(9, 18, 0), 60);

        let slots = find_slots(&busy, &q);
        assert_eq!(slots[0].start, ist(9, 9, 0));
    }

    #[test]
    fn result_is_capped() {
        let q = query(ist(8, 9, 0), ist(8, 18, 0), 30);
        assert_eq!(find_slots(&[], &q).len(), 3);
    }

    #[test]
    fn unsorted_overlapping_busy_input_is_tolerated() {
        let busy = vec![
            TimeSlot { start: ist(8, 12, 0), end: ist(8, 14, 0) },
            TimeSlot { start: ist(8, 13, 0), end: ist(8, 15, 0) },
            TimeSlot { start: ist(8, 9, 0), end: ist(8, 10, 0) },
        ];
        let q = query(ist(8, 9, 0), ist(8, 18, 0), 60);

        let slots = find_slots(&busy, &q);
        assert_eq!(slots[0].start, ist(8, 10, 0));
        assert_eq!(slots[1].start, ist(8, 11, 0));
        assert_eq!(slots[2].start, ist(8, 15, 0));
    }
}
