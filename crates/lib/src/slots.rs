//! Availability slot computation for the clinic calendar.
//!
//! Candidate slots are generated on a fixed weekday grid in the clinic
//! timezone (America/Sao_Paulo), filtered against busy intervals from the
//! calendar, and formatted as a Portuguese patient-facing summary.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::America::Sao_Paulo;
use chrono_tz::Tz;

/// Clinic timezone. All grid arithmetic happens here, never in UTC.
pub const CLINIC_TZ: Tz = Sao_Paulo;

/// Appointment length in minutes.
pub const SLOT_MINUTES: i64 = 30;

/// Grid start and last start time. 09:00 through 17:00 inclusive at 30-minute
/// steps is 17 starts per day; the last slot ends 17:30.
const DAY_FIRST_SLOT: (u32, u32) = (9, 0);
const DAY_LAST_SLOT: (u32, u32) = (17, 0);

/// Stop searching once this many free slots have been collected.
pub const MAX_SLOTS: usize = 10;

/// How many slots the patient-facing summary lists individually.
const SUMMARY_SLOTS: usize = 5;

/// Monday-first weekday labels, matching `chrono::Weekday::num_days_from_monday`.
const WEEKDAYS_PT: [&str; 7] = [
    "Segunda", "Terça", "Quarta", "Quinta", "Sexta", "Sábado", "Domingo",
];

/// A half-open busy interval from the calendar, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One bookable slot in clinic time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl Slot {
    /// Overlap against a busy interval. Intervals are half-open, so a slot
    /// that merely touches a busy boundary is still free.
    fn overlaps(&self, busy: &BusyInterval) -> bool {
        let start = self.start.with_timezone(&Utc);
        let end = self.end.with_timezone(&Utc);
        start < busy.end && end > busy.start
    }

    /// "Segunda, 02/03 às 09:00"
    pub fn label(&self) -> String {
        let weekday = WEEKDAYS_PT[self.start.weekday().num_days_from_monday() as usize];
        format!(
            "{}, {} às {}",
            weekday,
            self.start.format("%d/%m"),
            self.start.format("%H:%M")
        )
    }
}

/// Resolve the date a search starts from. Unparseable or past dates fall
/// back to `now`; the original request string is not an error.
pub fn resolve_reference_date(reference: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = reference else { return now };
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("today") {
        return now;
    }
    let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        log::warn!("unparseable reference date {:?}, using today", raw);
        return now;
    };
    let Some(start_of_day) = CLINIC_TZ
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
    else {
        return now;
    };
    let start_of_day = start_of_day.with_timezone(&Utc);
    if start_of_day < now {
        now
    } else {
        start_of_day
    }
}

/// Find up to [`MAX_SLOTS`] free slots within `days_ahead` days of the
/// reference instant, skipping weekends and anything already started.
pub fn find_free_slots(
    busy: &[BusyInterval],
    reference: DateTime<Utc>,
    days_ahead: u32,
    now: DateTime<Utc>,
) -> Vec<Slot> {
    let mut free = Vec::new();
    let first_day = reference.with_timezone(&CLINIC_TZ).date_naive();

    for offset in 0..days_ahead as i64 {
        let Some(day) = first_day.checked_add_signed(Duration::days(offset)) else {
            break;
        };
        if day.weekday().num_days_from_monday() >= 5 {
            continue;
        }
        for slot in day_grid(day) {
            if slot.start.with_timezone(&Utc) < now {
                continue;
            }
            if busy.iter().any(|b| slot.overlaps(b)) {
                continue;
            }
            free.push(slot);
            if free.len() >= MAX_SLOTS {
                return free;
            }
        }
    }
    free
}

/// The candidate grid for one clinic day. Wall-clock times that do not
/// exist or are ambiguous in the clinic timezone (DST transitions) are
/// skipped rather than guessed.
fn day_grid(day: NaiveDate) -> Vec<Slot> {
    let mut grid = Vec::new();
    let (mut hour, mut minute) = DAY_FIRST_SLOT;
    loop {
        if let Some(start) = local_time(day, hour, minute) {
            if let Some(end) = start.checked_add_signed(Duration::minutes(SLOT_MINUTES)) {
                grid.push(Slot { start, end });
            }
        }
        if (hour, minute) == DAY_LAST_SLOT {
            break;
        }
        minute += SLOT_MINUTES as u32;
        if minute >= 60 {
            minute -= 60;
            hour += 1;
        }
    }
    grid
}

fn local_time(day: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let naive = day.and_time(NaiveTime::from_hms_opt(hour, minute, 0)?);
    CLINIC_TZ.from_local_datetime(&naive).single()
}

/// Patient-facing summary in Portuguese: first few slots as bullets plus
/// the total count, or a no-availability message.
pub fn format_slots(slots: &[Slot], procedure: &str, days_ahead: u32) -> String {
    if slots.is_empty() {
        return format!(
            "Não encontrei horários disponíveis nos próximos {} dias para {}. \
             Sugira ao paciente verificar outra semana.",
            days_ahead, procedure
        );
    }
    let bullets: Vec<String> = slots
        .iter()
        .take(SUMMARY_SLOTS)
        .map(|s| format!("- {}", s.label()))
        .collect();
    format!(
        "Horários disponíveis para {}:\n{}\n\nTotal: {} slots encontrados.",
        procedure,
        bullets.join("\n"),
        slots.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clinic(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        CLINIC_TZ
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("unambiguous clinic time")
            .with_timezone(&Utc)
    }

    fn busy(start: DateTime<Utc>, end: DateTime<Utc>) -> BusyInterval {
        BusyInterval { start, end }
    }

    #[test]
    fn day_grid_has_17_starts() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date");
        let grid = day_grid(day);
        assert_eq!(grid.len(), 17);
        assert_eq!(grid[0].label(), "Segunda, 02/03 às 09:00");
        assert_eq!(grid[16].label(), "Segunda, 02/03 às 17:00");
    }

    #[test]
    fn monday_with_no_busy_yields_capped_ascending_slots() {
        // 2026-03-02 is a Monday; search starts before opening.
        let now = clinic(2026, 3, 2, 7, 0);
        let slots = find_free_slots(&[], now, 1, now);
        assert_eq!(slots.len(), MAX_SLOTS);
        assert_eq!(slots[0].label(), "Segunda, 02/03 às 09:00");
        assert!(slots.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn weekends_are_skipped() {
        // 2026-03-07 is a Saturday.
        let now = clinic(2026, 3, 7, 7, 0);
        let slots = find_free_slots(&[], now, 2, now);
        assert!(slots.is_empty());
    }

    #[test]
    fn past_slots_are_excluded() {
        // Mid-Monday: 10:15 means 09:00, 09:30 and 10:00 are gone.
        let now = clinic(2026, 3, 2, 10, 15);
        let slots = find_free_slots(&[], now, 1, now);
        assert_eq!(slots.len(), 10);
        assert_eq!(slots[0].label(), "Segunda, 02/03 às 10:30");
    }

    #[test]
    fn busy_interval_excludes_only_overlapping_slot() {
        let now = clinic(2026, 3, 2, 7, 0);
        let b = busy(clinic(2026, 3, 2, 10, 0), clinic(2026, 3, 2, 10, 30));
        let slots = find_free_slots(&[b], now, 1, now);
        assert_eq!(slots.len(), 10);
        let labels: Vec<String> = slots.iter().map(Slot::label).collect();
        assert!(!labels.contains(&"Segunda, 02/03 às 10:00".to_string()));
        assert!(labels.contains(&"Segunda, 02/03 às 09:30".to_string()));
        assert!(labels.contains(&"Segunda, 02/03 às 10:30".to_string()));
    }

    #[test]
    fn boundary_touch_is_not_overlap() {
        let now = clinic(2026, 3, 2, 7, 0);
        // Busy 09:30-10:00: the 09:00-09:30 and 10:00-10:30 slots only touch it.
        let b = busy(clinic(2026, 3, 2, 9, 30), clinic(2026, 3, 2, 10, 0));
        let slots = find_free_slots(&[b], now, 1, now);
        let labels: Vec<String> = slots.iter().map(Slot::label).collect();
        assert!(labels.contains(&"Segunda, 02/03 às 09:00".to_string()));
        assert!(labels.contains(&"Segunda, 02/03 às 10:00".to_string()));
        assert!(!labels.contains(&"Segunda, 02/03 às 09:30".to_string()));
    }

    #[test]
    fn partial_overlap_blocks_slot() {
        let now = clinic(2026, 3, 2, 7, 0);
        // Busy 09:15-09:45 straddles both the 09:00 and 09:30 slots.
        let b = busy(clinic(2026, 3, 2, 9, 15), clinic(2026, 3, 2, 9, 45));
        let slots = find_free_slots(&[b], now, 1, now);
        let labels: Vec<String> = slots.iter().map(Slot::label).collect();
        assert!(!labels.contains(&"Segunda, 02/03 às 09:00".to_string()));
        assert!(!labels.contains(&"Segunda, 02/03 às 09:30".to_string()));
        assert!(labels.contains(&"Segunda, 02/03 às 10:00".to_string()));
    }

    #[test]
    fn search_stops_at_ten_slots() {
        let now = clinic(2026, 3, 2, 7, 0);
        let slots = find_free_slots(&[], now, 14, now);
        assert_eq!(slots.len(), MAX_SLOTS);
    }

    #[test]
    fn friday_label_uses_sexta() {
        // 2026-03-06 is a Friday.
        let now = clinic(2026, 3, 6, 7, 0);
        let slots = find_free_slots(&[], now, 1, now);
        assert_eq!(slots[0].label(), "Sexta, 06/03 às 09:00");
    }

    #[test]
    fn reference_date_in_future_is_respected() {
        let now = clinic(2026, 3, 2, 12, 0);
        let reference = resolve_reference_date(Some("2026-03-09"), now);
        let slots = find_free_slots(&[], reference, 1, now);
        assert_eq!(slots[0].label(), "Segunda, 09/03 às 09:00");
    }

    #[test]
    fn reference_date_in_past_falls_back_to_now() {
        let now = clinic(2026, 3, 2, 12, 0);
        assert_eq!(resolve_reference_date(Some("2020-01-01"), now), now);
    }

    #[test]
    fn unparseable_reference_falls_back_to_now() {
        let now = clinic(2026, 3, 2, 12, 0);
        assert_eq!(resolve_reference_date(Some("next tuesday"), now), now);
        assert_eq!(resolve_reference_date(Some("today"), now), now);
        assert_eq!(resolve_reference_date(None, now), now);
    }

    #[test]
    fn summary_lists_first_five_and_total() {
        let now = clinic(2026, 3, 2, 7, 0);
        let slots = find_free_slots(&[], now, 14, now);
        let text = format_slots(&slots, "botox", 14);
        assert!(text.starts_with("Horários disponíveis para botox:\n"));
        assert_eq!(text.matches("- ").count(), 5);
        assert!(text.ends_with("Total: 10 slots encontrados."));
    }

    #[test]
    fn empty_summary_suggests_widening_search() {
        let text = format_slots(&[], "limpeza de pele", 7);
        assert!(text.contains("próximos 7 dias"));
        assert!(text.contains("limpeza de pele"));
    }
}
