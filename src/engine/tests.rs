use super::*;
use crate::clock::FixedClock;
use crate::limits::*;
use chrono::NaiveDate;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
/// 2025-10-03T00:00Z
const OCT_3_UTC: Ms = 1_759_449_600_000;
/// 2025-10-03 10:00 PDT
const OCT_3_TEN_AM: Ms = OCT_3_UTC + 17 * H;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("vetslot_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn t(s: &str) -> ClockTime {
    ClockTime::parse(s).unwrap()
}

fn pacific() -> PracticeSettings {
    PracticeSettings {
        timezone: "US/Pacific".into(),
        ..PracticeSettings::default()
    }
}

fn new_engine(path: PathBuf) -> Engine {
    Engine::new(path, Arc::new(FixedClock::new(OCT_3_UTC))).unwrap()
}

/// Practice in `settings` with one vet. Returns (practice, vet).
async fn practice_with_vet(engine: &Engine, settings: PracticeSettings) -> (Ulid, Ulid) {
    let pid = Ulid::new();
    let vid = Ulid::new();
    engine.register_practice(pid, None, settings).await.unwrap();
    engine.register_vet(vid, pid, None).await.unwrap();
    (pid, vid)
}

async fn hours(engine: &Engine, vid: Ulid, d: NaiveDate, start: &str, end: &str) {
    engine
        .add_availability(vid, d, t(start), t(end), BlockType::Available)
        .await
        .unwrap();
}

async fn book_at(engine: &Engine, vid: Ulid, start: Ms, minutes: u32) -> Result<Appointment, EngineError> {
    engine
        .book(Ulid::new(), vid, start, minutes, AppointmentMetadata::default())
        .await
}

fn starts(slots: &[Slot]) -> Vec<String> {
    slots.iter().map(|s| s.local_start.to_string()).collect()
}

// ── Registry ─────────────────────────────────────────────

#[tokio::test]
async fn register_practice_validates_settings() {
    let engine = new_engine(test_wal_path("register_validates.wal"));
    let bad_tz = PracticeSettings {
        timezone: "Atlantis/Capital".into(),
        ..PracticeSettings::default()
    };
    assert!(matches!(
        engine.register_practice(Ulid::new(), None, bad_tz).await,
        Err(EngineError::InvalidTimezone(_))
    ));

    let bad_grid = PracticeSettings {
        granularity_min: 1,
        ..PracticeSettings::default()
    };
    assert!(engine.register_practice(Ulid::new(), None, bad_grid).await.is_err());

    let pid = Ulid::new();
    engine.register_practice(pid, Some("Harbor".into()), pacific()).await.unwrap();
    assert!(matches!(
        engine.register_practice(pid, None, pacific()).await,
        Err(EngineError::AlreadyExists(id)) if id == pid
    ));
    assert_eq!(engine.get_practice(pid).unwrap().settings.timezone, "US/Pacific");
}

#[tokio::test]
async fn register_vet_requires_practice() {
    let engine = new_engine(test_wal_path("vet_requires_practice.wal"));
    let missing = Ulid::new();
    assert!(matches!(
        engine.register_vet(Ulid::new(), missing, None).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));

    let (pid, vid) = practice_with_vet(&engine, pacific()).await;
    assert!(matches!(
        engine.register_vet(vid, pid, None).await,
        Err(EngineError::AlreadyExists(_))
    ));
    let vets = engine.vets_for_practice(pid).await.unwrap();
    assert_eq!(vets.len(), 1);
    assert!(vets[0].active);
}

#[tokio::test]
async fn long_names_rejected() {
    let engine = new_engine(test_wal_path("long_names.wal"));
    let name = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine.register_practice(Ulid::new(), Some(name), pacific()).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Slots ────────────────────────────────────────────────

#[tokio::test]
async fn pacific_workday_scenario() {
    let engine = new_engine(test_wal_path("pacific_workday.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "17:00").await;

    let slots = engine.available_slots(vid, d, None, None).await.unwrap();
    let s = starts(&slots);
    assert_eq!(s.len(), 16);
    assert_eq!(s.first().unwrap(), "09:00");
    assert_eq!(s.last().unwrap(), "16:30");
    assert!(!s.contains(&"20:00".to_string()));
    assert!(slots.iter().all(|slot| slot.local_date == d));

    book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
    let after = starts(&engine.available_slots(vid, d, None, None).await.unwrap());
    assert_eq!(after.len(), 15);
    assert!(!after.contains(&"10:00".to_string()));
    assert!(after.contains(&"10:30".to_string()));
}

#[tokio::test]
async fn slot_rows_are_local_clock_times() {
    let engine = new_engine(test_wal_path("slot_rows.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "10:30").await;

    let rows = engine.available_slot_rows(vid, d, Some(45)).await.unwrap();
    assert_eq!(
        rows,
        vec![
            SlotRow { start_time: "09:00".into(), end_time: "09:45".into() },
            SlotRow { start_time: "09:30".into(), end_time: "10:15".into() },
        ]
    );
}

#[tokio::test]
async fn timezone_override_never_shifts_rows_across_dates() {
    let engine = new_engine(test_wal_path("tz_override.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    // 17:00-19:00 PDT on 10-03 is 00:00-02:00 UTC on 10-04.
    hours(&engine, vid, date(2025, 10, 3), "17:00", "19:00").await;

    let same_rules = engine
        .available_slots(vid, date(2025, 10, 3), None, Some("America/Los_Angeles"))
        .await
        .unwrap();
    assert_eq!(starts(&same_rules), vec!["17:00", "17:30", "18:00", "18:30"]);

    for d in [date(2025, 10, 3), date(2025, 10, 4)] {
        let utc = engine.available_slots(vid, d, None, Some("UTC")).await.unwrap();
        assert!(utc.is_empty(), "{d}: {:?}", starts(&utc));
    }

    assert!(matches!(
        engine.available_slots(vid, date(2025, 10, 3), None, Some("Nowhere/Special")).await,
        Err(EngineError::InvalidTimezone(_))
    ));
}

#[tokio::test]
async fn override_zone_slots_see_bookings_past_the_local_day() {
    let engine = new_engine(test_wal_path("tz_override_busy.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    // 00:00-17:00 PDT is 16:00 JST on 10-03 to 09:00 JST on 10-04.
    hours(&engine, vid, d, "00:00", "17:00").await;
    // 09:00 PDT = 01:00 JST on 10-04, after the Tokyo day ends.
    let appt = book_at(&engine, vid, OCT_3_UTC + 16 * H, 30).await.unwrap();

    let slots = engine.available_slots(vid, d, Some(120), Some("Asia/Tokyo")).await.unwrap();
    assert!(!slots.is_empty());
    for s in &slots {
        assert!(!s.span().overlaps(&appt.span()), "{} overlaps the booking", s.local_start);
    }
    let s = starts(&slots);
    assert_eq!(s.first().unwrap(), "16:00");
    assert!(s.contains(&"23:00".to_string()));
    assert!(!s.contains(&"23:30".to_string()));
}

#[tokio::test]
async fn reads_are_idempotent() {
    let engine = new_engine(test_wal_path("idempotent_reads.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "17:00").await;
    book_at(&engine, vid, OCT_3_TEN_AM, 60).await.unwrap();

    let a = engine.available_slots(vid, d, None, None).await.unwrap();
    let b = engine.available_slots(vid, d, None, None).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn deactivated_block_stops_producing_slots() {
    let engine = new_engine(test_wal_path("deactivate_block.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    let blocks = engine
        .add_availability(vid, d, t("09:00"), t("12:00"), BlockType::Available)
        .await
        .unwrap();
    assert_eq!(engine.available_slots(vid, d, None, None).await.unwrap().len(), 6);

    let gone = engine.deactivate_availability(blocks[0].id).await.unwrap();
    assert!(!gone.active);
    assert!(engine.available_slots(vid, d, None, None).await.unwrap().is_empty());
    assert!(engine.availability_for_vet_and_date(vid, d).await.unwrap().is_empty());

    // second time is a no-op
    assert!(!engine.deactivate_availability(blocks[0].id).await.unwrap().active);
}

#[tokio::test]
async fn availability_rows_keep_civil_values() {
    let engine = new_engine(test_wal_path("civil_rows.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "13:00", "17:00").await;
    engine
        .add_availability(vid, d, t("09:00"), t("12:00"), BlockType::Blocked)
        .await
        .unwrap();

    let rows = engine.availability_for_vet_and_date(vid, d).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].start_time, "09:00");
    assert_eq!(rows[0].availability_type, "BLOCKED");
    assert_eq!(rows[1].start_time, "13:00");
    assert_eq!(rows[1].end_time, "17:00");
    assert_eq!(rows[1].date, "2025-10-03");
}

#[tokio::test]
async fn inactive_vet_has_no_slots() {
    let engine = new_engine(test_wal_path("inactive_vet.wal"));
    let (pid, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "17:00").await;

    engine.deactivate_vet(vid).await.unwrap();
    engine.deactivate_vet(vid).await.unwrap();
    assert!(matches!(
        engine.available_slots(vid, d, None, None).await,
        Err(EngineError::Inactive(_))
    ));
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM, 30).await,
        Err(EngineError::Inactive(_))
    ));
    let query = SearchQuery {
        target: SearchTarget::Practice(pid),
        timezone: None,
        from: d,
        to: d,
        duration_min: None,
        preference: TimePreference::AnyTime,
    };
    assert!(engine.first_available(&query).await.unwrap().is_none());
}

// ── Availability writes & DST ────────────────────────────

#[tokio::test]
async fn overnight_hours_become_two_rows() {
    let engine = new_engine(test_wal_path("overnight.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let blocks = engine
        .add_availability(vid, date(2025, 10, 3), t("22:00"), t("02:00"), BlockType::Available)
        .await
        .unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].date, date(2025, 10, 3));
    assert_eq!(blocks[0].end, ClockTime::END_OF_DAY);
    assert_eq!(blocks[1].date, date(2025, 10, 4));
    assert_eq!(blocks[1].start, ClockTime::MIDNIGHT);
    assert_eq!(blocks[0].span.end, blocks[1].span.start);

    let late = engine.available_slots(vid, date(2025, 10, 3), None, None).await.unwrap();
    assert_eq!(starts(&late), vec!["22:00", "22:30", "23:00", "23:30"]);
    assert_eq!(late.last().unwrap().local_end, ClockTime::END_OF_DAY);

    let early = engine.available_slots(vid, date(2025, 10, 4), None, None).await.unwrap();
    assert_eq!(starts(&early), vec!["00:00", "00:30", "01:00", "01:30"]);
}

#[tokio::test]
async fn overnight_rows_are_one_write() {
    let path = test_wal_path("overnight_one_write.wal");
    let ids = {
        let engine = new_engine(path.clone());
        let (_, vid) = practice_with_vet(&engine, pacific()).await;
        let before = engine.wal_appends_since_compact().await;
        let blocks = engine
            .add_availability(vid, date(2025, 10, 3), t("22:00"), t("02:00"), BlockType::Available)
            .await
            .unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, before + 1);
        (vid, blocks[0].id, blocks[1].id)
    };

    let engine = new_engine(path);
    let (vid, late, early) = ids;
    let tonight = engine.availability_for_vet_and_date(vid, date(2025, 10, 3)).await.unwrap();
    let morning = engine.availability_for_vet_and_date(vid, date(2025, 10, 4)).await.unwrap();
    assert_eq!(tonight.iter().map(|b| b.id).collect::<Vec<_>>(), vec![late]);
    assert_eq!(morning.iter().map(|b| b.id).collect::<Vec<_>>(), vec![early]);
}

#[tokio::test]
async fn block_boundary_in_spring_gap_is_rejected() {
    let engine = new_engine(test_wal_path("spring_gap.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 3, 9);

    for (start, end) in [("02:30", "06:00"), ("00:00", "02:15")] {
        let err = engine
            .add_availability(vid, d, t(start), t(end), BlockType::Available)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NonexistentLocalTime { .. }), "{start}-{end}: {err}");
        assert_eq!(err.kind(), ErrorKind::DstTransition);
    }
    assert!(engine.availability_for_vet_and_date(vid, d).await.unwrap().is_empty());

    // Boundaries outside the gap are fine; the missing hour produces no slots.
    hours(&engine, vid, d, "01:00", "04:00").await;
    let s = starts(&engine.available_slots(vid, d, None, None).await.unwrap());
    assert_eq!(s, vec!["01:00", "01:30", "03:00", "03:30"]);
}

#[tokio::test]
async fn ambiguous_boundaries_maximize_block() {
    let engine = new_engine(test_wal_path("fall_back.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let blocks = engine
        .add_availability(vid, date(2025, 11, 2), t("01:30"), t("03:00"), BlockType::Available)
        .await
        .unwrap();
    // 01:30 PDT and 03:00 PST
    assert_eq!(blocks[0].span, Span::new(1_762_072_200_000, 1_762_081_200_000));
    // 2.5 real hours: 01:30, 01:00(PST), 01:30(PST), 02:00, 02:30
    let slots = engine
        .available_slots(vid, date(2025, 11, 2), None, None)
        .await
        .unwrap();
    assert_eq!(slots.len(), 5);
    assert_eq!(starts(&slots), vec!["01:30", "01:00", "01:30", "02:00", "02:30"]);
}

#[tokio::test]
async fn overlapping_blocked_row_is_accepted_and_wins() {
    let engine = new_engine(test_wal_path("mixed_overlap.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "12:00").await;
    engine
        .add_availability(vid, d, t("10:00"), t("11:00"), BlockType::Blocked)
        .await
        .unwrap();
    let s = starts(&engine.available_slots(vid, d, None, None).await.unwrap());
    assert_eq!(s, vec!["09:00", "09:30", "11:00", "11:30"]);
}

#[tokio::test]
async fn practice_update_keeps_existing_instants() {
    let engine = new_engine(test_wal_path("practice_update.wal"));
    let (pid, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    let before = engine
        .add_availability(vid, d, t("09:00"), t("10:00"), BlockType::Available)
        .await
        .unwrap();

    let eastern = PracticeSettings {
        timezone: "US/Eastern".into(),
        ..PracticeSettings::default()
    };
    engine.update_practice(pid, None, eastern).await.unwrap();
    let after = engine
        .blocks_for_vet_and_range(vid, OCT_3_UTC, OCT_3_UTC + 24 * H)
        .await
        .unwrap();
    assert_eq!(after[0].span, before[0].span);

    // New rows resolve in the new zone.
    let east = engine
        .add_availability(vid, date(2025, 10, 4), t("09:00"), t("10:00"), BlockType::Available)
        .await
        .unwrap();
    assert_eq!(east[0].span.start, OCT_3_UTC + 24 * H + 13 * H);
}

// ── Search ───────────────────────────────────────────────

fn search(target: SearchTarget, from: NaiveDate, to: NaiveDate) -> SearchQuery {
    SearchQuery {
        target,
        timezone: Some("US/Pacific".into()),
        from,
        to,
        duration_min: None,
        preference: TimePreference::AnyTime,
    }
}

#[tokio::test]
async fn search_never_returns_days_without_blocks() {
    let engine = new_engine(test_wal_path("search_phantom.wal"));
    let (pid, vid) = practice_with_vet(&engine, pacific()).await;
    // 10-01 evening in Pacific is already 10-02 in UTC.
    hours(&engine, vid, date(2025, 10, 1), "20:00", "24:00").await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;

    let query = search(SearchTarget::Practice(pid), date(2025, 10, 2), date(2025, 10, 5));
    let first = engine.first_available(&query).await.unwrap().unwrap();
    assert_eq!(first.local_date, date(2025, 10, 3));
    assert_eq!(first.local_start, t("09:00"));
    assert_eq!(first.start, OCT_3_UTC + 16 * H);

    let many = engine.first_n_available(&query, MAX_SEARCH_RESULTS).await.unwrap();
    assert!(many
        .iter()
        .all(|s| s.local_date != date(2025, 10, 1) && s.local_date != date(2025, 10, 2)));
}

#[tokio::test]
async fn search_orders_by_date_then_vet_then_time() {
    let engine = new_engine(test_wal_path("search_order.wal"));
    let pid = Ulid::new();
    engine.register_practice(pid, None, pacific()).await.unwrap();
    let mut vets = vec![Ulid::new(), Ulid::new()];
    vets.sort();
    // register in reverse to make sure order comes from ids
    for v in vets.iter().rev() {
        engine.register_vet(*v, pid, None).await.unwrap();
        hours(&engine, *v, date(2025, 10, 3), "09:00", "10:00").await;
    }
    hours(&engine, vets[1], date(2025, 10, 4), "08:00", "09:00").await;

    let query = search(SearchTarget::Practice(pid), date(2025, 10, 3), date(2025, 10, 4));
    let found = engine.first_n_available(&query, 5).await.unwrap();
    let order: Vec<(Ulid, NaiveDate, String)> = found
        .iter()
        .map(|s| (s.vet_id, s.local_date, s.local_start.to_string()))
        .collect();
    assert_eq!(
        order,
        vec![
            (vets[0], date(2025, 10, 3), "09:00".into()),
            (vets[0], date(2025, 10, 3), "09:30".into()),
            (vets[1], date(2025, 10, 3), "09:00".into()),
            (vets[1], date(2025, 10, 3), "09:30".into()),
            (vets[1], date(2025, 10, 4), "08:00".into()),
        ]
    );
}

#[tokio::test]
async fn search_respects_time_preference() {
    let engine = new_engine(test_wal_path("search_pref.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "19:00").await;

    let mut query = search(SearchTarget::Vets(vec![vid]), date(2025, 10, 3), date(2025, 10, 3));
    query.preference = TimePreference::Afternoon;
    let slot = engine.first_available(&query).await.unwrap().unwrap();
    assert_eq!(slot.local_start, ClockTime::NOON);

    query.preference = TimePreference::Evening;
    let slot = engine.first_available(&query).await.unwrap().unwrap();
    assert_eq!(slot.local_start, t("17:00"));
}

#[tokio::test]
async fn search_rejects_bad_ranges_and_unknown_vets() {
    let engine = new_engine(test_wal_path("search_bad.wal"));
    let (pid, _) = practice_with_vet(&engine, pacific()).await;

    let inverted = search(SearchTarget::Practice(pid), date(2025, 10, 5), date(2025, 10, 2));
    assert!(matches!(
        engine.first_available(&inverted).await,
        Err(EngineError::InvalidRange(_))
    ));

    let too_long = search(SearchTarget::Practice(pid), date(2025, 1, 1), date(2025, 12, 31));
    assert!(matches!(
        engine.first_available(&too_long).await,
        Err(EngineError::InvalidRange(_))
    ));

    let ghost = Ulid::new();
    let unknown = search(SearchTarget::Vets(vec![ghost]), date(2025, 10, 2), date(2025, 10, 3));
    assert!(matches!(
        engine.first_available(&unknown).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
}

#[tokio::test]
async fn empty_search_is_none_not_error() {
    let engine = new_engine(test_wal_path("search_empty.wal"));
    let (pid, _) = practice_with_vet(&engine, pacific()).await;
    let query = search(SearchTarget::Practice(pid), date(2025, 10, 2), date(2025, 10, 5));
    assert!(engine.first_available(&query).await.unwrap().is_none());
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn concurrent_bookings_exactly_one_wins() {
    let engine = Arc::new(new_engine(test_wal_path("booking_race.wal")));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;

    let mut handles = Vec::new();
    for i in 0..32u32 {
        let engine = engine.clone();
        // Overlapping but not identical requests.
        let start = OCT_3_TEN_AM + (i % 3) as Ms * 10 * M;
        handles.push(tokio::spawn(async move { book_at(&engine, vid, start, 30).await }));
    }

    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict, "{e}"),
        }
    }
    assert_eq!(wins, 1);
    let booked = engine.appointments_for_vet(vid).await.unwrap();
    assert_eq!(booked.len(), 1);
}

#[tokio::test]
async fn racing_bookings_with_one_id_keep_it_unique() {
    let engine = new_engine(test_wal_path("booking_same_id.wal"));
    let (pid, vid) = practice_with_vet(&engine, pacific()).await;
    let other = Ulid::new();
    engine.register_vet(other, pid, None).await.unwrap();
    for v in [vid, other] {
        hours(&engine, v, date(2025, 10, 3), "09:00", "17:00").await;
    }

    let id = Ulid::new();
    let meta = AppointmentMetadata::default;
    let (a, b, c) = tokio::join!(
        engine.book(id, vid, OCT_3_TEN_AM, 30, meta()),
        engine.book(id, vid, OCT_3_TEN_AM + 2 * H, 30, meta()),
        engine.book(id, other, OCT_3_TEN_AM, 30, meta()),
    );
    let results = [a, b, c];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for r in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(r, EngineError::AlreadyExists(dup) if *dup == id), "{r}");
    }

    let mut holders = 0;
    for v in [vid, other] {
        let appts = engine.appointments_for_vet(v).await.unwrap();
        holders += appts.iter().filter(|a| a.id == id).count();
    }
    assert_eq!(holders, 1);
    let winner = engine.get_appointment(id).await.unwrap();
    assert_eq!(engine.cancel(id).await.unwrap().vet_id, winner.vet_id);
}

#[tokio::test]
async fn failed_booking_frees_its_id() {
    let engine = new_engine(test_wal_path("booking_id_release.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;

    let id = Ulid::new();
    // 20:00 PDT is outside hours.
    assert!(matches!(
        engine.book(id, vid, OCT_3_TEN_AM + 10 * H, 30, AppointmentMetadata::default()).await,
        Err(EngineError::OutsideAvailability)
    ));
    let appt = engine
        .book(id, vid, OCT_3_TEN_AM, 30, AppointmentMetadata::default())
        .await
        .unwrap();
    assert_eq!(appt.id, id);
}

#[tokio::test]
async fn adjacent_bookings_do_not_conflict() {
    let engine = new_engine(test_wal_path("adjacent.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;

    book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
    book_at(&engine, vid, OCT_3_TEN_AM + 30 * M, 30).await.unwrap();
    book_at(&engine, vid, OCT_3_TEN_AM - 30 * M, 30).await.unwrap();
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM + 15 * M, 30).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn booking_must_fit_availability() {
    let engine = new_engine(test_wal_path("booking_fit.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "17:00").await;
    engine
        .add_availability(vid, d, t("12:00"), t("13:00"), BlockType::Blocked)
        .await
        .unwrap();

    // 20:00 PDT: no hours
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM + 10 * H, 30).await,
        Err(EngineError::OutsideAvailability)
    ));
    // lunch
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM + 2 * H, 30).await,
        Err(EngineError::OutsideAvailability)
    ));
    // runs past close
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM + 6 * H + 45 * M, 30).await,
        Err(EngineError::OutsideAvailability)
    ));
}

#[tokio::test]
async fn availability_not_enforced_when_disabled() {
    let engine = new_engine(test_wal_path("booking_unenforced.wal"));
    let settings = PracticeSettings {
        enforce_availability: false,
        ..pacific()
    };
    let (_, vid) = practice_with_vet(&engine, settings).await;
    book_at(&engine, vid, OCT_3_TEN_AM + 10 * H, 30).await.unwrap();
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM + 10 * H, 30).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn booking_validation() {
    let engine = new_engine(test_wal_path("booking_validation.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;

    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM, 0).await,
        Err(EngineError::InvalidDuration(0))
    ));
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM, MAX_APPOINTMENT_MINUTES + 1).await,
        Err(EngineError::InvalidDuration(_))
    ));
    assert!(book_at(&engine, vid, 1_000, 30).await.is_err());
    assert!(matches!(
        book_at(&engine, Ulid::new(), OCT_3_TEN_AM, 30).await,
        Err(EngineError::NotFound(_))
    ));

    let id = Ulid::new();
    engine
        .book(id, vid, OCT_3_TEN_AM, 30, AppointmentMetadata::default())
        .await
        .unwrap();
    assert!(matches!(
        engine
            .book(id, vid, OCT_3_TEN_AM + H, 30, AppointmentMetadata::default())
            .await,
        Err(EngineError::AlreadyExists(_))
    ));

    let chatty = AppointmentMetadata {
        reason: Some("x".repeat(MAX_METADATA_LEN + 1)),
        ..AppointmentMetadata::default()
    };
    assert!(matches!(
        engine.book(Ulid::new(), vid, OCT_3_TEN_AM + H, 30, chatty).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn cancel_frees_the_interval() {
    let engine = new_engine(test_wal_path("cancel_frees.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    let d = date(2025, 10, 3);
    hours(&engine, vid, d, "09:00", "17:00").await;

    let appt = book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
    let cancelled = engine.cancel(appt.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(starts(&engine.available_slots(vid, d, None, None).await.unwrap()).contains(&"10:00".to_string()));
    book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();

    // cancelled is terminal
    assert!(matches!(
        engine.cancel(appt.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn status_state_machine() {
    let engine = new_engine(test_wal_path("status_machine.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;
    let appt = book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
    assert_eq!(appt.status, AppointmentStatus::Scheduled);

    assert!(matches!(
        engine.update_status(appt.id, AppointmentStatus::Completed).await,
        Err(EngineError::InvalidTransition {
            from: AppointmentStatus::Scheduled,
            to: AppointmentStatus::Completed,
            ..
        })
    ));
    for next in [
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
    ] {
        assert_eq!(engine.update_status(appt.id, next).await.unwrap().status, next);
    }
    assert!(engine
        .update_status(appt.id, AppointmentStatus::NoShow)
        .await
        .is_err());
    assert!(matches!(
        engine.update_status(Ulid::new(), AppointmentStatus::Confirmed).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn appointment_range_queries() {
    let engine = new_engine(test_wal_path("appt_range.wal"));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;
    let a = book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
    book_at(&engine, vid, OCT_3_TEN_AM + 3 * H, 30).await.unwrap();

    let hits = engine
        .appointments_for_vet_and_range(vid, OCT_3_TEN_AM + 15 * M, OCT_3_TEN_AM + H)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, a.id);
    assert_eq!(engine.get_appointment(a.id).await.unwrap(), a);
    assert!(matches!(
        engine.appointments_for_vet_and_range(vid, OCT_3_TEN_AM, OCT_3_TEN_AM).await,
        Err(EngineError::InvalidRange(_))
    ));
}

// ── Auto transitions ─────────────────────────────────────

#[tokio::test]
async fn auto_transitions_follow_policy_and_clock() {
    let clock = Arc::new(FixedClock::new(OCT_3_UTC));
    let engine = Engine::new(test_wal_path("auto_transitions.wal"), clock.clone()).unwrap();
    let settings = PracticeSettings {
        auto_transition: AutoTransitionPolicy {
            complete_after_end: true,
            no_show_after_minutes: Some(20),
        },
        ..pacific()
    };
    let (_, vid) = practice_with_vet(&engine, settings).await;
    hours(&engine, vid, date(2025, 10, 3), "09:00", "17:00").await;
    let missed = book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
    let seen = book_at(&engine, vid, OCT_3_TEN_AM + H, 30).await.unwrap();
    engine.update_status(seen.id, AppointmentStatus::Confirmed).await.unwrap();
    engine.update_status(seen.id, AppointmentStatus::InProgress).await.unwrap();

    assert!(engine.due_auto_transitions(engine.now_ms()).is_empty());

    clock.set(OCT_3_TEN_AM + 20 * M);
    assert_eq!(
        engine.due_auto_transitions(engine.now_ms()),
        vec![(missed.id, AppointmentStatus::NoShow)]
    );

    clock.set(OCT_3_TEN_AM + H + 30 * M);
    let mut due = engine.due_auto_transitions(engine.now_ms());
    due.sort_by_key(|(id, _)| *id);
    let mut want = vec![
        (missed.id, AppointmentStatus::NoShow),
        (seen.id, AppointmentStatus::Completed),
    ];
    want.sort_by_key(|(id, _)| *id);
    assert_eq!(due, want);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let d = date(2025, 10, 3);
    let (pid, vid, appt, slots_before) = {
        let engine = new_engine(path.clone());
        let (pid, vid) = practice_with_vet(&engine, pacific()).await;
        hours(&engine, vid, d, "09:00", "17:00").await;
        engine
            .add_availability(vid, d, t("12:00"), t("13:00"), BlockType::Blocked)
            .await
            .unwrap();
        let appt = book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
        engine.update_status(appt.id, AppointmentStatus::Confirmed).await.unwrap();
        let slots = engine.available_slots(vid, d, None, None).await.unwrap();
        (pid, vid, appt, slots)
    };

    let engine = new_engine(path);
    assert_eq!(engine.get_practice(pid).unwrap().settings.timezone, "US/Pacific");
    assert_eq!(engine.available_slots(vid, d, None, None).await.unwrap(), slots_before);
    let reloaded = engine.get_appointment(appt.id).await.unwrap();
    assert_eq!(reloaded.status, AppointmentStatus::Confirmed);
    assert!(matches!(
        book_at(&engine, vid, OCT_3_TEN_AM, 30).await,
        Err(EngineError::Conflict(id)) if id == appt.id
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let d = date(2025, 10, 3);
    let (vid, inactive_vid, kept, slots_before) = {
        let engine = new_engine(path.clone());
        let (pid, vid) = practice_with_vet(&engine, pacific()).await;
        let inactive_vid = Ulid::new();
        engine.register_vet(inactive_vid, pid, None).await.unwrap();
        engine.deactivate_vet(inactive_vid).await.unwrap();

        hours(&engine, vid, d, "09:00", "17:00").await;
        // churn: book and cancel repeatedly
        for _ in 0..10 {
            let a = book_at(&engine, vid, OCT_3_TEN_AM + H, 30).await.unwrap();
            engine.cancel(a.id).await.unwrap();
        }
        let kept = book_at(&engine, vid, OCT_3_TEN_AM, 30).await.unwrap();
        let dropped = engine
            .add_availability(vid, d, t("18:00"), t("19:00"), BlockType::Available)
            .await
            .unwrap();
        engine.deactivate_availability(dropped[0].id).await.unwrap();

        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // writes after compaction land in the new file
        engine.update_status(kept.id, AppointmentStatus::Confirmed).await.unwrap();
        let slots = engine.available_slots(vid, d, None, None).await.unwrap();
        (vid, inactive_vid, kept, slots)
    };

    let engine = new_engine(path);
    assert_eq!(engine.available_slots(vid, d, None, None).await.unwrap(), slots_before);
    assert_eq!(
        engine.get_appointment(kept.id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(engine.appointments_for_vet(vid).await.unwrap().len(), 11);
    assert!(!engine.get_vet(inactive_vid).await.unwrap().active);
    assert!(engine.availability_for_vet_and_date(vid, d).await.unwrap().len() == 1);
}

#[tokio::test]
async fn concurrent_bookings_during_compaction() {
    let engine = Arc::new(new_engine(test_wal_path("compact_race.wal")));
    let (_, vid) = practice_with_vet(&engine, pacific()).await;
    for day in 3..=9 {
        hours(&engine, vid, date(2025, 10, day), "00:00", "24:00").await;
    }

    let mut handles = Vec::new();
    for i in 0..100 {
        let booker = engine.clone();
        handles.push(tokio::spawn(async move {
            book_at(&booker, vid, OCT_3_UTC + 7 * H + i * H, 30).await.unwrap();
        }));
        if i % 25 == 0 {
            let compactor = engine.clone();
            handles.push(tokio::spawn(async move {
                compactor.compact_wal().await.unwrap();
            }));
        }
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(engine.appointments_for_vet(vid).await.unwrap().len(), 100);
}
