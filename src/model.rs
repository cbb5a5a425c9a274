use std::fmt;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span starting at `start` lasting `minutes`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + minutes as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Civil time ───────────────────────────────────────────────────

/// Wall-clock minute within a civil day, `0..=1440`. `1440` is local 24:00
/// and only ever appears as the end of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);
    pub const NOON: ClockTime = ClockTime(12 * 60);
    pub const END_OF_DAY: ClockTime = ClockTime(24 * 60);

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= 24 * 60).then_some(Self(minutes))
    }

    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour == 24 && minute == 0 {
            return Some(Self::END_OF_DAY);
        }
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    /// Drops seconds.
    pub fn from_naive(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }

    /// `None` for 24:00.
    pub fn to_naive(self) -> Option<NaiveTime> {
        if self.is_end_of_day() {
            return None;
        }
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0)
    }

    /// Accepts `HH:MM` or `HH:MM:SS` with zero seconds. `24:00` is accepted.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split(':');
        let hour: u32 = parts.next()?.parse().ok()?;
        let minute: u32 = parts.next()?.parse().ok()?;
        if let Some(sec) = parts.next() {
            let sec: u32 = sec.parse().ok()?;
            if sec != 0 {
                return None;
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Self::from_hm(hour, minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u32 {
        self.0 as u32 / 60
    }

    pub fn minute(self) -> u32 {
        self.0 as u32 % 60
    }

    pub fn is_end_of_day(self) -> bool {
        self.0 == 24 * 60
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    /// Opens the vet for booking.
    Available,
    /// Closes the vet (lunch, surgery, leave).
    Blocked,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Available => "AVAILABLE",
            BlockType::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVAILABLE" => Some(BlockType::Available),
            "BLOCKED" => Some(BlockType::Blocked),
            _ => None,
        }
    }
}

/// One stored availability row. Never wraps past midnight: `start < end`
/// always, with `end` allowed to be 24:00.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBlock {
    pub id: Ulid,
    pub vet_id: Ulid,
    pub practice_id: Ulid,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
    pub block_type: BlockType,
    pub active: bool,
    /// Instant range resolved in the practice timezone when the row was written.
    pub span: Span,
}

impl AvailabilityBlock {
    pub fn is_available(&self) -> bool {
        self.active && self.block_type == BlockType::Available
    }

    pub fn is_blocked(&self) -> bool {
        self.active && self.block_type == BlockType::Blocked
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that hold the vet's interval for conflict purposes.
    pub fn occupies_interval(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::InProgress
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// `scheduled → confirmed → in_progress → completed`; `cancelled` and
    /// `no_show` from any non-terminal state.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Scheduled, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Completed)
                | (_, Cancelled)
                | (_, NoShow)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "in_progress" => Some(AppointmentStatus::InProgress),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" | "canceled" => Some(AppointmentStatus::Cancelled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BookingChannel {
    #[default]
    Web,
    Phone,
}

impl BookingChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingChannel::Web => "web",
            BookingChannel::Phone => "phone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppointmentMetadata {
    pub pet_id: Option<String>,
    pub client_name: Option<String>,
    pub reason: Option<String>,
    pub channel: BookingChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub vet_id: Ulid,
    pub practice_id: Ulid,
    pub start: Ms,
    pub duration_min: u32,
    pub status: AppointmentStatus,
    pub metadata: AppointmentMetadata,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.start, self.duration_min)
    }

    pub fn end(&self) -> Ms {
        self.span().end
    }
}

// ── Practices & vets ─────────────────────────────────────────────

/// Which status changes the sweeper may apply on its own. Off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTransitionPolicy {
    /// `in_progress → completed` once the appointment's end has passed.
    pub complete_after_end: bool,
    /// `scheduled|confirmed → no_show` this many minutes after the start.
    pub no_show_after_minutes: Option<u32>,
}

impl AutoTransitionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.complete_after_end || self.no_show_after_minutes.is_some()
    }

    /// The transition due for `appt` at `now`, if any.
    pub fn due(&self, appt: &Appointment, now: Ms) -> Option<AppointmentStatus> {
        match appt.status {
            AppointmentStatus::InProgress if self.complete_after_end && appt.end() <= now => {
                Some(AppointmentStatus::Completed)
            }
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed => {
                let grace = self.no_show_after_minutes? as Ms * MINUTE_MS;
                (appt.start + grace <= now).then_some(AppointmentStatus::NoShow)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeSettings {
    /// IANA timezone name the practice enters its hours in.
    pub timezone: String,
    pub granularity_min: u32,
    pub default_duration_min: u32,
    /// Reject bookings that do not fit inside an AVAILABLE block.
    pub enforce_availability: bool,
    pub auto_transition: AutoTransitionPolicy,
}

impl Default for PracticeSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            granularity_min: 30,
            default_duration_min: 30,
            enforce_availability: true,
            auto_transition: AutoTransitionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PracticeState {
    pub id: Ulid,
    pub name: Option<String>,
    pub settings: PracticeSettings,
}

#[derive(Debug, Clone)]
pub struct VetState {
    pub id: Ulid,
    pub practice_id: Ulid,
    pub name: Option<String>,
    pub active: bool,
    /// Sorted by `span.start`.
    pub blocks: Vec<AvailabilityBlock>,
    /// Sorted by `start`.
    pub appointments: Vec<Appointment>,
}

impl VetState {
    pub fn new(id: Ulid, practice_id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            practice_id,
            name,
            active: true,
            blocks: Vec::new(),
            appointments: Vec::new(),
        }
    }

    /// Insert block maintaining sort order by span.start.
    pub fn insert_block(&mut self, block: AvailabilityBlock) {
        let pos = self
            .blocks
            .partition_point(|b| b.span.start <= block.span.start);
        self.blocks.insert(pos, block);
    }

    /// Insert appointment maintaining sort order by start.
    pub fn insert_appointment(&mut self, appt: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start <= appt.start);
        self.appointments.insert(pos, appt);
    }

    pub fn block_mut(&mut self, id: Ulid) -> Option<&mut AvailabilityBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Blocks (active or not) whose span overlaps the query window.
    pub fn blocks_overlapping(&self, query: &Span) -> impl Iterator<Item = &AvailabilityBlock> {
        let right_bound = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Appointments (any status) whose span overlaps the query window.
    pub fn appointments_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self.appointments.partition_point(|a| a.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.end() > query.start)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// WAL record format. Flat: no nesting beyond model rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PracticeRegistered {
        id: Ulid,
        name: Option<String>,
        settings: PracticeSettings,
    },
    PracticeUpdated {
        id: Ulid,
        name: Option<String>,
        settings: PracticeSettings,
    },
    VetRegistered {
        id: Ulid,
        practice_id: Ulid,
        name: Option<String>,
    },
    VetDeactivated {
        id: Ulid,
    },
    /// One WAL frame, so both halves of an overnight range land together.
    BlocksAdded {
        vet_id: Ulid,
        blocks: Vec<AvailabilityBlock>,
    },
    BlockDeactivated {
        id: Ulid,
        vet_id: Ulid,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        vet_id: Ulid,
        status: AppointmentStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A derived, never-persisted bookable start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub vet_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub duration_min: u32,
    pub local_date: NaiveDate,
    pub local_start: ClockTime,
    /// 24:00 when the slot ends exactly at local midnight.
    pub local_end: ClockTime,
}

impl Slot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn to_row(&self) -> SlotRow {
        SlotRow {
            start_time: self.local_start.to_string(),
            end_time: self.local_end.to_string(),
        }
    }
}

/// `available-slots` response row: practice-local clock times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRow {
    pub start_time: String,
    pub end_time: String,
}

/// `availability-by-vet-and-date` response row: civil values as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRow {
    pub id: Ulid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub availability_type: String,
}

impl From<&AvailabilityBlock> for AvailabilityRow {
    fn from(b: &AvailabilityBlock) -> Self {
        Self {
            id: b.id,
            date: b.date.format("%Y-%m-%d").to_string(),
            start_time: b.start.to_string(),
            end_time: b.end.to_string(),
            availability_type: b.block_type.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VetInfo {
    pub id: Ulid,
    pub practice_id: Ulid,
    pub name: Option<String>,
    pub active: bool,
}
