//! Voice-agent tool calls.
//!
//! The phone agent sends loosely typed `{"name": ..., "args": {...}}`
//! objects. They are parsed here into a closed set of typed requests; an
//! unknown name never reaches the engine. Every response carries a short
//! sentence the agent can read out verbatim.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorKind, SearchQuery, SearchTarget, TimePreference};
use crate::limits::MAX_SEARCH_RESULTS;
use crate::model::*;
use crate::tz::{parse_date, Disambiguation, TimeZoneConverter};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> WebhookError {
    WebhookError::InvalidArgument {
        field,
        reason: reason.into(),
    }
}

// ── Wire shapes ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct SearchArgs {
    practice_id: Option<String>,
    vet_id: Option<String>,
    vet_ids: Option<Vec<String>>,
    timezone: Option<String>,
    date_range_start: String,
    date_range_end: Option<String>,
    time_preference: Option<String>,
    duration_minutes: Option<u32>,
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SlotsArgs {
    vet_id: String,
    date: String,
    duration_minutes: Option<u32>,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookArgs {
    vet_id: String,
    /// RFC 3339 instant, as returned in a slot's `start`.
    start: Option<String>,
    /// Or a local date + time, read in `timezone` (default: practice zone).
    date: Option<String>,
    time: Option<String>,
    timezone: Option<String>,
    duration_minutes: Option<u32>,
    pet_id: Option<String>,
    client_name: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelArgs {
    appointment_id: String,
}

// ── Typed requests ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: SearchQuery,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotsRequest {
    pub vet_id: Ulid,
    pub date: NaiveDate,
    pub duration_min: Option<u32>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookStart {
    Instant(Ms),
    /// Resolved with [`Disambiguation::Reject`]: the caller must pick a
    /// time that exists exactly once.
    Local {
        date: NaiveDate,
        time: NaiveTime,
        timezone: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRequest {
    pub vet_id: Ulid,
    pub start: BookStart,
    pub duration_min: Option<u32>,
    pub metadata: AppointmentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub appointment_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    FirstAvailable(SearchRequest),
    AvailableSlots(SlotsRequest),
    Book(BookRequest),
    Cancel(CancelRequest),
}

impl ToolCall {
    pub fn from_raw(raw: RawToolCall) -> Result<Self, WebhookError> {
        match raw.name.as_str() {
            "get_first_available_flexible" => parse_search(args(raw.args)?).map(ToolCall::FirstAvailable),
            "get_available_slots" => parse_slots(args(raw.args)?).map(ToolCall::AvailableSlots),
            "book_appointment" => parse_book(args(raw.args)?).map(ToolCall::Book),
            "cancel_appointment" => parse_cancel(args(raw.args)?).map(ToolCall::Cancel),
            _ => Err(WebhookError::UnknownOperation(raw.name)),
        }
    }
}

fn args<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, WebhookError> {
    let value = if value.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| WebhookError::MalformedRequest(e.to_string()))
}

fn parse_id(field: &'static str, s: &str) -> Result<Ulid, WebhookError> {
    Ulid::from_string(s.trim()).map_err(|_| invalid(field, format!("'{s}' is not a valid id")))
}

fn parse_day(field: &'static str, s: &str) -> Result<NaiveDate, WebhookError> {
    parse_date(s).ok_or_else(|| invalid(field, format!("'{s}' is not a YYYY-MM-DD date")))
}

fn parse_tz(tz: Option<String>) -> Result<Option<String>, WebhookError> {
    match tz {
        Some(name) => match TimeZoneConverter::new(&name) {
            Ok(_) => Ok(Some(name.trim().to_string())),
            Err(_) => Err(invalid("timezone", format!("'{name}' is not an IANA timezone"))),
        },
        None => Ok(None),
    }
}

fn parse_duration(d: Option<u32>) -> Result<Option<u32>, WebhookError> {
    match d {
        Some(0) => Err(invalid("duration_minutes", "must be positive")),
        other => Ok(other),
    }
}

fn parse_search(a: SearchArgs) -> Result<SearchRequest, WebhookError> {
    let mut vets: Vec<String> = a.vet_ids.unwrap_or_default();
    vets.extend(a.vet_id);
    let target = match (a.practice_id, vets.is_empty()) {
        (Some(_), false) => {
            return Err(invalid("practice_id", "give practice_id or vet ids, not both"));
        }
        (Some(pid), true) => SearchTarget::Practice(parse_id("practice_id", &pid)?),
        (None, false) => SearchTarget::Vets(
            vets.iter()
                .map(|v| parse_id("vet_ids", v))
                .collect::<Result<_, _>>()?,
        ),
        (None, true) => return Err(invalid("practice_id", "practice_id or vet_ids is required")),
    };
    let from = parse_day("date_range_start", &a.date_range_start)?;
    let to = match a.date_range_end {
        Some(end) => parse_day("date_range_end", &end)?,
        None => from,
    };
    let preference = match a.time_preference {
        Some(p) => TimePreference::parse(&p)
            .ok_or_else(|| invalid("time_preference", format!("'{p}' is not a time of day")))?,
        None => TimePreference::AnyTime,
    };
    let max_results = a.max_results.unwrap_or(1);
    if max_results == 0 || max_results > MAX_SEARCH_RESULTS {
        return Err(invalid(
            "max_results",
            format!("must be between 1 and {MAX_SEARCH_RESULTS}"),
        ));
    }
    Ok(SearchRequest {
        query: SearchQuery {
            target,
            timezone: parse_tz(a.timezone)?,
            from,
            to,
            duration_min: parse_duration(a.duration_minutes)?,
            preference,
        },
        max_results,
    })
}

fn parse_slots(a: SlotsArgs) -> Result<SlotsRequest, WebhookError> {
    Ok(SlotsRequest {
        vet_id: parse_id("vet_id", &a.vet_id)?,
        date: parse_day("date", &a.date)?,
        duration_min: parse_duration(a.duration_minutes)?,
        timezone: parse_tz(a.timezone)?,
    })
}

fn parse_book(a: BookArgs) -> Result<BookRequest, WebhookError> {
    let start = match (a.start, a.date, a.time) {
        (Some(s), None, None) => {
            let dt = DateTime::parse_from_rfc3339(s.trim())
                .map_err(|_| invalid("start", format!("'{s}' is not an RFC 3339 timestamp")))?;
            BookStart::Instant(dt.timestamp_millis())
        }
        (None, Some(date), Some(time)) => {
            let date = parse_day("date", &date)?;
            let clock = ClockTime::parse(&time)
                .and_then(ClockTime::to_naive)
                .ok_or_else(|| invalid("time", format!("'{time}' is not an HH:MM time")))?;
            BookStart::Local {
                date,
                time: clock,
                timezone: parse_tz(a.timezone)?,
            }
        }
        _ => return Err(invalid("start", "give either start, or date and time")),
    };
    Ok(BookRequest {
        vet_id: parse_id("vet_id", &a.vet_id)?,
        start,
        duration_min: parse_duration(a.duration_minutes)?,
        metadata: AppointmentMetadata {
            pet_id: a.pet_id,
            client_name: a.client_name,
            reason: a.reason,
            channel: BookingChannel::Phone,
        },
    })
}

fn parse_cancel(a: CancelArgs) -> Result<CancelRequest, WebhookError> {
    Ok(CancelRequest {
        appointment_id: parse_id("appointment_id", &a.appointment_id)?,
    })
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub vet_id: String,
    /// RFC 3339 with the local offset.
    pub start: String,
    pub end: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: u32,
    pub timezone: String,
    pub spoken: String,
}

impl SlotView {
    fn new(slot: &Slot, conv: &TimeZoneConverter) -> Self {
        Self {
            vet_id: slot.vet_id.to_string(),
            start: conv.format_instant(slot.start),
            end: conv.format_instant(slot.end),
            date: slot.local_date.format("%Y-%m-%d").to_string(),
            start_time: slot.local_start.to_string(),
            end_time: slot.local_end.to_string(),
            duration_minutes: slot.duration_min,
            timezone: conv.name().to_string(),
            spoken: spoken_instant(conv, slot.start),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentView {
    pub id: String,
    pub vet_id: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: u32,
    pub appointment_status: String,
    pub timezone: String,
    pub spoken: String,
}

impl AppointmentView {
    fn new(appt: &Appointment, conv: &TimeZoneConverter) -> Self {
        Self {
            id: appt.id.to_string(),
            vet_id: appt.vet_id.to_string(),
            start: conv.format_instant(appt.start),
            end: conv.format_instant(appt.end()),
            duration_minutes: appt.duration_min,
            appointment_status: appt.status.as_str().to_string(),
            timezone: conv.name().to_string(),
            spoken: spoken_instant(conv, appt.start),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    SlotFound {
        slot: SlotView,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        alternatives: Vec<SlotView>,
        message: String,
    },
    Slots {
        slots: Vec<SlotView>,
        message: String,
    },
    NoAvailability {
        message: String,
    },
    Booked {
        appointment: AppointmentView,
        message: String,
    },
    Cancelled {
        appointment: AppointmentView,
        message: String,
    },
    Conflict {
        message: String,
    },
    InvalidRequest {
        message: String,
    },
    DstTransition {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ToolResponse {
    pub fn status(&self) -> &'static str {
        match self {
            ToolResponse::SlotFound { .. } => "slot_found",
            ToolResponse::Slots { .. } => "slots",
            ToolResponse::NoAvailability { .. } => "no_availability",
            ToolResponse::Booked { .. } => "booked",
            ToolResponse::Cancelled { .. } => "cancelled",
            ToolResponse::Conflict { .. } => "conflict",
            ToolResponse::InvalidRequest { .. } => "invalid_request",
            ToolResponse::DstTransition { .. } => "dst_transition",
            ToolResponse::Error { .. } => "error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ToolResponse::SlotFound { message, .. }
            | ToolResponse::Slots { message, .. }
            | ToolResponse::NoAvailability { message }
            | ToolResponse::Booked { message, .. }
            | ToolResponse::Cancelled { message, .. }
            | ToolResponse::Conflict { message }
            | ToolResponse::InvalidRequest { message }
            | ToolResponse::DstTransition { message }
            | ToolResponse::Error { message } => message,
        }
    }
}

impl From<WebhookError> for ToolResponse {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::UnknownOperation(_)
            | WebhookError::MalformedRequest(_)
            | WebhookError::InvalidArgument { .. } => ToolResponse::InvalidRequest {
                message: sentence(&err.to_string()),
            },
            WebhookError::Engine(e) => engine_error_response(&e),
        }
    }
}

fn engine_error_response(e: &EngineError) -> ToolResponse {
    match e.kind() {
        ErrorKind::Validation => ToolResponse::InvalidRequest {
            message: sentence(&e.to_string()),
        },
        ErrorKind::DstTransition => ToolResponse::DstTransition {
            message: match e {
                EngineError::AmbiguousLocalTime { .. } => {
                    "That time happens twice that day because of the clock change. Please pick a different time.".into()
                }
                _ => "That time doesn't exist that day because of the clock change. Please pick a different time.".into(),
            },
        },
        ErrorKind::Conflict => ToolResponse::Conflict {
            message: "Sorry, that time was just taken. Please choose another time.".into(),
        },
        ErrorKind::Storage => {
            error!("webhook storage failure: {e}");
            ToolResponse::Error {
                message: "Something went wrong on our side. Please try again in a moment.".into(),
            }
        }
    }
}

fn sentence(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 1);
    let mut chars = s.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.push_str(chars.as_str());
    }
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}

/// "Friday, October 3 at 9:00 AM"
fn spoken_instant(conv: &TimeZoneConverter, instant: Ms) -> String {
    let local = conv.local_datetime(instant);
    format!("{} at {}", local.format("%A, %B %-d"), local.format("%-I:%M %p"))
}

fn spoken_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d").to_string()
}

// ── Adapter ──────────────────────────────────────────────────────

pub struct WebhookAdapter {
    engine: Arc<Engine>,
}

impl WebhookAdapter {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Parse and run a raw tool call. Never fails: errors become responses.
    pub async fn handle_raw(&self, raw: RawToolCall) -> ToolResponse {
        match ToolCall::from_raw(raw) {
            Ok(call) => self.handle(call).await,
            Err(e) => {
                debug!("rejected tool call: {e}");
                e.into()
            }
        }
    }

    pub async fn handle(&self, call: ToolCall) -> ToolResponse {
        let result = match call {
            ToolCall::FirstAvailable(req) => self.first_available(req).await,
            ToolCall::AvailableSlots(req) => self.available_slots(req).await,
            ToolCall::Book(req) => self.book(req).await,
            ToolCall::Cancel(req) => self.cancel(req).await,
        };
        result.unwrap_or_else(ToolResponse::from)
    }

    async fn converter_for_vet(
        &self,
        vet_id: Ulid,
        timezone: Option<&str>,
    ) -> Result<TimeZoneConverter, WebhookError> {
        if let Some(tz) = timezone {
            return Ok(TimeZoneConverter::new(tz)?);
        }
        let vet = self.engine.get_vet(vet_id).await?;
        let practice = self.engine.get_practice(vet.practice_id)?;
        Ok(TimeZoneConverter::new(&practice.settings.timezone)?)
    }

    async fn first_available(&self, req: SearchRequest) -> Result<ToolResponse, WebhookError> {
        let slots = self
            .engine
            .first_n_available(&req.query, req.max_results)
            .await?;
        let Some((first, rest)) = slots.split_first() else {
            return Ok(ToolResponse::NoAvailability {
                message: format!(
                    "I couldn't find any openings between {} and {}.",
                    spoken_date(req.query.from),
                    spoken_date(req.query.to)
                ),
            });
        };
        let tz = req.query.timezone.as_deref();
        let slot = SlotView::new(first, &self.converter_for_vet(first.vet_id, tz).await?);
        let mut alternatives = Vec::with_capacity(rest.len());
        for s in rest {
            alternatives.push(SlotView::new(s, &self.converter_for_vet(s.vet_id, tz).await?));
        }
        let message = format!("The first available appointment is {}.", slot.spoken);
        Ok(ToolResponse::SlotFound {
            slot,
            alternatives,
            message,
        })
    }

    async fn available_slots(&self, req: SlotsRequest) -> Result<ToolResponse, WebhookError> {
        let slots = self
            .engine
            .available_slots(req.vet_id, req.date, req.duration_min, req.timezone.as_deref())
            .await?;
        if slots.is_empty() {
            return Ok(ToolResponse::NoAvailability {
                message: format!("There are no open times on {}.", spoken_date(req.date)),
            });
        }
        let conv = self
            .converter_for_vet(req.vet_id, req.timezone.as_deref())
            .await?;
        let views: Vec<SlotView> = slots.iter().map(|s| SlotView::new(s, &conv)).collect();
        let message = format!(
            "There {} {} open time{} on {}, starting at {}.",
            if views.len() == 1 { "is" } else { "are" },
            views.len(),
            if views.len() == 1 { "" } else { "s" },
            spoken_date(req.date),
            conv.local_datetime(slots[0].start).format("%-I:%M %p")
        );
        Ok(ToolResponse::Slots {
            slots: views,
            message,
        })
    }

    async fn book(&self, req: BookRequest) -> Result<ToolResponse, WebhookError> {
        let vet = self.engine.get_vet(req.vet_id).await?;
        let practice = self.engine.get_practice(vet.practice_id)?;
        let (start, conv) = match req.start {
            BookStart::Instant(ms) => (ms, TimeZoneConverter::new(&practice.settings.timezone)?),
            BookStart::Local { date, time, timezone } => {
                let conv = TimeZoneConverter::new(
                    timezone.as_deref().unwrap_or(&practice.settings.timezone),
                )?;
                (conv.to_absolute(date, time, Disambiguation::Reject)?, conv)
            }
        };
        let duration = req
            .duration_min
            .unwrap_or(practice.settings.default_duration_min);
        let appt = self
            .engine
            .book(Ulid::new(), req.vet_id, start, duration, req.metadata)
            .await?;
        let view = AppointmentView::new(&appt, &conv);
        let message = format!("You're booked for {}.", view.spoken);
        Ok(ToolResponse::Booked {
            appointment: view,
            message,
        })
    }

    async fn cancel(&self, req: CancelRequest) -> Result<ToolResponse, WebhookError> {
        let appt = self.engine.cancel(req.appointment_id).await?;
        let conv = self.converter_for_vet(appt.vet_id, None).await?;
        let view = AppointmentView::new(&appt, &conv);
        let message = format!("Your appointment on {} has been cancelled.", view.spoken);
        Ok(ToolResponse::Cancelled {
            appointment: view,
            message,
        })
    }
}
