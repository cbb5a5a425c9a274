//! Calendar management requests: the practice-facing side of the protocol.
//! Requests are tagged by `op`; responses by `status`.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    RegisterPractice {
        id: Option<Ulid>,
        name: Option<String>,
        #[serde(default)]
        settings: PracticeSettings,
    },
    UpdatePractice {
        id: Ulid,
        name: Option<String>,
        settings: PracticeSettings,
    },
    RegisterVet {
        id: Option<Ulid>,
        practice_id: Ulid,
        name: Option<String>,
    },
    DeactivateVet {
        id: Ulid,
    },
    ListVets {
        practice_id: Ulid,
    },
    AddAvailability {
        vet_id: Ulid,
        date: NaiveDate,
        start_time: String,
        end_time: String,
        #[serde(default = "default_availability_type")]
        availability_type: String,
    },
    DeactivateAvailability {
        id: Ulid,
    },
    GetAvailability {
        vet_id: Ulid,
        date: NaiveDate,
    },
    GetSlots {
        vet_id: Ulid,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    },
    BookAppointment {
        id: Option<Ulid>,
        vet_id: Ulid,
        /// RFC 3339 instant.
        start: String,
        duration_minutes: Option<u32>,
        pet_id: Option<String>,
        client_name: Option<String>,
        reason: Option<String>,
    },
    UpdateStatus {
        id: Ulid,
        status: String,
    },
    GetAppointment {
        id: Ulid,
    },
    ListAppointments {
        vet_id: Ulid,
        from: Option<String>,
        to: Option<String>,
    },
}

fn default_availability_type() -> String {
    BlockType::Available.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiResponse {
    Ok { data: Value },
    Error { kind: &'static str, message: String },
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, ApiResponse::Ok { .. })
    }
}

#[derive(Error, Debug)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<ApiError> for ApiResponse {
    fn from(err: ApiError) -> Self {
        let kind = match &err {
            ApiError::BadRequest(_) => "validation",
            ApiError::Engine(e) => match e.kind() {
                ErrorKind::Validation => "validation",
                ErrorKind::DstTransition => "dst_transition",
                ErrorKind::Conflict => "conflict",
                ErrorKind::Storage => "storage",
            },
        };
        ApiResponse::Error {
            kind,
            message: err.to_string(),
        }
    }
}

pub async fn execute(engine: &Engine, req: ApiRequest) -> ApiResponse {
    match run(engine, req).await {
        Ok(data) => ApiResponse::Ok { data },
        Err(e) => e.into(),
    }
}

fn parse_instant(field: &str, s: &str) -> Result<Ms, ApiError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| ApiError::BadRequest(format!("{field}: '{s}' is not an RFC 3339 timestamp")))
}

fn parse_clock(field: &str, s: &str) -> Result<ClockTime, ApiError> {
    ClockTime::parse(s).ok_or_else(|| ApiError::BadRequest(format!("{field}: '{s}' is not an HH:MM time")))
}

fn appointment_json(a: &Appointment) -> Value {
    json!({
        "id": a.id.to_string(),
        "vet_id": a.vet_id.to_string(),
        "practice_id": a.practice_id.to_string(),
        "start_ms": a.start,
        "end_ms": a.end(),
        "duration_minutes": a.duration_min,
        "appointment_status": a.status.as_str(),
        "pet_id": a.metadata.pet_id,
        "client_name": a.metadata.client_name,
        "reason": a.metadata.reason,
        "channel": a.metadata.channel.as_str(),
    })
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, ApiError> {
    serde_json::to_value(v).map_err(|e| ApiError::BadRequest(e.to_string()))
}

async fn run(engine: &Engine, req: ApiRequest) -> Result<Value, ApiError> {
    match req {
        ApiRequest::RegisterPractice { id, name, settings } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.register_practice(id, name, settings).await?;
            Ok(json!({ "id": id.to_string() }))
        }
        ApiRequest::UpdatePractice { id, name, settings } => {
            engine.update_practice(id, name, settings).await?;
            Ok(json!({ "id": id.to_string() }))
        }
        ApiRequest::RegisterVet { id, practice_id, name } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.register_vet(id, practice_id, name).await?;
            Ok(json!({ "id": id.to_string() }))
        }
        ApiRequest::DeactivateVet { id } => {
            engine.deactivate_vet(id).await?;
            Ok(json!({ "id": id.to_string() }))
        }
        ApiRequest::ListVets { practice_id } => to_value(&engine.vets_for_practice(practice_id).await?),
        ApiRequest::AddAvailability {
            vet_id,
            date,
            start_time,
            end_time,
            availability_type,
        } => {
            let start = parse_clock("start_time", &start_time)?;
            let end = parse_clock("end_time", &end_time)?;
            let block_type = BlockType::parse(&availability_type).ok_or_else(|| {
                ApiError::BadRequest(format!("availability_type: '{availability_type}' is not AVAILABLE or BLOCKED"))
            })?;
            let blocks = engine
                .add_availability(vet_id, date, start, end, block_type)
                .await?;
            let rows: Vec<AvailabilityRow> = blocks.iter().map(AvailabilityRow::from).collect();
            to_value(&rows)
        }
        ApiRequest::DeactivateAvailability { id } => {
            let block = engine.deactivate_availability(id).await?;
            to_value(&AvailabilityRow::from(&block))
        }
        ApiRequest::GetAvailability { vet_id, date } => {
            to_value(&engine.availability_for_vet_and_date(vet_id, date).await?)
        }
        ApiRequest::GetSlots {
            vet_id,
            date,
            duration_minutes,
        } => to_value(&engine.available_slot_rows(vet_id, date, duration_minutes).await?),
        ApiRequest::BookAppointment {
            id,
            vet_id,
            start,
            duration_minutes,
            pet_id,
            client_name,
            reason,
        } => {
            let start = parse_instant("start", &start)?;
            let duration = match duration_minutes {
                Some(d) => d,
                None => {
                    let vet = engine.get_vet(vet_id).await?;
                    engine.get_practice(vet.practice_id)?.settings.default_duration_min
                }
            };
            let metadata = AppointmentMetadata {
                pet_id,
                client_name,
                reason,
                channel: BookingChannel::Web,
            };
            let appt = engine
                .book(id.unwrap_or_else(Ulid::new), vet_id, start, duration, metadata)
                .await?;
            Ok(appointment_json(&appt))
        }
        ApiRequest::UpdateStatus { id, status } => {
            let next = AppointmentStatus::parse(&status)
                .ok_or_else(|| ApiError::BadRequest(format!("status: unknown status '{status}'")))?;
            Ok(appointment_json(&engine.update_status(id, next).await?))
        }
        ApiRequest::GetAppointment { id } => Ok(appointment_json(&engine.get_appointment(id).await?)),
        ApiRequest::ListAppointments { vet_id, from, to } => {
            let appts = match (from, to) {
                (Some(from), Some(to)) => {
                    let from = parse_instant("from", &from)?;
                    let to = parse_instant("to", &to)?;
                    engine.appointments_for_vet_and_range(vet_id, from, to).await?
                }
                (None, None) => engine.appointments_for_vet(vet_id).await?,
                _ => return Err(ApiError::BadRequest("give both from and to, or neither".into())),
            };
            Ok(Value::Array(appts.iter().map(appointment_json).collect()))
        }
    }
}
