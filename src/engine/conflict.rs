use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.end <= span.start {
        return Err(EngineError::InvalidRange(format!(
            "end {} is not after start {}",
            span.end, span.start
        )));
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 || minutes > MAX_APPOINTMENT_MINUTES {
        return Err(EngineError::InvalidDuration(minutes));
    }
    Ok(())
}

pub(crate) fn validate_settings(settings: &PracticeSettings) -> Result<(), EngineError> {
    if settings.timezone.len() > MAX_TIMEZONE_LEN {
        return Err(EngineError::LimitExceeded("timezone name too long"));
    }
    crate::tz::TimeZoneConverter::new(&settings.timezone)?;
    if !(MIN_GRANULARITY_MINUTES..=MAX_GRANULARITY_MINUTES).contains(&settings.granularity_min) {
        return Err(EngineError::InvalidRange(format!(
            "granularity must be {MIN_GRANULARITY_MINUTES}..={MAX_GRANULARITY_MINUTES} minutes, got {}",
            settings.granularity_min
        )));
    }
    validate_duration(settings.default_duration_min)?;
    if let Some(grace) = settings.auto_transition.no_show_after_minutes
        && grace > MAX_NO_SHOW_GRACE_MINUTES
    {
        return Err(EngineError::LimitExceeded("no-show grace too long"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: Option<&str>) -> Result<(), EngineError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_metadata(meta: &AppointmentMetadata) -> Result<(), EngineError> {
    let fields = [&meta.pet_id, &meta.client_name, &meta.reason];
    if fields
        .iter()
        .any(|f| f.as_ref().is_some_and(|s| s.len() > MAX_METADATA_LEN))
    {
        return Err(EngineError::LimitExceeded("appointment metadata too long"));
    }
    Ok(())
}

/// Any interval-occupying appointment overlapping `span` is a conflict.
pub(crate) fn check_no_conflict(vs: &VetState, span: &Span) -> Result<(), EngineError> {
    match vs
        .appointments_overlapping(span)
        .find(|a| a.status.occupies_interval())
    {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

/// `span` must sit inside one active AVAILABLE block and touch no active
/// BLOCKED block.
pub(crate) fn check_within_availability(vs: &VetState, span: &Span) -> Result<(), EngineError> {
    let mut covered = false;
    for block in vs.blocks_overlapping(span) {
        if block.is_blocked() {
            return Err(EngineError::OutsideAvailability);
        }
        if block.is_available() && block.span.contains_span(span) {
            covered = true;
        }
    }
    if covered {
        Ok(())
    } else {
        Err(EngineError::OutsideAvailability)
    }
}
