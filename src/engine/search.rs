use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::tz::next_day;

use super::conflict::validate_duration;
use super::slots::slots_for_vet;
use super::{Engine, EngineError};

/// Who a flexible search may return slots for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// These vets only. Unknown ids are an error; inactive vets are skipped.
    Vets(Vec<Ulid>),
    /// Any active vet of the practice.
    Practice(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePreference {
    #[default]
    AnyTime,
    /// Starts before 12:00 local.
    Morning,
    /// Starts in `[12:00, 17:00)` local.
    Afternoon,
    /// Starts at or after 17:00 local.
    Evening,
}

impl TimePreference {
    /// Parse what a caller says ("any time", "in the morning", "after lunch").
    pub fn parse(phrase: &str) -> Option<Self> {
        let p = phrase
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        match p.as_str() {
            "" | "any" | "any time" | "anytime" | "whenever" | "no preference" | "flexible" => {
                return Some(TimePreference::AnyTime);
            }
            "am" | "early" => return Some(TimePreference::Morning),
            "pm" | "after lunch" => return Some(TimePreference::Afternoon),
            "late" | "after work" | "night" => return Some(TimePreference::Evening),
            _ => {}
        }
        if p.contains("morning") {
            Some(TimePreference::Morning)
        } else if p.contains("afternoon") {
            Some(TimePreference::Afternoon)
        } else if p.contains("evening") {
            Some(TimePreference::Evening)
        } else {
            None
        }
    }

    pub fn matches(self, local_start: ClockTime) -> bool {
        const FIVE_PM: u16 = 17 * 60;
        let m = local_start.minutes();
        match self {
            TimePreference::AnyTime => true,
            TimePreference::Morning => m < ClockTime::NOON.minutes(),
            TimePreference::Afternoon => (ClockTime::NOON.minutes()..FIVE_PM).contains(&m),
            TimePreference::Evening => m >= FIVE_PM,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimePreference::AnyTime => "any time",
            TimePreference::Morning => "morning",
            TimePreference::Afternoon => "afternoon",
            TimePreference::Evening => "evening",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub target: SearchTarget,
    /// Overrides each vet's practice zone when set.
    pub timezone: Option<String>,
    pub from: NaiveDate,
    /// Inclusive.
    pub to: NaiveDate,
    /// Defaults per vet to the practice's default appointment length.
    pub duration_min: Option<u32>,
    pub preference: TimePreference,
}

impl Engine {
    /// Earliest matching slot: dates ascending, then vets by id, then time.
    pub async fn first_available(&self, query: &SearchQuery) -> Result<Option<Slot>, EngineError> {
        Ok(self.first_n_available(query, 1).await?.into_iter().next())
    }

    /// Up to `n` matching slots in search order.
    pub async fn first_n_available(
        &self,
        query: &SearchQuery,
        n: usize,
    ) -> Result<Vec<Slot>, EngineError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > MAX_SEARCH_RESULTS {
            return Err(EngineError::LimitExceeded("too many search results requested"));
        }
        validate_date_range(query.from, query.to)?;
        if let Some(d) = query.duration_min {
            validate_duration(d)?;
        }
        let override_conv = query
            .timezone
            .as_deref()
            .map(crate::tz::TimeZoneConverter::new)
            .transpose()?;
        let vets = self.resolve_target(&query.target)?;

        let mut found = Vec::new();
        let mut date = query.from;
        while date <= query.to {
            for vet_id in &vets {
                let Some(vs) = self.store.vet(vet_id) else { continue };
                let guard = vs.read().await;
                if !guard.active {
                    continue;
                }
                let Some(practice) = self.store.practice(&guard.practice_id) else {
                    continue;
                };
                let converter = match override_conv {
                    Some(c) => c,
                    None => self.converter_for(&practice.settings, None)?,
                };
                let duration = query
                    .duration_min
                    .unwrap_or(practice.settings.default_duration_min);
                let slots = slots_for_vet(&guard, &practice.settings, &converter, date, duration);
                for slot in slots {
                    if query.preference.matches(slot.local_start) {
                        found.push(slot);
                        if found.len() == n {
                            return Ok(found);
                        }
                    }
                }
            }
            if date == query.to {
                break;
            }
            date = next_day(date);
        }

        if found.is_empty() {
            debug!(
                from = %query.from,
                to = %query.to,
                preference = query.preference.as_str(),
                vets = vets.len(),
                "no availability in range"
            );
        }
        Ok(found)
    }

    /// Vet ids to scan, sorted by id, deduplicated.
    fn resolve_target(&self, target: &SearchTarget) -> Result<Vec<Ulid>, EngineError> {
        let mut ids = match target {
            SearchTarget::Vets(ids) => {
                if let Some(missing) = ids.iter().find(|id| !self.store.contains_vet(id)) {
                    return Err(EngineError::NotFound(*missing));
                }
                ids.clone()
            }
            SearchTarget::Practice(pid) => {
                if !self.store.contains_practice(pid) {
                    return Err(EngineError::NotFound(*pid));
                }
                self.store.vets_for_practice(pid)
            }
        };
        ids.sort();
        ids.dedup();
        if ids.len() > MAX_SEARCH_VETS {
            return Err(EngineError::LimitExceeded("too many vets in search"));
        }
        Ok(ids)
    }
}

pub(super) fn validate_date_range(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if to < from {
        return Err(EngineError::InvalidRange(format!("{to} is before {from}")));
    }
    let days = (to - from).num_days() + 1;
    if days > MAX_SEARCH_DAYS {
        return Err(EngineError::InvalidRange(format!(
            "{days} days exceeds the {MAX_SEARCH_DAYS}-day search window"
        )));
    }
    Ok(())
}
