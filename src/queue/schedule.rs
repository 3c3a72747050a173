//! Recurring job schedules.
//!
//! A schedule is keyed by a BLAKE3 hash of its queue, repeat options and explicit
//! job id, so resubmitting the same recurring document replaces rather than duplicates it.
//! Instances are materialized with ids of the form `repeat:<key>:<millis>`.

use crate::document::{JobOptions, RepeatOptions};
use crate::error::DocumentError;
use crate::queue::record::{NewJob, ScheduleRecord};
use crate::types::JobKind;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

const INSTANCE_PREFIX: &str = "repeat:";

/// Check a repeat declaration without computing any fire time.
pub fn validate_repeat(repeat: &RepeatOptions) -> Result<(), String> {
    match (&repeat.cron, repeat.every) {
        (Some(_), Some(_)) => return Err("repeat takes either cron or every, not both".to_string()),
        (None, None) => return Err("repeat requires cron or every".to_string()),
        (None, Some(0)) => return Err("repeat.every must be greater than 0".to_string()),
        (Some(expr), None) => {
            parse_cron(expr)?;
        }
        (None, Some(_)) => {}
    }
    if let Some(tz) = &repeat.tz {
        parse_tz(tz)?;
    }
    let start = repeat.start_millis()?;
    let end = repeat.end_millis()?;
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err("repeat.endDate is before repeat.startDate".to_string());
        }
    }
    Ok(())
}

/// Parse a 5- or 6-field cron expression (a seconds field is added to 5-field input).
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        _ => {
            return Err(format!(
                "cron expression '{}' must have 5 or 6 fields",
                expr
            ))
        }
    };
    Schedule::from_str(&normalized).map_err(|e| format!("invalid cron expression '{}': {}", expr, e))
}

fn parse_tz(tz: &str) -> Result<Tz, String> {
    tz.parse::<Tz>()
        .map_err(|e| format!("unknown time zone '{}': {}", tz, e))
}

/// Key of the schedule a recurring submission belongs to. The starting count is not part
/// of the identity.
pub fn schedule_key(queue: &str, repeat: &RepeatOptions, job_id: Option<&str>) -> String {
    let identity = RepeatOptions {
        count: None,
        ..repeat.clone()
    };
    let spec = serde_json::to_string(&identity).unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(queue.as_bytes());
    hasher.update(b"\0");
    hasher.update(spec.as_bytes());
    hasher.update(b"\0");
    hasher.update(job_id.unwrap_or("").as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

pub fn instance_id(key: &str, millis: u64) -> String {
    format!("{}{}:{}", INSTANCE_PREFIX, key, millis)
}

/// Split an instance id into schedule key and fire time.
pub fn parse_instance_id(id: &str) -> Option<(&str, u64)> {
    let rest = id.strip_prefix(INSTANCE_PREFIX)?;
    let (key, millis) = rest.rsplit_once(':')?;
    Some((key, millis.parse().ok()?))
}

/// First fire time strictly after `after`, honouring start/end dates. `None` when the
/// schedule is exhausted.
pub fn next_run(repeat: &RepeatOptions, after: u64) -> Result<Option<u64>, String> {
    let start = repeat.start_millis()?;
    let end = repeat.end_millis()?;
    let floor = match start {
        Some(start) if start > after => start.saturating_sub(1),
        _ => after,
    };

    let candidate = if let Some(every) = repeat.every {
        let aligned = (floor / every + 1) * every;
        match start {
            Some(start) if aligned < start => start,
            _ => aligned,
        }
    } else if let Some(expr) = &repeat.cron {
        let schedule = parse_cron(expr)?;
        let floor = Utc
            .timestamp_millis_opt(floor as i64)
            .single()
            .ok_or_else(|| format!("time {} is out of range", floor))?;
        let next = match &repeat.tz {
            Some(tz) => {
                let tz = parse_tz(tz)?;
                schedule
                    .after(&floor.with_timezone(&tz))
                    .next()
                    .map(|dt| dt.timestamp_millis())
            }
            None => schedule.after(&floor).next().map(|dt| dt.timestamp_millis()),
        };
        match next {
            Some(ms) => ms.max(0) as u64,
            None => return Ok(None),
        }
    } else {
        return Err("repeat requires cron or every".to_string());
    };

    match end {
        Some(end) if candidate > end => Ok(None),
        _ => Ok(Some(candidate)),
    }
}

impl ScheduleRecord {
    /// Build the schedule for a recurring submission.
    pub fn create(
        queue: &str,
        kind: JobKind,
        document: String,
        options: &JobOptions,
        now: u64,
    ) -> Result<Self, DocumentError> {
        let repeat = options
            .repeat
            .clone()
            .ok_or_else(|| DocumentError::InvalidOptions("missing repeat".to_string()))?;
        let job_id = options.job_id.clone();
        let key = schedule_key(queue, &repeat, job_id.as_deref());
        let next = next_run(&repeat, now)
            .map_err(DocumentError::InvalidOptions)?
            .ok_or_else(|| {
                DocumentError::InvalidOptions("repeat schedule never fires".to_string())
            })?;
        let mut instance_options = options.clone();
        instance_options.repeat = None;
        instance_options.job_id = None;
        let count = repeat.count.unwrap_or(0);
        if matches!(repeat.limit, Some(limit) if count >= limit) {
            return Err(DocumentError::InvalidOptions(
                "repeat.count already reaches repeat.limit".to_string(),
            ));
        }
        Ok(Self {
            key,
            queue: queue.to_string(),
            kind,
            document,
            options: instance_options,
            repeat,
            job_id,
            next_run: next,
            count,
            created_at: now,
        })
    }

    /// Whether the schedule may fire again.
    pub fn exhausted(&self) -> bool {
        matches!(self.repeat.limit, Some(limit) if self.count >= limit)
    }

    /// Job for the current fire time.
    pub fn instance(&self) -> NewJob {
        NewJob {
            queue: self.queue.clone(),
            kind: self.kind,
            document: self.document.clone(),
            options: self.options.clone(),
            id: Some(instance_id(&self.key, self.next_run)),
            repeat_key: Some(self.key.clone()),
        }
    }

    /// Record a fire and move to the next fire time. Returns `false` once the schedule
    /// has nothing left to fire.
    pub fn advance(&mut self) -> Result<bool, String> {
        self.count += 1;
        if self.exhausted() {
            return Ok(false);
        }
        match next_run(&self.repeat, self.next_run)? {
            Some(next) => {
                self.next_run = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DateSpec;

    fn every(ms: u64) -> RepeatOptions {
        RepeatOptions {
            every: Some(ms),
            ..Default::default()
        }
    }

    #[test]
    fn every_aligns_to_interval() {
        assert_eq!(next_run(&every(1_000), 1_500).unwrap(), Some(2_000));
        assert_eq!(next_run(&every(1_000), 2_000).unwrap(), Some(3_000));
    }

    #[test]
    fn start_and_end_bound_fire_times() {
        let mut repeat = every(1_000);
        repeat.start_date = Some(DateSpec::Millis(10_500));
        repeat.end_date = Some(DateSpec::Millis(12_000));
        assert_eq!(next_run(&repeat, 0).unwrap(), Some(11_000));
        assert_eq!(next_run(&repeat, 11_000).unwrap(), Some(12_000));
        assert_eq!(next_run(&repeat, 12_000).unwrap(), None);
    }

    #[test]
    fn five_field_cron_gets_seconds() {
        let repeat = RepeatOptions {
            cron: Some("*/5 * * * *".to_string()),
            ..Default::default()
        };
        validate_repeat(&repeat).unwrap();
        // 1970-01-01T00:00:00Z + 1s -> next multiple of five minutes
        assert_eq!(next_run(&repeat, 1_000).unwrap(), Some(300_000));
    }

    #[test]
    fn cron_respects_time_zone() {
        let repeat = RepeatOptions {
            cron: Some("0 0 * * *".to_string()),
            tz: Some("Asia/Tokyo".to_string()),
            ..Default::default()
        };
        // Midnight in Tokyo is 15:00 UTC.
        assert_eq!(next_run(&repeat, 0).unwrap(), Some(15 * 3_600_000));
    }

    #[test]
    fn invalid_repeat_specs_are_rejected() {
        assert!(validate_repeat(&RepeatOptions::default()).is_err());
        assert!(validate_repeat(&every(0)).is_err());
        let bad_cron = RepeatOptions {
            cron: Some("not a cron".to_string()),
            ..Default::default()
        };
        assert!(validate_repeat(&bad_cron).is_err());
        let bad_tz = RepeatOptions {
            every: Some(10),
            tz: Some("Mars/Olympus".to_string()),
            ..Default::default()
        };
        assert!(validate_repeat(&bad_tz).is_err());
    }

    #[test]
    fn keys_are_stable_and_distinguish_job_ids() {
        let a = schedule_key("q", &every(1_000), None);
        assert_eq!(a, schedule_key("q", &every(1_000), None));
        assert_ne!(a, schedule_key("q", &every(1_000), Some("x")));
        assert_ne!(a, schedule_key("other", &every(1_000), None));
    }

    #[test]
    fn instance_ids_round_trip() {
        let id = instance_id("abc", 42);
        assert_eq!(id, "repeat:abc:42");
        assert_eq!(parse_instance_id(&id), Some(("abc", 42)));
        assert_eq!(parse_instance_id("17"), None);
    }

    #[test]
    fn limit_exhausts_schedule() {
        let options = JobOptions {
            repeat: Some(RepeatOptions {
                every: Some(10),
                limit: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut schedule =
            ScheduleRecord::create("q", JobKind::Generic, String::new(), &options, 5).unwrap();
        assert_eq!(schedule.next_run, 10);
        assert!(schedule.options.repeat.is_none());
        assert!(schedule.advance().unwrap());
        assert_eq!(schedule.next_run, 20);
        assert!(!schedule.advance().unwrap());
    }

    #[test]
    fn starting_count_counts_against_the_limit() {
        let repeat = RepeatOptions {
            every: Some(10),
            limit: Some(3),
            count: Some(2),
            ..Default::default()
        };
        let options = JobOptions {
            repeat: Some(repeat.clone()),
            ..Default::default()
        };
        let mut schedule =
            ScheduleRecord::create("q", JobKind::Generic, String::new(), &options, 5).unwrap();
        assert_eq!(schedule.count, 2);
        assert!(!schedule.advance().unwrap());

        let done = JobOptions {
            repeat: Some(RepeatOptions {
                count: Some(3),
                ..repeat.clone()
            }),
            ..Default::default()
        };
        assert!(ScheduleRecord::create("q", JobKind::Generic, String::new(), &done, 5).is_err());
        assert_eq!(
            schedule_key("q", &repeat, None),
            schedule_key("q", &RepeatOptions { count: None, ..repeat }, None)
        );
    }
}
