//! Heuristic "actively played vs. storage character" score.

use crate::core::{ActivityPayload, AreaId, StoredActivity, Timestamp};
use std::collections::HashMap;

pub const MAX_LEVEL: u32 = 34;
pub const SUSPICIOUS_LEVELS: [u32; 4] = [1, 4, 7, 15];
pub const DEFAULT_BANK_LOCATIONS: [AreaId; 4] = [10, 11, 12, 13];
pub const DEFAULT_ACTIVE_THRESHOLD: f64 = 0.5;

const WEIGHT_LEVEL: f64 = 0.4;
const WEIGHT_LOCATION: f64 = 0.3;
const WEIGHT_SESSION: f64 = 0.3;
const NEUTRAL: f64 = 0.5;
const SUSPICIOUS_PENALTY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityScore {
    pub score: f64,
    pub level_score: f64,
    pub location_score: f64,
    pub session_score: f64,
}

impl ActivityScore {
    pub fn is_active(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

/// Scoring parameters.
#[derive(Debug, Clone)]
pub struct ScoreModel {
    pub bank_locations: Vec<AreaId>,
    pub active_threshold: f64,
}

impl Default for ScoreModel {
    fn default() -> Self {
        Self {
            bank_locations: DEFAULT_BANK_LOCATIONS.to_vec(),
            active_threshold: DEFAULT_ACTIVE_THRESHOLD,
        }
    }
}

struct Streams {
    status: Vec<(Timestamp, bool)>,
    location: Vec<(Timestamp, AreaId)>,
    level: Vec<(Timestamp, u32)>,
}

fn split_streams(activity: &[StoredActivity]) -> Streams {
    let mut streams = Streams {
        status: Vec::new(),
        location: Vec::new(),
        level: Vec::new(),
    };
    for event in activity {
        let at = event.timestamp();
        match event.payload() {
            ActivityPayload::Status { online } => streams.status.push((at, *online)),
            ActivityPayload::Location { area_id } => streams.location.push((at, *area_id)),
            ActivityPayload::TotalLevel { total_level, .. } => {
                streams.level.push((at, *total_level))
            }
            _ => {}
        }
    }
    streams.status.sort_by_key(|(at, _)| *at);
    streams.location.sort_by_key(|(at, _)| *at);
    streams.level.sort_by_key(|(at, _)| *at);
    streams
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Linear map of `value` from [in_min, in_max] onto [out_min, out_max], clamped.
fn scale(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    if in_max <= in_min {
        return out_min;
    }
    let t = clamp01((value - in_min) / (in_max - in_min));
    out_min + (out_max - out_min) * t
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Mean login-to-logout duration in minutes, if any session completed.
pub fn average_session_minutes(activity: &[StoredActivity]) -> Option<f64> {
    let status = split_streams(activity).status;
    if status.len() < 2 {
        return None;
    }

    let mut durations = Vec::new();
    let mut started: Option<Timestamp> = None;
    let mut last: Option<bool> = None;

    for (at, online) in status {
        if online && last != Some(true) {
            started = Some(at);
        } else if !online && last == Some(true) {
            if let Some(start) = started.take()
                && at >= start
            {
                durations.push((at - start).num_milliseconds() as f64 / 60_000.0);
            }
        }
        last = Some(online);
    }

    if durations.is_empty() {
        return None;
    }
    Some(durations.iter().sum::<f64>() / durations.len() as f64)
}

impl ScoreModel {
    pub fn score(&self, activity: &[StoredActivity]) -> ActivityScore {
        if activity.is_empty() {
            return ActivityScore {
                score: 0.0,
                level_score: 0.0,
                location_score: 0.0,
                session_score: 0.0,
            };
        }

        let streams = split_streams(activity);

        let current_level = streams.level.last().map(|(_, level)| *level);
        let increases = streams
            .level
            .windows(2)
            .filter(|pair| pair[1].1 > pair[0].1)
            .count();
        let level_score = match current_level {
            None => NEUTRAL,
            Some(level) if level >= MAX_LEVEL => NEUTRAL,
            Some(_) if increases > 0 => clamp01(scale(increases as f64, 0.0, 3.0, 0.3, 1.0)),
            Some(_) => 0.1,
        };

        let location_score = self.location_score(&streams.location);

        let session_score = match average_session_minutes(activity) {
            None => NEUTRAL,
            Some(mins) if mins <= 10.0 => scale(mins, 0.0, 10.0, 0.0, 0.3),
            Some(mins) if mins <= 30.0 => scale(mins, 10.0, 30.0, 0.3, 0.6),
            Some(mins) if mins <= 60.0 => scale(mins, 30.0, 60.0, 0.6, 0.85),
            Some(mins) if mins <= 120.0 => scale(mins, 60.0, 120.0, 0.85, 1.0),
            Some(_) => 1.0,
        };

        let mut score = WEIGHT_LEVEL * level_score
            + WEIGHT_LOCATION * location_score
            + WEIGHT_SESSION * session_score;

        if let Some(level) = current_level
            && SUSPICIOUS_LEVELS.contains(&level)
            && increases == 0
            && level < MAX_LEVEL
        {
            score -= SUSPICIOUS_PENALTY;
        }

        ActivityScore {
            score: round3(clamp01(score)),
            level_score: round3(level_score),
            location_score: round3(location_score),
            session_score: round3(session_score),
        }
    }

    fn location_score(&self, locations: &[(Timestamp, AreaId)]) -> f64 {
        if locations.is_empty() {
            return NEUTRAL;
        }
        let total = locations.len() as f64;
        let mut counts: HashMap<AreaId, usize> = HashMap::new();
        let mut first_seen: Vec<AreaId> = Vec::new();
        for (_, area) in locations {
            let count = counts.entry(*area).or_insert(0);
            if *count == 0 {
                first_seen.push(*area);
            }
            *count += 1;
        }

        let mut score = counts.len() as f64 / total;
        // Ties resolve to the area seen first.
        let top = first_seen
            .iter()
            .map(|area| (*area, counts[area]))
            .fold(None::<(AreaId, usize)>, |best, (area, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((area, count)),
            });
        if let Some((area, count)) = top
            && self.bank_locations.contains(&area)
        {
            let dominance = count as f64 / total;
            score *= 1.0 - 0.4 * dominance;
        }
        clamp01(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActivityEvent, EntityKind, PartitionKey};
    use chrono::{Duration, TimeZone, Utc};

    fn event(minutes: i64, payload: ActivityPayload) -> StoredActivity {
        StoredActivity {
            event_id: minutes as u64 + 1,
            event: ActivityEvent::new(
                1,
                PartitionKey::new("orien", EntityKind::Character),
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
                payload,
            ),
            processed: false,
        }
    }

    fn status(minutes: i64, online: bool) -> StoredActivity {
        event(minutes, ActivityPayload::Status { online })
    }

    fn location(minutes: i64, area_id: AreaId) -> StoredActivity {
        event(minutes, ActivityPayload::Location { area_id })
    }

    fn level(minutes: i64, total_level: u32) -> StoredActivity {
        event(
            minutes,
            ActivityPayload::TotalLevel {
                total_level,
                classes: Vec::new(),
            },
        )
    }

    #[test]
    fn test_no_activity_scores_zero() {
        let score = ScoreModel::default().score(&[]);
        assert_eq!(score.score, 0.0);
        assert!(!score.is_active(DEFAULT_ACTIVE_THRESHOLD));
    }

    #[test]
    fn test_average_session_minutes() {
        let activity = vec![status(0, true), status(30, false), status(100, true), status(190, false)];
        assert_eq!(average_session_minutes(&activity), Some(60.0));
        assert_eq!(average_session_minutes(&[status(0, false)]), None);
    }

    #[test]
    fn test_bank_mule_scores_inactive() {
        // Parked at level 4 in a bank, short logins.
        let activity = vec![
            level(0, 4),
            status(0, true),
            location(1, 10),
            status(3, false),
            status(60, true),
            location(61, 10),
            status(62, false),
        ];
        let score = ScoreModel::default().score(&activity);
        assert_eq!(score.level_score, 0.1);
        assert_eq!(score.location_score, 0.3);
        assert!(score.score < DEFAULT_ACTIVE_THRESHOLD);
    }

    #[test]
    fn test_levelling_character_scores_active() {
        let activity = vec![
            level(0, 10),
            level(20, 11),
            level(50, 12),
            level(90, 13),
            status(0, true),
            location(5, 100),
            location(30, 200),
            location(60, 300),
            status(120, false),
        ];
        let score = ScoreModel::default().score(&activity);
        assert_eq!(score.level_score, 1.0);
        assert_eq!(score.location_score, 1.0);
        assert_eq!(score.session_score, 1.0);
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn test_capped_level_is_neutral() {
        let score = ScoreModel::default().score(&[level(0, 34)]);
        assert_eq!(score.level_score, 0.5);
        // 0.4 * 0.5 + 0.3 * 0.5 + 0.3 * 0.5
        assert_eq!(score.score, 0.5);
    }

    #[test]
    fn test_session_mapping_breakpoints() {
        let score = ScoreModel::default().score(&[status(0, true), status(20, false)]);
        assert_eq!(score.session_score, 0.45);
    }
}
