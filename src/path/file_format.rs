// src/path/file_format.rs - JSON waypoint file format, current and legacy layouts
use crate::path::{Path, PathKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Serialize)]
struct PathFile<'a> {
    version: u32,
    name: &'a str,
    kind: PathKind,
    recorded_at: DateTime<Utc>,
    total_duration: f64,
    waypoint_count: usize,
    waypoints: Vec<WaypointRecord>,
}

#[derive(Debug, Serialize)]
struct WaypointRecord {
    sequence_number: u32,
    x_percent: f64,
    y_percent: f64,
    elapsed_since_start: f64,
}

/// Everything optional; older recorders wrote `points`/`datapoints`,
/// `x_position`/`y_position`, `point_number` and `duration_from_start`.
#[derive(Debug, Deserialize)]
struct RawPathFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    kind: Option<PathKind>,
    #[serde(default, alias = "created_at")]
    recorded_at: Option<RawTimestamp>,
    #[serde(default, alias = "points", alias = "datapoints")]
    waypoints: Vec<RawWaypoint>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawWaypoint {
    #[serde(default, alias = "point_number")]
    sequence_number: Option<u32>,
    #[serde(default, alias = "x_position")]
    x_percent: Option<f64>,
    #[serde(default, alias = "y_position")]
    y_percent: Option<f64>,
    #[serde(default, alias = "duration_from_start")]
    elapsed_since_start: Option<f64>,
    #[serde(default)]
    timestamp: Option<f64>,
}

impl RawTimestamp {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(secs) => {
                let whole = secs.trunc();
                let nanos = ((secs - whole) * 1e9).round().clamp(0.0, 999_999_999.0);
                DateTime::from_timestamp(whole as i64, nanos as u32)
            }
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
        }
    }
}

pub fn to_json(path: &Path) -> Result<String, serde_json::Error> {
    let file = PathFile {
        version: FORMAT_VERSION,
        name: &path.name,
        kind: path.kind,
        recorded_at: path.recorded_at,
        total_duration: path.total_duration().as_secs_f64(),
        waypoint_count: path.len(),
        waypoints: path
            .waypoints()
            .iter()
            .map(|w| WaypointRecord {
                sequence_number: w.sequence_number,
                x_percent: w.x_percent,
                y_percent: w.y_percent,
                elapsed_since_start: w.elapsed_since_start.as_secs_f64(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&file)
}

/// Parse a path file in any known layout. `fallback_name` (the file stem) is used
/// when the file carries no name. Waypoints without coordinates are dropped.
pub fn from_json(contents: &str, fallback_name: &str) -> Result<Path, String> {
    let raw: RawPathFile = serde_json::from_str(contents).map_err(|e| e.to_string())?;

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| fallback_name.to_string());
    let recorded_at = raw
        .recorded_at
        .as_ref()
        .and_then(RawTimestamp::to_datetime)
        .unwrap_or_default();

    let mut path = Path::new(name, recorded_at);
    if let Some(kind) = raw.kind {
        path = path.with_kind(kind);
    }

    let mut sequence_in_order = true;
    let mut expected = 1u32;
    let first_timestamp = raw.waypoints.iter().find_map(|w| w.timestamp);
    for (index, waypoint) in raw.waypoints.iter().enumerate() {
        let (Some(x), Some(y)) = (waypoint.x_percent, waypoint.y_percent) else {
            tracing::warn!(
                "Path '{}': waypoint {} has no coordinates, skipped",
                path.name,
                index + 1
            );
            continue;
        };
        if waypoint.sequence_number != Some(expected) {
            sequence_in_order = false;
        }
        expected += 1;

        let elapsed = waypoint
            .elapsed_since_start
            .or_else(|| Some(waypoint.timestamp? - first_timestamp?))
            .filter(|secs| secs.is_finite())
            .unwrap_or(0.0)
            .max(0.0);
        path.push(x, y, Duration::from_secs_f64(elapsed));
    }

    if path.is_empty() {
        return Err("no usable waypoints".to_string());
    }
    if !sequence_in_order {
        tracing::debug!("Path '{}': sequence numbers renumbered", path.name);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_layout_round_trip() {
        let mut path = Path::new("extend", Utc::now());
        path.push(96.9, 23.1, Duration::from_millis(100));
        path.push(62.3, 88.7, Duration::from_millis(2500));
        let json = to_json(&path).unwrap();
        assert!(json.contains("\"waypoint_count\": 2"));
        assert!(json.contains("\"kind\": \"extend\""));

        let loaded = from_json(&json, "ignored").unwrap();
        assert_eq!(loaded.name, "extend");
        assert_eq!(loaded.waypoints()[1].x_percent, 62.3);
        assert_eq!(loaded.total_duration(), Duration::from_millis(2500));
    }

    #[test]
    fn test_legacy_points_layout() {
        let json = r#"{
            "name": "extend",
            "created_at": 1719400000.5,
            "duration": 3.0,
            "points": [
                {"timestamp": 1719400000.6, "x_position": 96.0, "y_position": 23.0, "duration_from_start": 0.1},
                {"timestamp": 1719400001.6, "x_position": 80.0, "y_position": 50.0, "duration_from_start": 1.1}
            ]
        }"#;
        let path = from_json(json, "extend").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.waypoints()[1].y_percent, 50.0);
        assert_eq!(path.waypoints()[1].sequence_number, 2);
        assert_eq!(path.recorded_at.timestamp(), 1719400000);
        assert!((path.total_duration().as_secs_f64() - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_datapoints_layout_with_timestamps_only() {
        let json = r#"{
            "datapoints": [
                {"point_number": 3, "x_position": 60.0, "y_position": 90.0, "timestamp": 100.0},
                {"point_number": 1, "x_position": 70.0, "y_position": 70.0, "timestamp": 101.5},
                {"point_number": 2, "x_position": 96.0, "y_position": 20.0}
            ]
        }"#;
        let path = from_json(json, "retract").unwrap();
        assert_eq!(path.name, "retract");
        assert_eq!(path.kind, PathKind::Retract);
        let numbers: Vec<u32> = path.waypoints().iter().map(|w| w.sequence_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(path.waypoints()[1].elapsed_since_start, Duration::from_millis(1500));
        assert_eq!(path.waypoints()[2].elapsed_since_start, Duration::ZERO);
    }

    #[test]
    fn test_empty_or_garbage_rejected() {
        assert!(from_json(r#"{"name": "x", "waypoints": []}"#, "x").is_err());
        assert!(from_json("not json", "x").is_err());
    }
}
