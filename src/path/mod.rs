// src/path/mod.rs - Recorded paths: waypoints, travel profile and cleanup transforms
pub mod file_format;

use crate::hardware::Direction;
use crate::motion::{ArmPosition, Axis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum end-to-end travel on an axis before a direction hint is derived from it.
const MIN_HINT_TRAVEL: f64 = 1.0;

/// One recorded position. Immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub sequence_number: u32,
    pub x_percent: f64,
    pub y_percent: f64,
    pub elapsed_since_start: Duration,
}

impl Waypoint {
    pub fn position(&self) -> ArmPosition {
        ArmPosition::new(self.x_percent, self.y_percent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Extend,
    Retract,
    #[serde(other)]
    Unknown,
}

impl PathKind {
    pub fn infer_from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("retract") {
            PathKind::Retract
        } else if name.contains("extend") {
            PathKind::Extend
        } else {
            PathKind::Unknown
        }
    }

    /// Direction hints and skip logic only apply to known one-way paths.
    pub fn is_directional(self) -> bool {
        !matches!(self, PathKind::Unknown)
    }
}

/// Per-path travel summary used during playback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProfile {
    pub kind: PathKind,
    pub x_travel: f64,
    pub y_travel: f64,
}

impl PathProfile {
    /// The axis with the larger end-to-end travel; Y on a tie.
    pub fn governing_axis(&self) -> Axis {
        if self.x_travel.abs() > self.y_travel.abs() {
            Axis::X
        } else {
            Axis::Y
        }
    }

    pub fn travel(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x_travel,
            Axis::Y => self.y_travel,
        }
    }

    /// Fixed direction for `axis` while playing this path, if the path is directional
    /// and the axis actually travels.
    pub fn direction_hint(&self, axis: Axis) -> Option<Direction> {
        if !self.kind.is_directional() {
            return None;
        }
        let travel = self.travel(axis);
        if travel.abs() < MIN_HINT_TRAVEL {
            None
        } else if travel > 0.0 {
            Some(Direction::Forward)
        } else {
            Some(Direction::Reverse)
        }
    }

    /// True when `current` is already past `waypoint` on the governing axis in the
    /// path's direction of travel.
    pub fn should_skip(&self, waypoint: &Waypoint, current: ArmPosition) -> bool {
        if !self.kind.is_directional() {
            return false;
        }
        let axis = self.governing_axis();
        let sign = self.travel(axis).signum();
        if self.travel(axis) == 0.0 {
            return false;
        }
        let (current, target) = match axis {
            Axis::X => (current.x, waypoint.x_percent),
            Axis::Y => (current.y, waypoint.y_percent),
        };
        (current - target) * sign > 0.0
    }
}

/// Listing entry returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathSummary {
    pub name: String,
    pub kind: PathKind,
    pub recorded_at: DateTime<Utc>,
    pub total_duration: f64,
    pub waypoint_count: usize,
}

/// An ordered sequence of waypoints; insertion order is playback order and
/// sequence numbers run 1, 2, 3, ...
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub name: String,
    pub kind: PathKind,
    pub recorded_at: DateTime<Utc>,
    waypoints: Vec<Waypoint>,
}

impl Path {
    pub fn new(name: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            kind: PathKind::infer_from_name(&name),
            name,
            recorded_at,
            waypoints: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: PathKind) -> Self {
        self.kind = kind;
        self
    }

    /// Append a waypoint, assigning the next sequence number.
    pub fn push(&mut self, x_percent: f64, y_percent: f64, elapsed_since_start: Duration) -> &Waypoint {
        let sequence_number = self.waypoints.len() as u32 + 1;
        self.waypoints.push(Waypoint {
            sequence_number,
            x_percent: x_percent.clamp(0.0, 100.0),
            y_percent: y_percent.clamp(0.0, 100.0),
            elapsed_since_start,
        });
        &self.waypoints[self.waypoints.len() - 1]
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn last(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    pub fn total_duration(&self) -> Duration {
        self.waypoints
            .last()
            .map(|w| w.elapsed_since_start)
            .unwrap_or_default()
    }

    pub fn profile(&self) -> PathProfile {
        let (x_travel, y_travel) = match (self.waypoints.first(), self.waypoints.last()) {
            (Some(first), Some(last)) => (
                last.x_percent - first.x_percent,
                last.y_percent - first.y_percent,
            ),
            _ => (0.0, 0.0),
        };
        PathProfile {
            kind: self.kind,
            x_travel,
            y_travel,
        }
    }

    pub fn summary(&self) -> PathSummary {
        PathSummary {
            name: self.name.clone(),
            kind: self.kind,
            recorded_at: self.recorded_at,
            total_duration: self.total_duration().as_secs_f64(),
            waypoint_count: self.waypoints.len(),
        }
    }

    /// Drop every waypoint that moves backwards on the primary axis, so playback
    /// never has to reverse. Elapsed times are rebased on the first waypoint.
    pub fn make_unidirectional(&self) -> Path {
        if self.waypoints.len() < 3 {
            return self.rebuilt(self.name.clone(), self.kind, self.waypoints.iter());
        }
        let profile = self.profile();
        let axis = profile.governing_axis();
        let sign = if profile.travel(axis) >= 0.0 { 1.0 } else { -1.0 };
        let coordinate = |w: &Waypoint| match axis {
            Axis::X => w.x_percent,
            Axis::Y => w.y_percent,
        };

        let mut kept: Vec<&Waypoint> = Vec::with_capacity(self.waypoints.len());
        let mut frontier = coordinate(&self.waypoints[0]);
        for waypoint in &self.waypoints {
            let value = coordinate(waypoint);
            if kept.is_empty() || (value - frontier) * sign >= 0.0 {
                frontier = value;
                kept.push(waypoint);
            }
        }
        tracing::info!(
            "Path '{}': kept {} of {} waypoints moving {} on {} axis",
            self.name,
            kept.len(),
            self.waypoints.len(),
            if sign > 0.0 { "forward" } else { "reverse" },
            axis
        );
        self.rebuilt(self.name.clone(), self.kind, kept.into_iter())
    }

    /// Keep the first, the last and every `keep_every`-th waypoint in between.
    pub fn decimate(&self, keep_every: usize) -> Path {
        if keep_every < 2 || self.waypoints.len() < 3 {
            return self.rebuilt(self.name.clone(), self.kind, self.waypoints.iter());
        }
        let last = self.waypoints.len() - 1;
        let kept = self
            .waypoints
            .iter()
            .enumerate()
            .filter(|(i, _)| *i == 0 || *i == last || i % keep_every == 0)
            .map(|(_, w)| w);
        self.rebuilt(self.name.clone(), self.kind, kept)
    }

    /// Same positions in reverse order with mirrored timing, e.g. a retract path
    /// built from an extend path.
    pub fn reversed(&self, name: impl Into<String>) -> Path {
        let name = name.into();
        let kind = match PathKind::infer_from_name(&name) {
            PathKind::Unknown => match self.kind {
                PathKind::Extend => PathKind::Retract,
                PathKind::Retract => PathKind::Extend,
                PathKind::Unknown => PathKind::Unknown,
            },
            inferred => inferred,
        };
        let total = self.total_duration();
        let mut path = Path::new(name, Utc::now()).with_kind(kind);
        for waypoint in self.waypoints.iter().rev() {
            path.push(
                waypoint.x_percent,
                waypoint.y_percent,
                total.saturating_sub(waypoint.elapsed_since_start),
            );
        }
        path
    }

    fn rebuilt<'a>(
        &self,
        name: String,
        kind: PathKind,
        waypoints: impl Iterator<Item = &'a Waypoint>,
    ) -> Path {
        let mut path = Path {
            name,
            kind,
            recorded_at: self.recorded_at,
            waypoints: Vec::new(),
        };
        let mut origin = None;
        for waypoint in waypoints {
            let origin = *origin.get_or_insert(waypoint.elapsed_since_start);
            path.push(
                waypoint.x_percent,
                waypoint.y_percent,
                waypoint.elapsed_since_start.saturating_sub(origin),
            );
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str, points: &[(f64, f64)]) -> Path {
        let mut path = Path::new(name, Utc::now());
        for (i, (x, y)) in points.iter().enumerate() {
            path.push(*x, *y, Duration::from_millis(100 * (i as u64 + 1)));
        }
        path
    }

    #[test]
    fn test_kind_inferred_from_name() {
        assert_eq!(PathKind::infer_from_name("extend_v2"), PathKind::Extend);
        assert_eq!(PathKind::infer_from_name("Retract"), PathKind::Retract);
        assert_eq!(PathKind::infer_from_name("wall"), PathKind::Unknown);
    }

    #[test]
    fn test_push_assigns_sequence_numbers() {
        let p = path("extend", &[(10.0, 10.0), (20.0, 30.0), (120.0, -5.0)]);
        let numbers: Vec<u32> = p.waypoints().iter().map(|w| w.sequence_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(p.waypoints()[2].x_percent, 100.0);
        assert_eq!(p.waypoints()[2].y_percent, 0.0);
    }

    #[test]
    fn test_skip_logic_extend() {
        let p = path("extend", &[(10.0, 10.0), (50.0, 50.0), (90.0, 90.0)]);
        let profile = p.profile();
        let current = ArmPosition::new(70.0, 70.0);
        assert!(profile.should_skip(&p.waypoints()[1], current));
        assert!(!profile.should_skip(&p.waypoints()[2], current));
    }

    #[test]
    fn test_skip_logic_retract_and_unknown() {
        let retract = path("retract", &[(90.0, 90.0), (50.0, 50.0), (10.0, 10.0)]);
        let current = ArmPosition::new(30.0, 30.0);
        assert!(retract.profile().should_skip(&retract.waypoints()[1], current));
        assert!(!retract.profile().should_skip(&retract.waypoints()[2], current));

        let unknown = path("wall", &[(10.0, 10.0), (50.0, 50.0), (90.0, 90.0)]);
        assert!(!unknown.profile().should_skip(&unknown.waypoints()[1], ArmPosition::new(70.0, 70.0)));
    }

    #[test]
    fn test_governing_axis_and_hints() {
        // Wall to extended: X shrinks a little, Y grows a lot.
        let p = path("extend", &[(96.9, 23.1), (80.0, 60.0), (62.3, 88.7)]);
        let profile = p.profile();
        assert_eq!(profile.governing_axis(), Axis::Y);
        assert_eq!(profile.direction_hint(Axis::X), Some(Direction::Reverse));
        assert_eq!(profile.direction_hint(Axis::Y), Some(Direction::Forward));

        let unknown = path("wall", &[(0.0, 0.0), (50.0, 50.0)]).profile();
        assert_eq!(unknown.direction_hint(Axis::X), None);
    }

    #[test]
    fn test_make_unidirectional_drops_backtracking() {
        let p = path(
            "extend",
            &[(0.0, 10.0), (0.0, 20.0), (0.0, 15.0), (0.0, 30.0), (0.0, 25.0), (0.0, 40.0)],
        );
        let cleaned = p.make_unidirectional();
        let ys: Vec<f64> = cleaned.waypoints().iter().map(|w| w.y_percent).collect();
        assert_eq!(ys, vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(cleaned.waypoints()[3].sequence_number, 4);
        assert_eq!(cleaned.waypoints()[0].elapsed_since_start, Duration::ZERO);
    }

    #[test]
    fn test_decimate_keeps_endpoints() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, i as f64)).collect();
        let p = path("extend", &points);
        let thinned = p.decimate(4);
        let xs: Vec<f64> = thinned.waypoints().iter().map(|w| w.x_percent).collect();
        assert_eq!(xs, vec![0.0, 4.0, 8.0, 9.0]);
    }

    #[test]
    fn test_reversed_mirrors_timing() {
        let p = path("extend", &[(10.0, 10.0), (20.0, 20.0), (30.0, 30.0)]);
        let back = p.reversed("retract");
        assert_eq!(back.kind, PathKind::Retract);
        assert_eq!(back.waypoints()[0].x_percent, 30.0);
        assert_eq!(back.waypoints()[0].elapsed_since_start, Duration::ZERO);
        assert_eq!(back.waypoints()[2].elapsed_since_start, Duration::from_millis(200));
        assert_eq!(back.total_duration(), p.total_duration() - Duration::from_millis(100));

        let unnamed = p.reversed("back_to_wall");
        assert_eq!(unnamed.kind, PathKind::Retract);
    }
}
