use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Deserialize;

use crate::api::ReportApi;
use crate::error::{ConfigError, Result};
use crate::predicate::Predicate;
use crate::queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Cadence {
    Days(u32),
    Hours(u32),
}

impl Cadence {
    pub const DAILY: Cadence = Cadence::Days(1);

    pub fn duration(&self) -> Duration {
        match self {
            Cadence::Days(days) => Duration::days(i64::from(*days)),
            Cadence::Hours(hours) => Duration::hours(i64::from(*hours)),
        }
    }

    fn validate(self) -> std::result::Result<Self, ConfigError> {
        match self {
            Cadence::Days(0) | Cadence::Hours(0) => {
                Err(ConfigError::InvalidCadence(self.to_string()))
            }
            _ => Ok(self),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Days(days) => write!(f, "{days}d"),
            Cadence::Hours(hours) => write!(f, "{hours}h"),
        }
    }
}

impl FromStr for Cadence {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let cadence = match trimmed.as_str() {
            "hourly" => Cadence::Hours(1),
            "daily" => Cadence::Days(1),
            "weekly" => Cadence::Days(7),
            other => {
                let invalid = || ConfigError::InvalidCadence(s.to_string());
                let unit = other.chars().last().ok_or_else(invalid)?;
                let count: u32 = other[..other.len() - unit.len_utf8()]
                    .parse()
                    .map_err(|_| invalid())?;
                match unit {
                    'd' => Cadence::Days(count),
                    'h' => Cadence::Hours(count),
                    _ => return Err(invalid()),
                }
            }
        };
        cadence.validate()
    }
}

impl TryFrom<String> for Cadence {
    type Error = ConfigError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> std::result::Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// `[left, right)`, or `[left, right]` for the last interval of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub left: DateTime<Utc>,
    pub right: DateTime<Utc>,
    pub closed_right: bool,
}

impl Interval {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.left
            && (instant < self.right || (self.closed_right && instant == self.right))
    }

    pub fn predicate(&self, timestamp_column: &str) -> Predicate {
        Predicate::TimestampRange {
            column: timestamp_column.to_string(),
            start: self.left,
            end: self.right,
            inclusive_end: self.closed_right,
        }
    }

    pub fn label(&self) -> String {
        if self.left.time() == NaiveTime::MIN && self.right - self.left >= Duration::days(1) {
            self.left.format("%Y-%m-%d").to_string()
        } else {
            self.left.format("%Y-%m-%d %H:%M").to_string()
        }
    }
}

/// Splits `window` into consecutive intervals of length `cadence`.
///
/// The final interval is closed on the right and clipped to `window.end`, so
/// the union of the partition is exactly `[start, end]`. A zero-length window
/// has no intervals.
pub fn partition(
    window: &TimeWindow,
    cadence: Cadence,
) -> std::result::Result<Vec<Interval>, ConfigError> {
    let cadence = cadence.validate()?;
    let window = TimeWindow::new(window.start, window.end)?;
    let step = cadence.duration();

    let mut intervals = Vec::new();
    let mut left = window.start;
    while left < window.end {
        match left.checked_add_signed(step) {
            Some(right) if right < window.end => {
                intervals.push(Interval {
                    left,
                    right,
                    closed_right: false,
                });
                left = right;
            }
            _ => {
                intervals.push(Interval {
                    left,
                    right: window.end,
                    closed_right: true,
                });
                break;
            }
        }
    }
    Ok(intervals)
}

pub fn floor_to_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub fn ceil_to_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    let floor = floor_to_day(instant);
    if floor == instant {
        floor
    } else {
        floor + Duration::days(1)
    }
}

/// The dataset view a window is inferred from when no bounds are configured.
#[derive(Debug, Clone, Copy)]
pub struct EventSource<'a> {
    pub dataset_id: &'a str,
    pub model_id: &'a str,
    pub timestamp_column: &'a str,
}

/// A window as configured: any of explicit bounds, a lookback, or nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSpec {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub lookback: Option<Duration>,
}

impl WindowSpec {
    pub fn explicit(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            lookback: None,
        }
    }

    pub fn lookback(duration: Duration) -> Self {
        Self {
            lookback: Some(duration),
            ..Self::default()
        }
    }

    /// Resolves the window without touching the backend.
    ///
    /// Returns `Ok(None)` when the start can only be inferred from data.
    pub fn resolve_local(
        &self,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<TimeWindow>, ConfigError> {
        let end = self.end.unwrap_or(now);
        if let Some(lookback) = self.lookback {
            if lookback < Duration::zero() {
                return Err(ConfigError::InvalidSpec(format!(
                    "lookback must not be negative, got {lookback}"
                )));
            }
            return TimeWindow::new(end - lookback, end).map(Some);
        }
        match self.start {
            Some(start) => TimeWindow::new(start, end).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves the window, querying the event range of `source` if needed.
    pub async fn resolve(
        &self,
        api: &dyn ReportApi,
        project_id: &str,
        source: EventSource<'_>,
        now: DateTime<Utc>,
    ) -> Result<TimeWindow> {
        if let Some(window) = self.resolve_local(now)? {
            return Ok(window);
        }

        let bounds = queries::fetch_timestamp_bounds(
            api,
            project_id,
            source.dataset_id,
            source.model_id,
            source.timestamp_column,
        )
        .await?;
        let (min, max) = bounds.ok_or_else(|| {
            ConfigError::InvalidSpec(format!(
                "cannot infer a time window: dataset `{}` has no events for model `{}`",
                source.dataset_id, source.model_id
            ))
        })?;
        let start = floor_to_day(min);
        let end = self.end.unwrap_or_else(|| ceil_to_day(max));
        log::debug!("inferred window {start} .. {end} from {}", source.dataset_id);
        Ok(TimeWindow::new(start, end)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{table, FakeApi};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn daily_partition_closes_last_interval() {
        let window = TimeWindow::new(day(1), day(4)).unwrap();
        let intervals = partition(&window, Cadence::DAILY).unwrap();

        assert_eq!(intervals.len(), 3);
        assert_eq!((intervals[0].left, intervals[0].right), (day(1), day(2)));
        assert_eq!((intervals[1].left, intervals[1].right), (day(2), day(3)));
        assert_eq!((intervals[2].left, intervals[2].right), (day(3), day(4)));
        assert!(!intervals[0].closed_right && !intervals[1].closed_right);
        assert!(intervals[2].closed_right);
        assert!(intervals[2].contains(day(4)));
        assert!(!intervals[0].contains(day(2)));
    }

    #[test]
    fn uneven_cadence_clips_final_interval() {
        let end = Utc.with_ymd_and_hms(2023, 1, 4, 12, 0, 0).unwrap();
        let window = TimeWindow::new(day(1), end).unwrap();
        let intervals = partition(&window, Cadence::Days(2)).unwrap();

        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[1].left, day(3));
        assert_eq!(intervals[1].right, end);
    }

    #[test]
    fn hourly_cadence() {
        let window = TimeWindow::new(day(1), day(2)).unwrap();
        let intervals = partition(&window, Cadence::Hours(6)).unwrap();
        assert_eq!(intervals.len(), 4);
        assert_eq!(intervals[1].label(), "2023-01-01 06:00");
    }

    #[test]
    fn zero_length_window_is_empty() {
        let window = TimeWindow::new(day(1), day(1)).unwrap();
        assert!(partition(&window, Cadence::DAILY).unwrap().is_empty());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let err = TimeWindow::new(day(4), day(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWindow { .. }));

        let inverted = TimeWindow {
            start: day(4),
            end: day(1),
        };
        assert!(partition(&inverted, Cadence::DAILY).is_err());
    }

    #[test]
    fn parses_cadences() {
        assert_eq!("7d".parse::<Cadence>().unwrap(), Cadence::Days(7));
        assert_eq!("6h".parse::<Cadence>().unwrap(), Cadence::Hours(6));
        assert_eq!("daily".parse::<Cadence>().unwrap(), Cadence::DAILY);
        assert!("0d".parse::<Cadence>().is_err());
        assert!("3w".parse::<Cadence>().is_err());
        assert!("d".parse::<Cadence>().is_err());
        assert_eq!(Cadence::Hours(12).to_string(), "12h");
    }

    #[test]
    fn lookback_is_anchored_on_end() {
        let spec = WindowSpec {
            end: Some(day(10)),
            ..WindowSpec::lookback(Duration::days(7))
        };
        let window = spec.resolve_local(day(20)).unwrap().unwrap();
        assert_eq!(window, TimeWindow::new(day(3), day(10)).unwrap());
    }

    #[test]
    fn missing_end_defaults_to_now() {
        let spec = WindowSpec {
            start: Some(day(2)),
            ..WindowSpec::default()
        };
        let window = spec.resolve_local(day(5)).unwrap().unwrap();
        assert_eq!(window.end, day(5));
        assert_eq!(WindowSpec::default().resolve_local(day(5)).unwrap(), None);
    }

    #[tokio::test]
    async fn infers_window_from_event_range() {
        let api = FakeApi::default().with_slice(
            "MIN(timestamp)",
            table(
                &["min", "max"],
                vec![vec![json!("2023-01-01 08:30:00"), json!("2023-01-03 17:00:00")]],
            ),
        );
        let source = EventSource {
            dataset_id: "production",
            model_id: "m",
            timestamp_column: "timestamp",
        };
        let window = WindowSpec::default()
            .resolve(&api, "p", source, day(20))
            .await
            .unwrap();
        assert_eq!(window, TimeWindow::new(day(1), day(4)).unwrap());
    }

    proptest! {
        #[test]
        fn prop_partition_covers_window(
            start_secs in 1_600_000_000i64..1_700_000_000i64,
            length_secs in 0i64..(60 * 86_400),
            hours in 1u32..72,
            use_days in any::<bool>(),
        ) {
            let start = DateTime::from_timestamp(start_secs, 0).unwrap();
            let end = start + Duration::seconds(length_secs);
            let cadence = if use_days { Cadence::Days(hours % 10 + 1) } else { Cadence::Hours(hours) };
            let intervals = partition(&TimeWindow::new(start, end).unwrap(), cadence).unwrap();

            if length_secs == 0 {
                prop_assert!(intervals.is_empty());
            } else {
                prop_assert_eq!(intervals[0].left, start);
                prop_assert_eq!(intervals[intervals.len() - 1].right, end);
                for pair in intervals.windows(2) {
                    prop_assert_eq!(pair[0].right, pair[1].left);
                    prop_assert!(!pair[0].closed_right);
                }
                for interval in &intervals {
                    prop_assert!(interval.left < interval.right);
                    prop_assert!(interval.right - interval.left <= cadence.duration());
                }
                prop_assert!(intervals[intervals.len() - 1].closed_right);
            }
        }
    }
}
