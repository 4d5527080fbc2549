// ============================================================
// Summary Writer
// ============================================================
// Records training summaries to an event log, one JSON object
// per training step.
//
// A summary holds:
//   - scalars:    name → value (loss, accuracy, learning rate)
//   - histograms: name → distribution of a variable's values
//
// Output file: <logging directory>/events.jsonl
//
// Example line:
//   {"step":3,"wall_time":1716.2,"scalars":{"loss":0.41},
//    "histograms":{"conv_1/weights":{"min":-0.8,...}}}
//
// Appending one line per step keeps the file readable while the
// run is still going, and a crashed run loses at most one line.
//
// JSON has no NaN or infinity, so non-finite values are written as
// the strings "NaN", "inf" and "-inf" and parsed back on read.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub const EVENTS_FILE: &str = "events.jsonl";

/// Buckets per histogram.
pub const HISTOGRAM_BUCKETS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Inclusive upper edge.
    #[serde(with = "json_float")]
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    #[serde(with = "json_float")]
    pub min:     f64,
    #[serde(with = "json_float")]
    pub max:     f64,
    #[serde(with = "json_float")]
    pub mean:    f64,
    #[serde(with = "json_float")]
    pub std:     f64,
    pub count:   usize,
    pub buckets: Vec<Bucket>,
}

impl Histogram {
    /// Equal-width buckets between the min and max of `values`.
    pub fn from_values(values: &[f32], num_buckets: usize) -> Self {
        if values.is_empty() {
            return Self { min: 0.0, max: 0.0, mean: 0.0, std: 0.0, count: 0, buckets: Vec::new() };
        }

        let count = values.len();
        let (min, max) = values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v as f64), hi.max(v as f64))
        });
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count as f64;
        let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / count as f64;

        let num_buckets = num_buckets.max(1);
        let width = (max - min) / num_buckets as f64;
        let mut counts = vec![0usize; num_buckets];
        for &v in values {
            let i = if width > 0.0 {
                (((v as f64 - min) / width) as usize).min(num_buckets - 1)
            } else {
                0
            };
            counts[i] += 1;
        }
        let buckets = counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| Bucket { upper: min + width * (i + 1) as f64, count })
            .collect();

        Self { min, max, mean, std: var.sqrt(), count, buckets }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default, with = "json_float::map")]
    pub scalars:    BTreeMap<String, f64>,
    #[serde(default)]
    pub histograms: BTreeMap<String, Histogram>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }

    pub fn add_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.scalars.insert(name.into(), value);
    }

    pub fn add_histogram(&mut self, name: impl Into<String>, values: &[f32]) {
        self.histograms
            .insert(name.into(), Histogram::from_values(values, HISTOGRAM_BUCKETS));
    }

    /// Merge `other` into `self`; entries of `other` win.
    pub fn merge(&mut self, other: Summary) {
        self.scalars.extend(other.scalars);
        self.histograms.extend(other.histograms);
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.histograms.is_empty()
    }
}

/// One line of the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub step:      u64,
    pub wall_time: f64,
    #[serde(flatten)]
    pub summary:   Summary,
}

/// Appends summaries to `events.jsonl` in a directory.
pub struct SummaryWriter {
    path: PathBuf,
}

impl SummaryWriter {
    /// Create the directory if needed. Existing events are kept.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create summary directory '{}'", dir.display()))?;
        let path = dir.join(EVENTS_FILE);
        tracing::debug!("Summary events go to '{}'", path.display());
        Ok(Self { path })
    }

    /// Append `summary` recorded at `step`.
    pub fn add_summary(&self, summary: &Summary, step: u64) -> Result<()> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let event = SummaryEvent { step, wall_time, summary: summary.clone() };
        let line = serde_json::to_string(&event)?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open '{}'", self.path.display()))?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read back every event of an event log.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<SummaryEvent>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read events from '{}'", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("Malformed summary event"))
        .collect()
}

// ─── Non-finite floats ────────────────────────────────────────────────────────

/// An f64 that survives JSON even when it is NaN or infinite.
struct JsonFloat(f64);

impl Serialize for JsonFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_finite() {
            serializer.serialize_f64(self.0)
        } else {
            serializer.collect_str(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for JsonFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(JsonFloat(v)),
            Repr::Text(text) => match text.parse::<f64>() {
                Ok(v) if !v.is_finite() => Ok(JsonFloat(v)),
                _ => Err(de::Error::custom(format!("expected a number, found '{text}'"))),
            },
        }
    }
}

mod json_float {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        JsonFloat(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        JsonFloat::deserialize(deserializer).map(|v| v.0)
    }

    pub mod map {
        use super::*;

        pub fn serialize<S: Serializer>(map: &BTreeMap<String, f64>, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_map(map.iter().map(|(k, &v)| (k, JsonFloat(v))))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error> {
            let map = BTreeMap::<String, JsonFloat>::deserialize(deserializer)?;
            Ok(map.into_iter().map(|(k, v)| (k, v.0)).collect())
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_statistics() {
        let h = Histogram::from_values(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(h.count, 4);
        assert_eq!(h.min, 1.0);
        assert_eq!(h.max, 4.0);
        assert!((h.mean - 2.5).abs() < 1e-12);
        assert!((h.std - 1.25f64.sqrt()).abs() < 1e-12);
        // the max falls in the last bucket
        let counts: Vec<usize> = h.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 2]);
    }

    #[test]
    fn constant_values_share_one_bucket() {
        let h = Histogram::from_values(&[0.5; 6], 4);
        assert_eq!(h.buckets[0].count, 6);
        assert_eq!(h.std, 0.0);
    }

    #[test]
    fn events_are_appended_per_step() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path()).unwrap();

        let mut summary = Summary::new().scalar("loss", 0.5);
        summary.add_histogram("w", &[0.0, 1.0]);
        writer.add_summary(&summary, 1).unwrap();
        writer.add_summary(&Summary::new().scalar("loss", 0.25), 2).unwrap();

        let events = read_events(writer.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].step, 1);
        assert_eq!(events[0].summary, summary);
        assert_eq!(events[1].summary.scalars["loss"], 0.25);
    }

    #[test]
    fn non_finite_values_survive_the_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path()).unwrap();

        let mut summary = Summary::new()
            .scalar("loss", f64::NAN)
            .scalar("grad_norm", f64::INFINITY)
            .scalar("accuracy", 0.5);
        summary.add_histogram("w", &[f32::NAN]);
        writer.add_summary(&summary, 7).unwrap();

        let line = std::fs::read_to_string(writer.path()).unwrap();
        assert!(line.contains(r#""loss":"NaN""#));
        assert!(line.contains(r#""grad_norm":"inf""#));

        let events = read_events(writer.path()).unwrap();
        let scalars = &events[0].summary.scalars;
        assert!(scalars["loss"].is_nan());
        assert_eq!(scalars["grad_norm"], f64::INFINITY);
        assert_eq!(scalars["accuracy"], 0.5);
        assert!(events[0].summary.histograms["w"].mean.is_nan());
    }

    #[test]
    fn non_numeric_strings_are_still_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(EVENTS_FILE);
        std::fs::write(&path, r#"{"step":1,"wall_time":0.0,"scalars":{"loss":"low"}}"#).unwrap();
        assert!(read_events(&path).is_err());
    }
}
