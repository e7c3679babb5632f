use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid history JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid history CSV at line {line}: {message}")]
    Csv { line: usize, message: String },

    #[error("Metric '{0}' not found in history")]
    MissingMetric(String),
}

/// Metric families the charts know how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Loss,
    Accuracy,
}

impl Metric {
    /// Candidate (training, validation) key pairs, in lookup order.
    fn keys(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Metric::Loss => &[("loss", "val_loss")],
            Metric::Accuracy => &[("acc", "val_acc"), ("accuracy", "val_accuracy")],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Loss => "Loss",
            Metric::Accuracy => "Accuracy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Min,
    Max,
}

/// 1-based epoch and the metric value recorded there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestEpoch {
    pub epoch: usize,
    pub value: f64,
}

/// Per-epoch metric values from a training run, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory {
    metrics: BTreeMap<String, Vec<f64>>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.metrics.insert(name.into(), values);
    }

    pub fn series(&self, name: &str) -> Result<&[f64], HistoryError> {
        self.metrics
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| HistoryError::MissingMetric(name.to_string()))
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn resolve(&self, metric: Metric, validation: bool) -> Result<&[f64], HistoryError> {
        for &(train_key, val_key) in metric.keys() {
            let key = if validation { val_key } else { train_key };
            if let Some(values) = self.metrics.get(key) {
                return Ok(values.as_slice());
            }
        }
        let (train_key, val_key) = metric.keys()[0];
        Err(HistoryError::MissingMetric(
            if validation { val_key } else { train_key }.to_string(),
        ))
    }

    /// Training series for `metric` (e.g. `loss`, or `acc` / `accuracy`).
    pub fn training(&self, metric: Metric) -> Result<&[f64], HistoryError> {
        self.resolve(metric, false)
    }

    /// Validation series for `metric` (e.g. `val_loss`, or `val_acc` / `val_accuracy`).
    pub fn validation(&self, metric: Metric) -> Result<&[f64], HistoryError> {
        self.resolve(metric, true)
    }

    pub fn epochs(&self, metric: Metric) -> Result<usize, HistoryError> {
        self.training(metric).map(<[f64]>::len)
    }

    /// Epoch with the lowest/highest value of `name`. Ties go to the earliest
    /// epoch; NaN and infinite values are ignored.
    pub fn best_epoch(&self, name: &str, objective: Objective) -> Option<BestEpoch> {
        let values = self.metrics.get(name)?;
        best_of(values, objective)
    }

    /// Best validation loss and accuracy, where recorded.
    pub fn summary(&self) -> HistorySummary {
        let best = |metric: Metric, objective: Objective| {
            self.resolve(metric, true)
                .ok()
                .and_then(|values| best_of(values, objective))
        };
        HistorySummary {
            min_val_loss: best(Metric::Loss, Objective::Min),
            max_val_acc: best(Metric::Accuracy, Objective::Max),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, HistoryError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a CSV with a header row of metric names and one row per epoch.
    /// An `epoch` column is dropped.
    pub fn from_csv_str(text: &str) -> Result<Self, HistoryError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header_line) = lines.next().ok_or_else(|| HistoryError::Csv {
            line: 1,
            message: "missing header row".to_string(),
        })?;
        let headers: Vec<&str> = header_line.split(',').map(str::trim).collect();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];

        for (i, line) in lines {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if cells.len() != headers.len() {
                return Err(HistoryError::Csv {
                    line: i + 1,
                    message: format!("expected {} columns, found {}", headers.len(), cells.len()),
                });
            }
            for (column, cell) in columns.iter_mut().zip(&cells) {
                let value = cell.parse::<f64>().map_err(|_| HistoryError::Csv {
                    line: i + 1,
                    message: format!("'{}' is not a number", cell),
                })?;
                column.push(value);
            }
        }

        let mut history = Self::new();
        for (name, values) in headers.into_iter().zip(columns) {
            if !name.eq_ignore_ascii_case("epoch") {
                history.insert(name, values);
            }
        }
        Ok(history)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, HistoryError> {
        Self::from_json_str(&read_text(path)?)
    }

    pub fn from_csv_file(path: &Path) -> Result<Self, HistoryError> {
        Self::from_csv_str(&read_text(path)?)
    }

    /// Load a `.csv` or JSON history file.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);

        if is_csv {
            Self::from_csv_file(path)
        } else {
            Self::from_json_file(path)
        }
    }
}

fn read_text(path: &Path) -> Result<String, HistoryError> {
    fs::read_to_string(path).map_err(|source| HistoryError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn best_of(values: &[f64], objective: Objective) -> Option<BestEpoch> {
    let mut best: Option<BestEpoch> = None;
    for (i, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        let better = match (best, objective) {
            (None, _) => true,
            (Some(b), Objective::Min) => value < b.value,
            (Some(b), Objective::Max) => value > b.value,
        };
        if better {
            best = Some(BestEpoch {
                epoch: i + 1,
                value,
            });
        }
    }
    best
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistorySummary {
    pub min_val_loss: Option<BestEpoch>,
    pub max_val_acc: Option<BestEpoch>,
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.min_val_loss {
            Some(b) => writeln!(f, "Min Validation Loss of {:.2} at Epoch {}", b.value, b.epoch)?,
            None => writeln!(f, "No validation loss recorded")?,
        }
        match self.max_val_acc {
            Some(b) => write!(f, "Max Validation Accuracy of {:.2} at Epoch {}", b.value, b.epoch),
            None => write!(f, "No validation accuracy recorded"),
        }
    }
}
