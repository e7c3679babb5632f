//! Training/validation curves drawn with plotters.
//!
//! The `plot_*` functions draw onto any drawing area the caller owns;
//! [`render_chart`] creates a PNG or SVG surface of a given size first.

use crate::training::history::{HistoryError, HistorySummary, Metric, TrainingHistory};
use clap::ValueEnum;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;
use thiserror::Error;

pub const SINGLE_PANEL_SIZE: (u32, u32) = (640, 480);
pub const DOUBLE_PANEL_SIZE: (u32, u32) = (1280, 480);

const MARKER_SIZE: i32 = 5;

#[derive(Debug, Error)]
pub enum PlotError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("Nothing to plot: no finite {0} values")]
    Empty(String),

    #[error("Drawing failed: {0}")]
    Drawing(String),
}

fn drawing<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Drawing(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Chart {
    Loss,
    Accuracy,
    Both,
}

impl Chart {
    pub fn default_size(self) -> (u32, u32) {
        match self {
            Chart::Both => DOUBLE_PANEL_SIZE,
            _ => SINGLE_PANEL_SIZE,
        }
    }
}

struct Panel {
    metric: Metric,
    title: &'static str,
    training_label: &'static str,
    validation_label: &'static str,
}

const LOSS_PANEL: Panel = Panel {
    metric: Metric::Loss,
    title: "Training and Validation Loss",
    training_label: "Training Loss",
    validation_label: "Validation Loss",
};

const ACCURACY_PANEL: Panel = Panel {
    metric: Metric::Accuracy,
    title: "Training and Validation Accuracy",
    training_label: "Training Accuracy",
    validation_label: "Validation Accuracy",
};

/// `(epoch, value)` points for the finite values of a series. Epochs start at 1.
pub fn epoch_points(values: &[f64]) -> Vec<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i + 1, v))
        .collect()
}

/// Y axis range covering every finite value with 5% padding on each side.
/// A constant series gets ±0.5 around its value.
pub fn value_range(series: &[&[f64]]) -> Option<Range<f64>> {
    let (min, max) = series
        .iter()
        .flat_map(|values| values.iter().copied())
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;

    if max - min <= f64::EPSILON {
        return Some(min - 0.5..max + 0.5);
    }
    let pad = (max - min) * 0.05;
    Some(min - pad..max + pad)
}

fn draw_panel<DB: DrawingBackend>(
    history: &TrainingHistory,
    panel: &Panel,
    area: &DrawingArea<DB, Shift>,
) -> Result<(), PlotError> {
    let training = history.training(panel.metric)?;
    let validation = history.validation(panel.metric)?;

    let y_range = value_range(&[training, validation])
        .ok_or_else(|| PlotError::Empty(panel.metric.label().to_lowercase()))?;
    let epochs = training.len().max(validation.len());

    let mut chart = ChartBuilder::on(area)
        .caption(panel.title, ("sans-serif", 24).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0..epochs + 1, y_range)
        .map_err(drawing)?;

    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc(panel.metric.label())
        .x_labels(epochs.min(10) + 2)
        .y_label_formatter(&|y| format!("{:.2}", y))
        .draw()
        .map_err(drawing)?;

    let training_style = RED.stroke_width(2);
    chart
        .draw_series(
            epoch_points(training)
                .into_iter()
                .map(|point| Cross::new(point, MARKER_SIZE, training_style)),
        )
        .map_err(drawing)?
        .label(panel.training_label)
        .legend(move |(x, y)| Cross::new((x + 10, y), MARKER_SIZE, training_style));

    let validation_style = BLUE.filled();
    chart
        .draw_series(
            epoch_points(validation)
                .into_iter()
                .map(|point| Circle::new(point, MARKER_SIZE, validation_style)),
        )
        .map_err(drawing)?
        .label(panel.validation_label)
        .legend(move |(x, y)| Circle::new((x + 10, y), MARKER_SIZE, validation_style));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(drawing)?;

    Ok(())
}

/// Training loss (red crosses) against validation loss (blue circles).
pub fn plot_train_val_loss<DB: DrawingBackend>(
    history: &TrainingHistory,
    area: &DrawingArea<DB, Shift>,
) -> Result<(), PlotError> {
    draw_panel(history, &LOSS_PANEL, area)
}

/// Training accuracy (red crosses) against validation accuracy (blue circles).
pub fn plot_train_val_accuracy<DB: DrawingBackend>(
    history: &TrainingHistory,
    area: &DrawingArea<DB, Shift>,
) -> Result<(), PlotError> {
    draw_panel(history, &ACCURACY_PANEL, area)
}

/// Loss on the left, accuracy on the right. Returns (and logs) the best
/// validation epochs.
pub fn plot_loss_and_accuracy<DB: DrawingBackend>(
    history: &TrainingHistory,
    area: &DrawingArea<DB, Shift>,
) -> Result<HistorySummary, PlotError> {
    let panels = area.split_evenly((1, 2));
    plot_train_val_loss(history, &panels[0])?;
    plot_train_val_accuracy(history, &panels[1])?;

    let summary = history.summary();
    for line in summary.to_string().lines() {
        log::info!("{}", line);
    }
    Ok(summary)
}

fn draw_chart<DB: DrawingBackend>(
    history: &TrainingHistory,
    chart: Chart,
    root: &DrawingArea<DB, Shift>,
) -> Result<(), PlotError> {
    root.fill(&WHITE).map_err(drawing)?;
    match chart {
        Chart::Loss => plot_train_val_loss(history, root),
        Chart::Accuracy => plot_train_val_accuracy(history, root),
        Chart::Both => plot_loss_and_accuracy(history, root).map(|_| ()),
    }?;
    root.present().map_err(drawing)
}

/// Draw `chart` into a new image at `path`: SVG for `.svg`, PNG otherwise.
pub fn render_chart(
    history: &TrainingHistory,
    chart: Chart,
    path: &Path,
    size: Option<(u32, u32)>,
) -> Result<(), PlotError> {
    let size = size.unwrap_or_else(|| chart.default_size());
    let is_svg = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("svg"))
        .unwrap_or(false);

    log::debug!("Rendering {:?} chart ({}x{}) to {}", chart, size.0, size.1, path.display());
    if is_svg {
        let root = SVGBackend::new(path, size).into_drawing_area();
        draw_chart(history, chart, &root)
    } else {
        let root = BitMapBackend::new(path, size).into_drawing_area();
        draw_chart(history, chart, &root)
    }
}
