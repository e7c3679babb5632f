pub mod encode;
pub mod history;
pub mod plot;

pub use encode::{WordIndex, multi_hot};
pub use history::{BestEpoch, HistorySummary, Metric, Objective, TrainingHistory};
pub use plot::{Chart, plot_loss_and_accuracy, plot_train_val_accuracy, plot_train_val_loss, render_chart};
