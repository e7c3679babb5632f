//! Photo library housekeeping (rename by capture date, remove duplicate
//! files) and training-history charts.

pub mod config;
pub mod photos;
pub mod training;

pub use config::Config;
