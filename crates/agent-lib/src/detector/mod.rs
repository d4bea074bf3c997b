//! Contention detection stages
//!
//! Detectors consume usage snapshots and emit contention events downstream.
//! Each detector covers one resource dimension; this module currently ships
//! the cpu detector.

mod cpu_contention;

pub use cpu_contention::{CpuContentionDetector, CycleAssessment, DetectionError};
