//! 🫐欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx2dF, Mask2d};
pub use crate::{AnalysisError, AnalysisResult};

pub use crate::{AcquisitionHints, FlowScan, FlowSource, FrameSeries, ScanTags};

pub use crate::config::{AnalysisConfig, ClusterSelection, Structure};
pub use crate::consts::{FlowDirection, MagnitudeClass};

pub use crate::mask::{load_region_mask, save_png};

pub use crate::params::{CohortStats, Vessel};
pub use crate::pipeline::{
    NoProgress, Pipeline, ProgressSink, ReviewDecision, ReviewRequest, ReviewSession, RunMode,
    ScanOutcome, ScanResult,
};
pub use crate::report::{write_scan, ScanSummary, VoxelRecord};

pub use crate::batch::{run_batch, BatchEntry, BatchResults, BatchStatus, MaskSource};

#[cfg(feature = "rayon")]
pub use crate::batch::par_run_batch;
