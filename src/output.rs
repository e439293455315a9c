//! Run summary types returned by [`crate::pipeline::Pipeline::run`].

use crate::pipeline::Stage;
use serde::Serialize;

/// Per-item counts for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Items in the checkpoint when the stage started.
    pub total: usize,
    pub processed: usize,
    /// Items left alone on purpose: not retrieved, prerequisite missing,
    /// or output already present.
    pub skipped: usize,
    pub failed: usize,
}

impl StageReport {
    pub fn new(stage: Stage, total: usize) -> Self {
        Self {
            stage,
            total,
            processed: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Reports of the stages that ran, in order.
    pub stages: Vec<StageReport>,
    /// `true` when the scan found nothing new and no stage after it ran.
    pub early_exit: bool,
}

impl RunSummary {
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|r| r.failed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serialises_with_stage_names() {
        let mut report = StageReport::new(Stage::UpdateDocument, 3);
        report.processed = 2;
        report.failed = 1;
        let summary = RunSummary {
            stages: vec![report],
            early_exit: false,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["stages"][0]["stage"], "update-document");
        assert_eq!(json["stages"][0]["failed"], 1);
        assert_eq!(json["early_exit"], false);
        assert_eq!(summary.total_failed(), 1);
        assert!(summary.report(Stage::Extract).is_none());
    }
}
