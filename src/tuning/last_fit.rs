//! Final fit on the training split and single evaluation on the test split

use crate::data::InitialSplit;
use crate::error::Result;
use crate::metrics::{roc_curve, ConfusionMatrix, MetricEstimate, MetricSet, RocCurve};
use crate::workflow::{FittedWorkflow, Predictions, Workflow, DEFAULT_THRESHOLD};
use tracing::info;

/// Result of [`last_fit`]
#[derive(Debug, Clone)]
pub struct LastFit {
    fitted: FittedWorkflow,
    metrics: Vec<MetricEstimate>,
    predictions: Predictions,
    truth: Vec<usize>,
    confusion: ConfusionMatrix,
    test_rows: Vec<usize>,
    threshold: f64,
}

impl LastFit {
    /// Workflow fitted on the full training split
    pub fn fitted(&self) -> &FittedWorkflow {
        &self.fitted
    }

    pub fn into_fitted(self) -> FittedWorkflow {
        self.fitted
    }

    /// Test-set metrics
    pub fn metrics(&self) -> &[MetricEstimate] {
        &self.metrics
    }

    /// Test-set predictions in test-row order
    pub fn predictions(&self) -> &Predictions {
        &self.predictions
    }

    /// Test-set outcome as level indices
    pub fn truth(&self) -> &[usize] {
        &self.truth
    }

    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    /// Row indices of the test set in the split's source data
    pub fn test_rows(&self) -> &[usize] {
        &self.test_rows
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// ROC curve of the event level on the test set
    pub fn roc_curve(&self) -> Option<RocCurve> {
        roc_curve(&self.truth, &self.predictions)
    }
}

/// Fit `workflow` on the training split, then score the test split once at
/// the default threshold. A second call on the same split fails with
/// `TestSetReused`.
pub fn last_fit(workflow: &Workflow, split: &InitialSplit, metrics: &MetricSet) -> Result<LastFit> {
    last_fit_with(workflow, split, metrics, DEFAULT_THRESHOLD)
}

/// [`last_fit`] with an explicit event threshold
pub fn last_fit_with(workflow: &Workflow, split: &InitialSplit, metrics: &MetricSet, threshold: f64) -> Result<LastFit> {
    let training = split.training()?;
    let fitted = workflow.fit(&training)?;

    let test = split.consume_test()?;
    let predictions = fitted.predict(&test)?;
    let truth = fitted.truth(&test)?;
    let estimates = metrics.evaluate(&truth, &predictions, threshold)?;
    let confusion = ConfusionMatrix::new(&truth, &predictions.classes(threshold), predictions.levels())?;

    info!(
        train = training.n_rows(),
        test = test.n_rows(),
        workflow = %workflow,
        "last fit evaluated"
    );

    Ok(LastFit {
        fitted,
        metrics: estimates,
        predictions,
        truth,
        confusion,
        test_rows: split.test_indices().to_vec(),
        threshold,
    })
}
