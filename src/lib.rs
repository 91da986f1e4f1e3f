//! modelflow - train/tune/evaluate workflows for tabular classification
//!
//! This crate provides:
//! - Seeded, optionally stratified train/test splits
//! - Declarative preprocessing recipes that learn on training data only
//! - Model specifications with tunable hyperparameters
//! - Workflows pairing a recipe with a model
//! - V-fold cross-validation and grid tuning
//! - Classification metrics and model-set comparison
//!
//! # Modules
//!
//! ## Data
//! - [`data`] - Dataset container, CSV loading, initial splits
//! - [`resampling`] - V-fold cross-validation
//!
//! ## Modeling
//! - [`preprocessing`] - Recipes and their steps
//! - [`models`] - Model specs, parameters, fitted models
//! - [`workflow`] - Preprocessor + model, fit/predict/augment
//!
//! ## Evaluation
//! - [`metrics`] - Confusion matrix, class and probability metrics
//! - [`tuning`] - Grids, tuning, final fit on the test set
//! - [`workflow_set`] - Many workflows over the same resamples
//!
//! ## Services
//! - [`config`] - JSON pipeline configuration
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data
pub mod data;
pub mod resampling;

// Modeling
pub mod preprocessing;
pub mod models;
pub mod workflow;

// Evaluation
pub mod metrics;
pub mod tuning;
pub mod workflow_set;

// Services
pub mod config;
pub mod cli;

pub use error::{FlowError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{FlowError, Result};

    // Data
    pub use crate::data::{initial_split, read_csv, DataSource, Dataset, InitialSplit, LoadOptions};
    pub use crate::resampling::{vfold_cv, Resample, Resamples};

    // Preprocessing
    pub use crate::preprocessing::{ImputeMethod, PreparedRecipe, Recipe, Selector, Step};

    // Models
    pub use crate::models::{ModelSpec, ParamSet, ParamValue, Tunable};

    // Workflows
    pub use crate::workflow::{FittedWorkflow, Predictions, Preprocessor, Workflow};

    // Metrics
    pub use crate::metrics::{ConfusionMatrix, Metric, MetricSet, RocCurve};

    // Tuning
    pub use crate::tuning::{
        fit_resamples, last_fit, tune_grid, Control, Grid, GridSpec, LastFit, ParamRange, TuningResult,
    };

    // Model sets
    pub use crate::workflow_set::{RankedResult, WorkflowSet};

    // Configuration
    pub use crate::config::PipelineConfig;
}
