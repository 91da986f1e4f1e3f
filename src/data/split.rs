//! Train/test splitting

use super::Dataset;
use crate::error::{FlowError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// A dataset partitioned into disjoint training and testing rows.
///
/// The testing rows may be scored only once: [`crate::tuning::last_fit`]
/// marks them as consumed and refuses a second evaluation.
#[derive(Debug)]
pub struct InitialSplit {
    data: Dataset,
    train: Vec<usize>,
    test: Vec<usize>,
    strata: Option<String>,
    seed: u64,
    test_consumed: AtomicBool,
}

impl InitialSplit {
    /// Source dataset the indices refer to
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Sorted training row indices
    pub fn train_indices(&self) -> &[usize] {
        &self.train
    }

    /// Sorted testing row indices
    pub fn test_indices(&self) -> &[usize] {
        &self.test
    }

    pub fn strata(&self) -> Option<&str> {
        self.strata.as_deref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Training rows in source order
    pub fn training(&self) -> Result<Dataset> {
        self.data.take(&self.train)
    }

    /// Testing rows in source order. Reading them does not count as an
    /// evaluation; only `last_fit` consumes the test set.
    pub fn testing(&self) -> Result<Dataset> {
        self.data.take(&self.test)
    }

    /// Whether `last_fit` already scored the test set
    pub fn is_test_consumed(&self) -> bool {
        self.test_consumed.load(Ordering::SeqCst)
    }

    /// Mark the test set as used. Fails if it was used before.
    pub(crate) fn consume_test(&self) -> Result<Dataset> {
        if self.test_consumed.swap(true, Ordering::SeqCst) {
            return Err(FlowError::TestSetReused);
        }
        info!(rows = self.test.len(), "test set consumed");
        self.testing()
    }
}

/// Split `data` into training and testing rows.
///
/// `prop` is the training share and must lie in (0, 1). With `strata` each
/// class of that column is sampled on its own so class shares carry over to
/// both sides; every class needs at least two rows.
pub fn initial_split(data: &Dataset, prop: f64, strata: Option<&str>, seed: u64) -> Result<InitialSplit> {
    if !(prop > 0.0 && prop < 1.0) {
        return Err(FlowError::invalid("prop", prop, "must be strictly between 0 and 1"));
    }
    let n = data.n_rows();
    if n < 2 {
        return Err(FlowError::Data(format!("cannot split a dataset with {} rows", n)));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let (mut train, mut test) = match strata {
        None => {
            let mut indices: Vec<usize> = (0..n).collect();
            indices.shuffle(&mut rng);
            let n_train = ((prop * n as f64).floor() as usize).clamp(1, n - 1);
            let test = indices.split_off(n_train);
            (indices, test)
        }
        Some(column) => {
            let mut train = Vec::with_capacity(n);
            let mut test = Vec::with_capacity(n);
            for (class, mut rows) in strata_groups(data, column)? {
                if rows.len() < 2 {
                    return Err(FlowError::Stratification(format!(
                        "class '{}' of '{}' has {} record(s), at least 2 are needed to split",
                        class,
                        column,
                        rows.len()
                    )));
                }
                rows.shuffle(&mut rng);
                let n_c = rows.len();
                let n_train = ((prop * n_c as f64).round() as usize).clamp(1, n_c - 1);
                debug!(class = %class, rows = n_c, train = n_train, "stratum split");
                test.extend_from_slice(&rows[n_train..]);
                train.extend_from_slice(&rows[..n_train]);
            }
            (train, test)
        }
    };

    train.sort_unstable();
    test.sort_unstable();

    info!(
        rows = n,
        train = train.len(),
        test = test.len(),
        strata = strata.unwrap_or("none"),
        seed,
        "initial split"
    );

    Ok(InitialSplit {
        data: data.clone(),
        train,
        test,
        strata: strata.map(str::to_string),
        seed,
        test_consumed: AtomicBool::new(false),
    })
}

/// Row indices grouped by the key of `column`, in sorted key order.
/// Null cells form their own `NA` group.
pub(crate) fn strata_groups(data: &Dataset, column: &str) -> Result<BTreeMap<String, Vec<usize>>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, key) in data.keys(column)?.into_iter().enumerate() {
        groups
            .entry(key.unwrap_or_else(|| "NA".to_string()))
            .or_default()
            .push(i);
    }
    Ok(groups)
}
