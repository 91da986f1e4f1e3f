//! V-fold cross-validation resamples
//!
//! Resamples are built from the training split only. Each [`Resample`]
//! holds row indices into the dataset carried by its [`Resamples`].

use crate::data::split::strata_groups;
use crate::data::Dataset;
use crate::error::{FlowError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One analysis/assessment partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resample {
    pub id: String,
    /// Zero-based repeat index
    pub repeat: usize,
    /// Zero-based fold index within the repeat
    pub fold: usize,
    train: Vec<usize>,
    assessment: Vec<usize>,
}

impl Resample {
    /// Sorted analysis (fitting) rows
    pub fn train_indices(&self) -> &[usize] {
        &self.train
    }

    /// Sorted held-out rows
    pub fn assessment_indices(&self) -> &[usize] {
        &self.assessment
    }

    pub fn analysis(&self, data: &Dataset) -> Result<Dataset> {
        data.take(&self.train)
    }

    pub fn assessment(&self, data: &Dataset) -> Result<Dataset> {
        data.take(&self.assessment)
    }
}

/// A set of resamples over one dataset
#[derive(Debug, Clone)]
pub struct Resamples {
    data: Dataset,
    splits: Vec<Resample>,
    v: usize,
    repeats: usize,
    strata: Option<String>,
    seed: u64,
}

impl Resamples {
    /// Dataset the indices refer to
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn splits(&self) -> &[Resample] {
        &self.splits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resample> {
        self.splits.iter()
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    pub fn v(&self) -> usize {
        self.v
    }

    pub fn repeats(&self) -> usize {
        self.repeats
    }

    pub fn strata(&self) -> Option<&str> {
        self.strata.as_deref()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl<'a> IntoIterator for &'a Resamples {
    type Item = &'a Resample;
    type IntoIter = std::slice::Iter<'a, Resample>;

    fn into_iter(self) -> Self::IntoIter {
        self.splits.iter()
    }
}

/// V-fold cross-validation, optionally repeated and stratified.
///
/// Repeat `r` shuffles with seed `seed + r`. Within a repeat every row is in
/// exactly one assessment set. With `strata`, each class is shuffled and
/// dealt round-robin across folds, the fold cursor carrying over from one
/// class to the next.
pub fn vfold_cv(data: &Dataset, v: usize, repeats: usize, strata: Option<&str>, seed: u64) -> Result<Resamples> {
    let n = data.n_rows();
    if v < 2 {
        return Err(FlowError::invalid("v", v, "must be at least 2"));
    }
    if n < v {
        return Err(FlowError::invalid(
            "v",
            v,
            &format!("cannot exceed the number of rows ({})", n),
        ));
    }
    if repeats == 0 {
        return Err(FlowError::invalid("repeats", repeats, "must be at least 1"));
    }

    let groups = match strata {
        None => None,
        Some(column) => {
            let groups = strata_groups(data, column)?;
            for (class, rows) in &groups {
                if rows.len() < 2 {
                    return Err(FlowError::Stratification(format!(
                        "class '{}' of '{}' has {} record(s), at least 2 are needed",
                        class,
                        column,
                        rows.len()
                    )));
                }
                if rows.len() < v {
                    warn!(
                        class = %class,
                        rows = rows.len(),
                        v,
                        "stratum is smaller than the number of folds; some folds will not contain it"
                    );
                }
            }
            Some(groups)
        }
    };

    let mut splits = Vec::with_capacity(v * repeats);
    for r in 0..repeats {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(r as u64));
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); v];

        match &groups {
            None => {
                let mut indices: Vec<usize> = (0..n).collect();
                indices.shuffle(&mut rng);
                let (base, remainder) = (n / v, n % v);
                let mut current = 0;
                for (k, fold) in folds.iter_mut().enumerate() {
                    let size = if k < remainder { base + 1 } else { base };
                    fold.extend_from_slice(&indices[current..current + size]);
                    current += size;
                }
            }
            Some(groups) => {
                let mut cursor = 0;
                for rows in groups.values() {
                    let mut rows = rows.clone();
                    rows.shuffle(&mut rng);
                    for row in rows {
                        folds[cursor % v].push(row);
                        cursor += 1;
                    }
                }
            }
        }

        for (k, mut assessment) in folds.into_iter().enumerate() {
            assessment.sort_unstable();
            let mut held_out = vec![false; n];
            for &i in &assessment {
                held_out[i] = true;
            }
            let train = (0..n).filter(|&i| !held_out[i]).collect();
            let id = if repeats > 1 {
                format!("Repeat{}/Fold{:02}", r + 1, k + 1)
            } else {
                format!("Fold{:02}", k + 1)
            };
            splits.push(Resample {
                id,
                repeat: r,
                fold: k,
                train,
                assessment,
            });
        }
    }

    info!(
        rows = n,
        v,
        repeats,
        strata = strata.unwrap_or("none"),
        seed,
        "v-fold resamples created"
    );

    Ok(Resamples {
        data: data.clone(),
        splits,
        v,
        repeats,
        strata: strata.map(str::to_string),
        seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn labelled(n_pos: usize, n_neg: usize) -> Dataset {
        let n = n_pos + n_neg;
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y: Vec<&str> = (0..n).map(|i| if i < n_pos { "1" } else { "0" }).collect();
        Dataset::new(df! { "x" => &x, "severe" => &y }.unwrap()).unwrap()
    }

    #[test]
    fn test_each_row_assessed_once_per_repeat() {
        let data = labelled(13, 40);
        for strata in [None, Some("severe")] {
            let folds = vfold_cv(&data, 5, 3, strata, 11).unwrap();
            assert_eq!(folds.len(), 15);
            for r in 0..3 {
                let mut counts = vec![0; 53];
                for split in folds.iter().filter(|s| s.repeat == r) {
                    for &i in split.assessment_indices() {
                        counts[i] += 1;
                    }
                    assert_eq!(split.train_indices().len() + split.assessment_indices().len(), 53);
                    assert!(split
                        .train_indices()
                        .iter()
                        .all(|i| split.assessment_indices().binary_search(i).is_err()));
                }
                assert!(counts.iter().all(|&c| c == 1));
            }
        }
    }

    #[test]
    fn test_fold_sizes_balanced() {
        let folds = vfold_cv(&labelled(10, 13), 5, 1, None, 3).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|s| s.assessment_indices().len()).collect();
        assert_eq!(sizes, vec![5, 5, 5, 4, 4]);

        let folds = vfold_cv(&labelled(7, 16), 5, 1, Some("severe"), 3).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|s| s.assessment_indices().len()).collect();
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn test_stratified_class_shares() {
        let data = labelled(20, 80);
        let folds = vfold_cv(&data, 10, 1, Some("severe"), 42).unwrap();
        for split in &folds {
            let positives = split.assessment_indices().iter().filter(|&&i| i < 20).count();
            assert_eq!(positives, 2, "{}", split.id);
        }
    }

    #[test]
    fn test_ids_and_determinism() {
        let data = labelled(10, 10);
        let single = vfold_cv(&data, 4, 1, None, 5).unwrap();
        assert_eq!(single.splits()[0].id, "Fold01");
        let repeated = vfold_cv(&data, 4, 2, None, 5).unwrap();
        assert_eq!(repeated.splits()[5].id, "Repeat2/Fold02");

        let again = vfold_cv(&data, 4, 2, None, 5).unwrap();
        assert_eq!(repeated.splits(), again.splits());
        // repeat 1 reuses the single-run shuffle
        assert_eq!(repeated.splits()[0].assessment_indices(), single.splits()[0].assessment_indices());
        assert_ne!(repeated.splits()[0].assessment_indices(), repeated.splits()[4].assessment_indices());
    }

    #[test]
    fn test_invalid_arguments() {
        let data = labelled(3, 3);
        assert!(vfold_cv(&data, 1, 1, None, 0).is_err());
        assert!(vfold_cv(&data, 7, 1, None, 0).is_err());
        assert!(vfold_cv(&data, 2, 0, None, 0).is_err());
        assert!(matches!(
            vfold_cv(&labelled(1, 9), 3, 1, Some("severe"), 0),
            Err(FlowError::Stratification(_))
        ));
    }

    #[test]
    fn test_analysis_and_assessment_frames() {
        let data = labelled(5, 5);
        let folds = vfold_cv(&data, 5, 1, None, 9).unwrap();
        let split = &folds.splits()[0];
        assert_eq!(split.analysis(folds.data()).unwrap().n_rows(), 8);
        assert_eq!(split.assessment(folds.data()).unwrap().n_rows(), 2);
    }
}
