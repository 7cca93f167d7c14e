//! Packed feature rows with per-candidate aggregation
//!
//! Every candidate contributes a variable number of rows. The booster scores
//! rows independently; a candidate's score is the sum over its rows. All
//! objectives and metrics here work on those sums.

use crate::booster::Objective;
use crate::error::{Error, Result};
use crate::models::FeatureMatrix;
use ndarray::{Array2, ArrayView2};

/// Stacked rows of several feature matrices
#[derive(Debug, Clone)]
pub struct PackSum {
    rows: Array2<f32>,
    /// `offsets[i]..offsets[i + 1]` are the rows of matrix `i`
    offsets: Vec<usize>,
    /// Owning matrix of each row
    ids: Vec<usize>,
    /// Per-matrix targets, when packed for training
    ys: Option<Vec<f64>>,
}

impl PackSum {
    /// Stack `xs` into one arena; `ys` must align with `xs` when given
    pub fn new(xs: &[FeatureMatrix], ys: Option<&[f64]>) -> Result<Self> {
        if let Some(ys) = ys {
            if ys.len() != xs.len() {
                return Err(Error::LengthMismatch {
                    what: "pack targets",
                    expected: xs.len(),
                    actual: ys.len(),
                });
            }
        }
        let width = xs.first().map_or(0, |x| x.ncols());
        if let Some(bad) = xs.iter().find(|x| x.ncols() != width) {
            return Err(Error::ShapeMismatch(format!(
                "feature width {} differs from {}",
                bad.ncols(),
                width
            )));
        }

        let total: usize = xs.iter().map(|x| x.nrows()).sum();
        let mut data = Vec::with_capacity(total * width);
        let mut offsets = Vec::with_capacity(xs.len() + 1);
        let mut ids = Vec::with_capacity(total);
        offsets.push(0);
        for (id, x) in xs.iter().enumerate() {
            data.extend(x.iter().copied());
            ids.extend(std::iter::repeat(id).take(x.nrows()));
            offsets.push(ids.len());
        }
        let rows = Array2::from_shape_vec((total, width), data)
            .map_err(|e| Error::ShapeMismatch(e.to_string()))?;

        Ok(Self {
            rows,
            offsets,
            ids,
            ys: ys.map(<[f64]>::to_vec),
        })
    }

    /// Number of packed matrices
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn rows(&self) -> ArrayView2<'_, f32> {
        self.rows.view()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// Sum row scores per matrix; empty matrices score 0
    pub fn predict_with_score(&self, row_preds: &[f32]) -> Result<Vec<f64>> {
        self.check_preds(row_preds)?;
        let mut sums = vec![0.0f64; self.len()];
        for (id, pred) in self.ids.iter().zip(row_preds) {
            sums[*id] += *pred as f64;
        }
        Ok(sums)
    }

    /// Squared error on the pack sums, weighted by the target
    ///
    /// Row gradient `(sum[id] - y) * y`, hessian `y`.
    pub fn obj_square_error(&self, row_preds: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        let ys = self.require_targets()?;
        let sums = self.predict_with_score(row_preds)?;
        let grad = self
            .ids
            .iter()
            .map(|&id| ((sums[id] - ys[id]) * ys[id]) as f32)
            .collect();
        let hess = self.ids.iter().map(|&id| ys[id] as f32).collect();
        Ok((grad, hess))
    }

    /// `p-rmse`: RMSE of each row's pack sum against its matrix target
    pub fn rmse(&self, row_preds: &[f32]) -> Result<f64> {
        let ys = self.require_targets()?;
        let sums = self.predict_with_score(row_preds)?;
        if self.ids.is_empty() {
            return Ok(0.0);
        }
        let sq: f64 = self.ids.iter().map(|&id| (sums[id] - ys[id]).powi(2)).sum();
        Ok((sq / self.ids.len() as f64).sqrt())
    }

    /// `a-peak@n`: how close the top-`n` predicted candidates get to the best
    ///
    /// Running maximum of the true targets in predicted order, normalized by
    /// the best target in the pack and averaged. 1.0 when the predicted top
    /// candidate is the true best.
    pub fn average_peak_score(&self, row_preds: &[f32], n: usize) -> Result<f64> {
        let ys = self.require_targets()?;
        let sums = self.predict_with_score(row_preds)?;
        let best = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if n == 0 || ys.is_empty() || best <= 0.0 {
            return Ok(0.0);
        }

        let mut order: Vec<usize> = (0..sums.len()).collect();
        order.sort_by(|a, b| sums[*b].total_cmp(&sums[*a]));

        let mut peak = f64::NEG_INFINITY;
        let curve: Vec<f64> = order
            .iter()
            .take(n)
            .map(|&i| {
                peak = peak.max(ys[i]);
                peak / best
            })
            .collect();
        Ok(curve.iter().sum::<f64>() / curve.len() as f64)
    }

    fn check_preds(&self, row_preds: &[f32]) -> Result<()> {
        if row_preds.len() != self.num_rows() {
            return Err(Error::LengthMismatch {
                what: "row predictions",
                expected: self.num_rows(),
                actual: row_preds.len(),
            });
        }
        Ok(())
    }

    fn require_targets(&self) -> Result<&[f64]> {
        self.ys
            .as_deref()
            .ok_or_else(|| Error::Training("pack was built without targets".to_string()))
    }
}

impl Objective for PackSum {
    fn gradients(&self, preds: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        self.obj_square_error(preds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn matrix(rows: usize, width: usize) -> FeatureMatrix {
        Array2::from_shape_fn((rows, width), |(r, c)| (r * width + c) as f32)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_layout() {
        let pack = PackSum::new(&[matrix(2, 3), matrix(0, 3), matrix(1, 3)], None).unwrap();
        assert_eq!(pack.len(), 3);
        assert_eq!(pack.num_rows(), 3);
        assert_eq!(pack.offsets(), &[0, 2, 2, 3]);
        assert_eq!(pack.ids(), &[0, 0, 2]);
        assert_eq!(pack.rows()[[1, 2]], 5.0);
        assert_eq!(pack.rows()[[2, 0]], 0.0);
    }

    #[test]
    fn test_rejects_mixed_width() {
        let err = PackSum::new(&[matrix(1, 3), matrix(1, 4)], None);
        assert!(matches!(err, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_rejects_misaligned_targets() {
        let err = PackSum::new(&[matrix(1, 3)], Some(&[1.0, 0.5]));
        assert!(matches!(err, Err(Error::LengthMismatch { .. })));
    }

    #[test]
    fn test_predict_with_score_sums_rows() {
        let pack = PackSum::new(&[matrix(2, 2), matrix(0, 2), matrix(1, 2)], None).unwrap();
        let sums = pack.predict_with_score(&[0.5, 0.25, 2.0]).unwrap();
        assert_eq!(sums, vec![0.75, 0.0, 2.0]);
        assert!(pack.predict_with_score(&[1.0]).is_err());
    }

    #[test]
    fn test_obj_square_error() {
        let pack = PackSum::new(&[matrix(2, 2), matrix(1, 2)], Some(&[1.0, 0.5])).unwrap();
        let (grad, hess) = pack.obj_square_error(&[0.2, 0.3, 0.4]).unwrap();
        let expected = [-0.5f32, -0.5, -0.05];
        for (g, e) in grad.iter().zip(expected) {
            assert!((g - e).abs() < 1e-6);
        }
        assert_eq!(hess, vec![1.0, 1.0, 0.5]);
    }

    #[test]
    fn test_rmse() {
        let pack = PackSum::new(&[matrix(2, 2), matrix(1, 2)], Some(&[1.0, 0.5])).unwrap();
        let rmse = pack.rmse(&[0.2, 0.3, 0.4]).unwrap();
        assert!((rmse - (0.51f64 / 3.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_average_peak_score() {
        let xs = [matrix(1, 2), matrix(1, 2), matrix(1, 2)];
        let pack = PackSum::new(&xs, Some(&[0.25, 1.0, 0.5])).unwrap();

        // Predicted order: 2, 1, 0
        let preds = [0.1, 0.5, 0.9];
        assert!(close(pack.average_peak_score(&preds, 2).unwrap(), 0.75));
        assert!(close(pack.average_peak_score(&preds, 3).unwrap(), (0.5 + 1.0 + 1.0) / 3.0));

        // True best ranked first
        let preds = [0.1, 0.9, 0.5];
        assert!(close(pack.average_peak_score(&preds, 1).unwrap(), 1.0));
        assert!(close(pack.average_peak_score(&preds, 32).unwrap(), 1.0));
    }

    #[test]
    fn test_metrics_need_targets() {
        let pack = PackSum::new(&[matrix(1, 2)], None).unwrap();
        assert!(pack.rmse(&[0.0]).is_err());
        assert!(pack.obj_square_error(&[0.0]).is_err());
    }

    proptest! {
        #[test]
        fn prop_offsets_cover_all_rows(row_counts in prop::collection::vec(0usize..6, 0..20)) {
            let xs: Vec<FeatureMatrix> = row_counts.iter().map(|&r| matrix(r, 3)).collect();
            let pack = PackSum::new(&xs, None).unwrap();
            prop_assert_eq!(pack.len(), xs.len());
            prop_assert_eq!(pack.num_rows(), row_counts.iter().sum::<usize>());
            prop_assert!(pack.offsets().windows(2).all(|w| w[0] <= w[1]));

            let sums = pack.predict_with_score(&vec![1.0; pack.num_rows()]).unwrap();
            let expected: Vec<f64> = row_counts.iter().map(|&r| r as f64).collect();
            prop_assert_eq!(sums, expected);
        }
    }
}
