//! Regression trees grown on gradient statistics
//!
//! Split search works on quantized feature values. Each feature gets a sorted
//! list of cut points; a value falls in bin `b` when exactly `b` cut points
//! are `<=` it. Splitting at cut `j` sends bins `0..=j` (values `< cut[j]`)
//! and missing values left.

use super::BoosterParams;
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bin id reserved for NaN
const MISSING_BIN: u16 = u16::MAX;

/// Minimum loss reduction accepted as a real split
const RT_EPS: f64 = 1e-6;

/// Per-feature cut points derived from the training matrix
#[derive(Debug, Clone)]
pub(crate) struct FeatureCuts {
    cuts: Vec<Vec<f32>>,
}

impl FeatureCuts {
    /// Build at most `max_bin - 1` strictly increasing cuts per feature
    pub(crate) fn build(data: ArrayView2<f32>, max_bin: usize) -> Self {
        let max_cuts = max_bin.saturating_sub(1).max(1);
        let cuts = data
            .columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<f32> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup();
                if values.len() < 2 {
                    return Vec::new();
                }
                if values.len() - 1 <= max_cuts {
                    return values[1..].to_vec();
                }
                let mut picked: Vec<f32> = (1..=max_cuts)
                    .map(|i| values[i * values.len() / (max_cuts + 1)])
                    .collect();
                picked.dedup();
                picked
            })
            .collect();
        Self { cuts }
    }

    pub(crate) fn num_features(&self) -> usize {
        self.cuts.len()
    }

    fn bin(&self, feature: usize, value: f32) -> u16 {
        if value.is_nan() {
            return MISSING_BIN;
        }
        self.cuts[feature].partition_point(|cut| *cut <= value) as u16
    }

    /// Column-major bin matrix: `bins[f * rows + r]`
    pub(crate) fn quantize(&self, data: ArrayView2<f32>) -> BinnedMatrix {
        let rows = data.nrows();
        let mut bins = Vec::with_capacity(rows * self.num_features());
        for (feature, column) in data.columns().into_iter().enumerate() {
            bins.extend(column.iter().map(|v| self.bin(feature, *v)));
        }
        BinnedMatrix { rows, bins }
    }
}

pub(crate) struct BinnedMatrix {
    rows: usize,
    bins: Vec<u16>,
}

impl BinnedMatrix {
    fn column(&self, feature: usize) -> &[u16] {
        &self.bins[feature * self.rows..(feature + 1) * self.rows]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f32,
    },
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    loss_chg: f64,
    feature: usize,
    cut_index: usize,
    threshold: f32,
}

/// One tree of the ensemble; leaf values already include the learning rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Grow a tree and return it with the per-row output it assigns
    pub(crate) fn grow(
        binned: &BinnedMatrix,
        cuts: &FeatureCuts,
        grad: &[f32],
        hess: &[f32],
        params: &BoosterParams,
    ) -> (Self, Vec<f32>) {
        let mut grower = Grower {
            binned,
            cuts,
            grad,
            hess,
            params,
            nodes: Vec::new(),
            delta: vec![0.0; binned.rows],
        };
        let rows: Vec<u32> = (0..binned.rows as u32).collect();
        grower.grow_node(rows, 0);
        (Self { nodes: grower.nodes }, grower.delta)
    }

    /// Output for one raw feature row
    pub fn predict_row(&self, row: &[f32]) -> f32 {
        let mut idx = 0usize;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = row[feature as usize];
                    idx = if x.is_nan() || x < threshold {
                        left as usize
                    } else {
                        right as usize
                    };
                }
            }
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Largest feature index referenced by a split
    pub(crate) fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature as usize),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    /// Child links must point forward inside the node array
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, n)| match n {
                Node::Leaf { .. } => true,
                Node::Split { left, right, .. } => {
                    let (l, r) = (*left as usize, *right as usize);
                    l > i && r > i && l < self.nodes.len() && r < self.nodes.len()
                }
            })
    }
}

struct Grower<'a> {
    binned: &'a BinnedMatrix,
    cuts: &'a FeatureCuts,
    grad: &'a [f32],
    hess: &'a [f32],
    params: &'a BoosterParams,
    nodes: Vec<Node>,
    delta: Vec<f32>,
}

impl Grower<'_> {
    fn grow_node(&mut self, rows: Vec<u32>, depth: usize) -> u32 {
        let (g, h) = rows.iter().fold((0.0f64, 0.0f64), |(g, h), &r| {
            (g + self.grad[r as usize] as f64, h + self.hess[r as usize] as f64)
        });

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });

        let split = if depth < self.params.max_depth && rows.len() >= 2 {
            self.best_split(&rows, g, h)
        } else {
            None
        };

        match split {
            Some(split) => {
                let column = self.binned.column(split.feature);
                let (left_rows, right_rows): (Vec<u32>, Vec<u32>) =
                    rows.into_iter().partition(|&r| {
                        let bin = column[r as usize];
                        bin == MISSING_BIN || bin as usize <= split.cut_index
                    });
                let left = self.grow_node(left_rows, depth + 1);
                let right = self.grow_node(right_rows, depth + 1);
                self.nodes[idx] = Node::Split {
                    feature: split.feature as u32,
                    threshold: split.threshold,
                    left,
                    right,
                };
            }
            None => {
                let value = (-g / (h + self.params.lambda) * self.params.eta) as f32;
                for &r in &rows {
                    self.delta[r as usize] = value;
                }
                self.nodes[idx] = Node::Leaf { value };
            }
        }
        idx as u32
    }

    fn best_split(&self, rows: &[u32], g: f64, h: f64) -> Option<SplitCandidate> {
        let per_feature: Vec<Option<SplitCandidate>> = (0..self.cuts.num_features())
            .into_par_iter()
            .map(|feature| self.best_split_for_feature(rows, feature, g, h))
            .collect();

        // Sequential reduction keeps the choice independent of thread timing
        let mut best: Option<SplitCandidate> = None;
        for candidate in per_feature.into_iter().flatten() {
            if best.map_or(true, |b| candidate.loss_chg > b.loss_chg) {
                best = Some(candidate);
            }
        }
        best.filter(|b| b.loss_chg > self.params.gamma.max(RT_EPS))
    }

    fn best_split_for_feature(
        &self,
        rows: &[u32],
        feature: usize,
        g: f64,
        h: f64,
    ) -> Option<SplitCandidate> {
        let cuts = &self.cuts.cuts[feature];
        if cuts.is_empty() {
            return None;
        }
        let column = self.binned.column(feature);
        let lambda = self.params.lambda;

        // Bins 0..=cuts.len(); missing accumulates separately and always goes left
        let mut hist_g = vec![0.0f64; cuts.len() + 1];
        let mut hist_h = vec![0.0f64; cuts.len() + 1];
        let mut hist_n = vec![0usize; cuts.len() + 1];
        let (mut miss_g, mut miss_h, mut miss_n) = (0.0f64, 0.0f64, 0usize);
        for &r in rows {
            let r = r as usize;
            let bin = column[r];
            if bin == MISSING_BIN {
                miss_g += self.grad[r] as f64;
                miss_h += self.hess[r] as f64;
                miss_n += 1;
            } else {
                let b = bin as usize;
                hist_g[b] += self.grad[r] as f64;
                hist_h[b] += self.hess[r] as f64;
                hist_n[b] += 1;
            }
        }

        let parent_gain = g * g / (h + lambda);
        let (mut gl, mut hl, mut nl) = (miss_g, miss_h, miss_n);
        let mut best: Option<SplitCandidate> = None;
        for (j, threshold) in cuts.iter().enumerate() {
            gl += hist_g[j];
            hl += hist_h[j];
            nl += hist_n[j];
            let (gr, hr, nr) = (g - gl, h - hl, rows.len() - nl);
            if nl == 0 || nr == 0 {
                continue;
            }
            if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                continue;
            }
            let loss_chg = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_gain;
            if best.map_or(true, |b| loss_chg > b.loss_chg) {
                best = Some(SplitCandidate {
                    loss_chg,
                    feature,
                    cut_index: j,
                    threshold: *threshold,
                });
            }
        }
        best
    }
}
