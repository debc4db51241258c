use nalgebra::{DMatrix, DVector};

/// Principal component projection fitted with an SVD of the centered data.
#[derive(Debug, Clone)]
pub struct Pca {
    mean: DVector<f32>,
    /// One component per row, strongest first
    components: DMatrix<f32>,
}

impl Pca {
    /// Fit `k` components on `data` (one sample per row). Components beyond
    /// the rank of the data are zero.
    pub fn fit(data: &DMatrix<f32>, k: usize) -> Self {
        let (n, d) = data.shape();
        let mut components = DMatrix::<f32>::zeros(k, d);
        if n == 0 {
            return Self {
                mean: DVector::zeros(d),
                components,
            };
        }

        let mean = DVector::from_fn(d, |j, _| data.column(j).mean());
        let centered = DMatrix::from_fn(n, d, |i, j| data[(i, j)] - mean[j]);

        let svd = centered.svd(false, true);
        if let Some(v_t) = svd.v_t {
            let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
            order.sort_by(|a, b| svd.singular_values[*b].total_cmp(&svd.singular_values[*a]));
            for (row, idx) in order.into_iter().take(k).enumerate() {
                components.set_row(row, &v_t.row(idx));
            }
        }

        Self { mean, components }
    }

    /// Project samples (rows) onto the fitted components.
    pub fn transform(&self, data: &DMatrix<f32>) -> DMatrix<f32> {
        let (n, d) = data.shape();
        let centered = DMatrix::from_fn(n, d, |i, j| data[(i, j)] - self.mean[j]);
        centered * self.components.transpose()
    }
}

/// K-means with k = 2, seeded deterministically by farthest points.
#[derive(Debug, Clone)]
pub struct TwoMeans {
    centroids: [DVector<f32>; 2],
}

impl TwoMeans {
    /// Returns `None` when there are no points.
    pub fn fit(points: &[DVector<f32>], max_iterations: usize) -> Option<Self> {
        let first = points.first()?;
        let dim = first.len();

        let mean = points
            .iter()
            .fold(DVector::zeros(dim), |acc, p| acc + p)
            / points.len() as f32;
        let seed_a = farthest_from(points, &mean);
        let seed_b = farthest_from(points, &points[seed_a]);

        let mut model = Self {
            centroids: [points[seed_a].clone(), points[seed_b].clone()],
        };
        if model.is_degenerate() {
            return Some(model);
        }

        let mut labels: Vec<usize> = points.iter().map(|p| model.predict(p)).collect();
        for _ in 0..max_iterations {
            for (cluster, centroid) in model.centroids.iter_mut().enumerate() {
                let members: Vec<&DVector<f32>> = points
                    .iter()
                    .zip(&labels)
                    .filter(|(_, l)| **l == cluster)
                    .map(|(p, _)| p)
                    .collect();
                // An emptied cluster keeps its previous centroid
                if !members.is_empty() {
                    *centroid = members
                        .iter()
                        .fold(DVector::zeros(dim), |acc, p| acc + *p)
                        / members.len() as f32;
                }
            }

            let next: Vec<usize> = points.iter().map(|p| model.predict(p)).collect();
            if next == labels {
                break;
            }
            labels = next;
        }

        Some(model)
    }

    /// Nearest centroid; ties go to cluster 0.
    pub fn predict(&self, point: &DVector<f32>) -> usize {
        let d0 = (point - &self.centroids[0]).norm_squared();
        let d1 = (point - &self.centroids[1]).norm_squared();
        if d1 < d0 {
            1
        } else {
            0
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.centroids[0] == self.centroids[1]
    }
}

fn farthest_from(points: &[DVector<f32>], target: &DVector<f32>) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MIN;
    for (i, p) in points.iter().enumerate() {
        let dist = (p - target).norm_squared();
        if dist > best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}
