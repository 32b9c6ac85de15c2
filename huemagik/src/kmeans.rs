//! Provides the k-means implementation underneath palette extraction

use crate::{ColorCounts, PaletteParams};
use palette::Srgb;
use rand::{Rng, SeedableRng};

/// Squared euclidean distance between two colors in the unit RGB cube
fn squared_distance(x: Srgb<f32>, y: Srgb<f32>) -> f32 {
    let dr = x.red - y.red;
    let dg = x.green - y.green;
    let db = x.blue - y.blue;
    dr * dr + dg * dg + db * db
}

/// Bookkeeping for each k-means data point
struct PointData {
    /// Center assignment for this data point
    assignment: Vec<u16>,
    /// Weight of each data point used to randomly select starting centroids in k-means++
    weight: Vec<f32>,
}

impl PointData {
    /// Create a [`PointData`] with the given number of data points
    fn new(n: u32) -> Self {
        let n = n as usize;
        Self {
            assignment: vec![0; n],
            weight: vec![f32::INFINITY; n],
        }
    }

    /// Reset data for the next k-means trial
    fn reset(&mut self) {
        self.assignment.fill(0);
        self.weight.fill(f32::INFINITY);
    }
}

/// Data for each center/centroid
struct CenterData {
    /// The centroid point
    centroid: Vec<Srgb<f32>>,
    /// Vector sum for all data points in this center
    sum: Vec<Srgb<f64>>,
    /// Number of pixels in this center
    count: Vec<u32>,
}

impl CenterData {
    /// Create a [`CenterData`] with the given number of centers
    fn new(k: u16) -> Self {
        let k = usize::from(k);
        Self {
            centroid: Vec::new(),
            sum: vec![Srgb::new(0.0, 0.0, 0.0); k],
            count: vec![0; k],
        }
    }

    /// Reset data for the next k-means trial
    fn reset(&mut self) {
        self.centroid.clear();
        self.sum.fill(Srgb::new(0.0, 0.0, 0.0));
        self.count.fill(0);
    }
}

/// Holds all the state used by k-means
struct KmeansState {
    /// Data for each center
    centers: CenterData,
    /// Data for each point
    points: PointData,
}

impl KmeansState {
    /// Initialize a new [`KmeansState`] with `k` centers and `n` data points
    fn new(k: u16, n: u32) -> Self {
        Self {
            centers: CenterData::new(k),
            points: PointData::new(n),
        }
    }
}

/// Result from running k-means
#[derive(Debug, Clone)]
pub(crate) struct KmeansResult {
    /// Variance achieved by these centroids
    pub(crate) variance: f64,
    /// Final centroid colors, exactly `k` of them
    pub(crate) centroids: Vec<Srgb<f32>>,
    /// Number of pixels in each centroid
    pub(crate) counts: Vec<u32>,
    /// Number of elapsed iterations
    pub(crate) iterations: u32,
}

/// Choose the starting centroids using the k-means++ algorithm
///
/// Always produces exactly `k` centroids: if there are fewer distinct colors
/// than `k`, the remaining centroids repeat existing colors.
fn kmeans_plus_plus(
    k: u16,
    rng: &mut impl Rng,
    colors: &[Srgb<f32>],
    centroids: &mut Vec<Srgb<f32>>,
    weights: &mut [f32],
) {
    use rand::{
        distributions::{WeightedError::*, WeightedIndex},
        prelude::Distribution,
    };

    // Pick any random first centroid
    centroids.push(colors[rng.gen_range(0..colors.len())]);

    // Pick each next centroid with a weighted probability based off the squared distance to its closest centroid
    for i in 1..usize::from(k) {
        let centroid = centroids[i - 1];
        for (weight, &color) in weights.iter_mut().zip(colors) {
            *weight = f32::min(*weight, squared_distance(color, centroid));
        }

        match WeightedIndex::new(&*weights) {
            Ok(sampler) => centroids.push(colors[sampler.sample(rng)]),
            Err(AllWeightsZero) => {
                // Every distinct color is already a centroid; repeat them
                for j in centroids.len()..usize::from(k) {
                    centroids.push(colors[j % colors.len()]);
                }
                return;
            }
            Err(InvalidWeight | NoItem | TooMany) => {
                unreachable!("distances are >= 0 and colors.len() is in 1..=2.pow(24)")
            }
        }
    }
}

/// Initializes the center sums and counts based off the initial centroids
fn compute_initial_sums(color_counts: &ColorCounts, centers: &mut CenterData, assignment: &[u16]) {
    for ((color, n), &center) in color_counts.pairs().zip(assignment) {
        let i = usize::from(center);
        let nf = f64::from(n);
        let sum = &mut centers.sum[i];
        sum.red += nf * f64::from(color.red);
        sum.green += nf * f64::from(color.green);
        sum.blue += nf * f64::from(color.blue);
        centers.count[i] += n;
    }
}

/// For each data point, update its assigned center
fn update_assignments(color_counts: &ColorCounts, centers: &mut CenterData, points: &mut PointData) {
    for ((color, n), center) in color_counts.pairs().zip(&mut points.assignment) {
        let ci = usize::from(*center);

        // Find the closest center
        let mut min_dist = squared_distance(color, centers.centroid[ci]);
        let mut min_center = *center;
        #[allow(clippy::cast_possible_truncation)]
        for (other_center, &centroid) in centers.centroid.iter().enumerate() {
            let other_dist = squared_distance(color, centroid);
            if other_dist < min_dist {
                min_dist = other_dist;
                min_center = other_center as u16;
            }
        }

        // Move this point to its new center
        if min_center != *center {
            let nf = f64::from(n);
            let r = nf * f64::from(color.red);
            let g = nf * f64::from(color.green);
            let b = nf * f64::from(color.blue);

            let old_sum = &mut centers.sum[ci];
            old_sum.red -= r;
            old_sum.green -= g;
            old_sum.blue -= b;
            centers.count[ci] -= n;

            let cj = usize::from(min_center);

            let new_sum = &mut centers.sum[cj];
            new_sum.red += r;
            new_sum.green += g;
            new_sum.blue += b;
            centers.count[cj] += n;

            *center = min_center;
        }
    }
}

/// For each center, update its centroid using the vector sums and compute deltas
///
/// Centers without any assigned points keep their current centroid,
/// so the number of centroids never shrinks below `k`.
fn update_centroids(centers: &mut CenterData) -> f32 {
    let mut total_delta = 0.0;
    for ((centroid, &n), sum) in centers.centroid.iter_mut().zip(&centers.count).zip(&centers.sum) {
        if n > 0 {
            let n = f64::from(n);
            // Sums may need greater precision, but the average can fall back down to a reduced precision
            #[allow(clippy::cast_possible_truncation)]
            let new_centroid = Srgb::new(
                (sum.red / n) as f32,
                (sum.green / n) as f32,
                (sum.blue / n) as f32,
            );

            total_delta += squared_distance(*centroid, new_centroid).sqrt();
            *centroid = new_centroid;
        }
    }

    total_delta
}

/// Run a trial of k-means
fn kmeans(
    color_counts: &ColorCounts,
    KmeansState { centers, points }: &mut KmeansState,
    params: &PaletteParams,
    seed: u64,
) -> KmeansResult {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    kmeans_plus_plus(
        params.colors,
        &mut rng,
        &color_counts.colors,
        &mut centers.centroid,
        &mut points.weight,
    );
    compute_initial_sums(color_counts, centers, &points.assignment);

    let mut iterations = 0;
    let mut total_delta = f32::INFINITY;
    while iterations < params.max_iter && total_delta > params.convergence {
        update_assignments(color_counts, centers, points);
        total_delta = update_centroids(centers);
        iterations += 1;
    }

    let variance = color_counts
        .pairs()
        .zip(&points.assignment)
        .map(|((color, n), &center)| {
            f64::from(n) * f64::from(squared_distance(color, centers.centroid[usize::from(center)]))
        })
        .sum();

    let centroids = centers.centroid.clone();
    let counts = centers.count.clone();

    centers.reset();
    points.reset();

    KmeansResult { variance, centroids, counts, iterations }
}

/// Run multiple trials of k-means, taking the trial with the lowest variance
///
/// The caller guarantees `params.colors` is at least `1` and at most the
/// number of pixel samples, so every trial yields exactly `params.colors`
/// centroids.
pub(crate) fn run(color_counts: &ColorCounts, params: &PaletteParams) -> KmeansResult {
    let mut state = KmeansState::new(params.colors, color_counts.num_colors());
    let seed = params.seed.unwrap_or_else(rand::random);

    (0..params.trials.max(1))
        .map(|i| kmeans(color_counts, &mut state, params, seed ^ u64::from(i)))
        .min_by(|x, y| f64::total_cmp(&x.variance, &y.variance))
        .unwrap_or_else(|| unreachable!("at least one trial is always run"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_colors() -> Vec<Srgb<f32>> {
        vec![
            Srgb::new(0.137, 0.003, 0.007),
            Srgb::new(0.311, 0.006, 0.457),
            Srgb::new(0.156, 0.632, 0.320),
            Srgb::new(0.243, 0.799, 0.270),
            Srgb::new(0.144, 0.259, 0.426),
            Srgb::new(0.076, 0.165, 0.362),
            Srgb::new(0.280, 0.264, 0.116),
            Srgb::new(0.244, 0.108, 0.367),
            Srgb::new(0.288, 0.818, 0.112),
            Srgb::new(0.290, 0.357, 0.116),
            Srgb::new(0.242, 0.624, 0.998),
            Srgb::new(0.285, 0.002, 0.292),
        ]
    }

    fn test_data() -> ColorCounts {
        ColorCounts {
            colors: test_colors(),
            counts: vec![12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1],
        }
    }

    fn test_params(colors: u16) -> PaletteParams {
        PaletteParams {
            colors,
            trials: 1,
            convergence: 0.001,
            max_iter: 64,
            seed: Some(0),
        }
    }

    fn initialize(k: u16) -> (ColorCounts, KmeansState) {
        let data = test_data();
        let mut state = KmeansState::new(k, data.num_colors());
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);

        kmeans_plus_plus(
            k,
            &mut rng,
            &data.colors,
            &mut state.centers.centroid,
            &mut state.points.weight,
        );

        compute_initial_sums(&data, &mut state.centers, &state.points.assignment);

        (data, state)
    }

    fn kmeans_plus_plus_num_centroids(k: u16, n: u32) {
        let mut state = KmeansState::new(k, n);

        kmeans_plus_plus(
            k,
            &mut rand_chacha::ChaCha8Rng::seed_from_u64(0),
            &test_colors()[..(n as usize)],
            &mut state.centers.centroid,
            &mut state.points.weight,
        );

        assert_eq!(state.centers.centroid.len(), usize::from(k));
    }

    #[test]
    fn kmeans_plus_plus_k_greater_than_n() {
        kmeans_plus_plus_num_centroids(6, 2);
    }

    #[test]
    fn kmeans_plus_plus_k_equals_n() {
        kmeans_plus_plus_num_centroids(4, 4);
    }

    #[test]
    fn kmeans_plus_plus_k_less_than_n() {
        kmeans_plus_plus_num_centroids(2, 6);
    }

    fn center_sum(sums: &[Srgb<f64>]) -> Srgb<f64> {
        let mut center_sum = Srgb::new(0.0, 0.0, 0.0);
        for sum in sums {
            center_sum.red += sum.red;
            center_sum.green += sum.green;
            center_sum.blue += sum.blue;
        }
        center_sum
    }

    #[test]
    fn compute_initial_sums_preserves_sum() {
        let (data, state) = initialize(4);

        let mut expected_sum = Srgb::new(0.0, 0.0, 0.0);
        let mut expected_count = 0;
        for (color, count) in data.pairs() {
            expected_count += count;
            let n = f64::from(count);
            expected_sum.red += n * f64::from(color.red);
            expected_sum.green += n * f64::from(color.green);
            expected_sum.blue += n * f64::from(color.blue);
        }

        assert_eq!(expected_count, state.centers.count.iter().sum());
        assert_relative_eq!(expected_sum, center_sum(&state.centers.sum));
    }

    #[test]
    fn update_assignments_preserves_sum() {
        let (data, mut state) = initialize(4);

        let expected_sum = center_sum(&state.centers.sum);
        let expected_count = state.centers.count.iter().sum::<u32>();

        update_assignments(&data, &mut state.centers, &mut state.points);

        assert_eq!(expected_count, state.centers.count.iter().sum());
        assert_relative_eq!(expected_sum, center_sum(&state.centers.sum));
    }

    #[test]
    fn update_assignments_sum_reflects_assignment() {
        let (data, mut state) = initialize(4);

        update_assignments(&data, &mut state.centers, &mut state.points);

        for ((color, count), &center) in data.pairs().zip(&state.points.assignment) {
            let center = usize::from(center);
            let n = f64::from(count);
            let sum = &mut state.centers.sum[center];
            sum.red -= n * f64::from(color.red);
            sum.green -= n * f64::from(color.green);
            sum.blue -= n * f64::from(color.blue);
            state.centers.count[center] -= count;
        }

        for &sum in &state.centers.sum {
            assert_relative_eq!(sum, Srgb::new(0.0, 0.0, 0.0));
        }

        for &count in &state.centers.count {
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn update_centroids_total_delta() {
        let (data, mut state) = initialize(4);

        let old_centroids = state.centers.centroid.clone();

        update_assignments(&data, &mut state.centers, &mut state.points);

        let total_delta = update_centroids(&mut state.centers);

        let expected = old_centroids
            .iter()
            .zip(&state.centers.centroid)
            .zip(&state.centers.count)
            .filter(|(_, &count)| count > 0)
            .map(|((&old, &new), _)| squared_distance(old, new).sqrt())
            .sum::<f32>();

        assert!((total_delta - expected).abs() <= 1e-8);
    }

    #[test]
    fn empty_centers_keep_their_centroid() {
        // A single distinct color with k = 3 leaves two centers empty
        let data = ColorCounts {
            colors: vec![Srgb::new(0.5, 0.25, 0.125)],
            counts: vec![100],
        };

        let result = run(&data, &test_params(3));

        assert_eq!(result.centroids.len(), 3);
        for centroid in result.centroids {
            assert_relative_eq!(centroid, Srgb::new(0.5, 0.25, 0.125));
        }
        assert_eq!(result.counts.iter().sum::<u32>(), 100);
    }

    #[test]
    fn run_returns_exactly_k_centroids() {
        let data = test_data();

        for k in [1, 2, 4, 8, 12] {
            let result = run(&data, &test_params(k));
            assert_eq!(result.centroids.len(), usize::from(k));
            assert_eq!(result.counts.len(), usize::from(k));
            assert_eq!(result.counts.iter().sum::<u32>(), data.counts.iter().sum::<u32>());
        }
    }

    #[test]
    fn same_seed_gives_same_result() {
        let data = test_data();
        let params = test_params(4);

        let first = run(&data, &params);
        let second = run(&data, &params);

        assert_eq!(first.centroids, second.centroids);
        assert_eq!(first.counts, second.counts);
        assert!((first.variance - second.variance).abs() <= f64::EPSILON);
    }

    #[test]
    fn centroids_stay_in_unit_cube() {
        let data = test_data();
        let result = run(&data, &test_params(5));

        for centroid in result.centroids {
            assert!((0.0..=1.0).contains(&centroid.red));
            assert!((0.0..=1.0).contains(&centroid.green));
            assert!((0.0..=1.0).contains(&centroid.blue));
        }
    }

    #[test]
    fn more_trials_never_increase_variance() {
        let data = test_data();

        let one = run(&data, &test_params(3));
        let many = run(
            &data,
            &PaletteParams {
                trials: 8,
                ..test_params(3)
            },
        );

        assert!(many.variance <= one.variance);
    }

    #[test]
    fn max_iter_caps_iterations() {
        let data = test_data();

        let params = PaletteParams {
            max_iter: 1,
            convergence: 0.0,
            ..test_params(4)
        };
        let result = run(&data, &params);

        assert_eq!(result.iterations, 1);
    }
}
