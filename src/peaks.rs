//! The discrete isotopologue state type and its mass-ordered container.

use std::cmp::Ordering;
use std::ops::Index;

use mzpeaks::coordinate::{SimpleInterval, Span1D};
use mzpeaks::{CoordinateLike, IntensityMeasurement, Mass};
use num_traits::Float;

pub(crate) fn isclose<T: Float>(a: T, b: T, delta: T) -> bool {
    (a - b).abs() < delta
}

/// A single isotopologue state: one mass carrying a relative abundance and
/// variance estimates for both quantities.
///
/// Identity, equality, and ordering are defined solely by `mass`. The
/// abundance and the two variances are payload and never participate in
/// comparisons.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbundancePoint {
    /// The mass of this state in atomic mass units
    pub mass: f64,
    /// The unitless relative weight of this state
    pub abundance: f64,
    /// The variance of `mass` accumulated over repeated merges
    pub mass_variance: f64,
    /// The variance of `abundance` accumulated over repeated merges
    pub abundance_variance: f64,
}

impl AbundancePoint {
    #[inline]
    pub fn new(mass: f64, abundance: f64, mass_variance: f64, abundance_variance: f64) -> Self {
        Self {
            mass,
            abundance,
            mass_variance,
            abundance_variance,
        }
    }

    /// Combine two states into one. The abundances sum, the mass becomes the
    /// abundance-weighted mean, the mass variance becomes the abundance-weighted
    /// mean of each parent's own variance plus its squared drift from the new
    /// mean, and the abundance variances sum as independent quantities.
    pub fn combine(&self, other: &Self) -> Self {
        let abundance = self.abundance + other.abundance;
        if abundance <= 0.0 {
            return Self::new(
                self.mass.min(other.mass),
                0.0,
                0.0,
                self.abundance_variance + other.abundance_variance,
            );
        }
        let mass = (self.mass * self.abundance + other.mass * other.abundance) / abundance;
        let mass_variance = (self.abundance * (self.mass_variance + (self.mass - mass).powi(2))
            + other.abundance * (other.mass_variance + (other.mass - mass).powi(2)))
            / abundance;
        Self {
            mass,
            abundance,
            mass_variance,
            abundance_variance: self.abundance_variance + other.abundance_variance,
        }
    }

    pub fn with_abundance(&self, abundance: f64) -> Self {
        Self { abundance, ..*self }
    }

    pub fn with_mass(&self, mass: f64) -> Self {
        Self { mass, ..*self }
    }

    /// Scale the abundance by `factor`, propagating the factor through the
    /// abundance variance quadratically.
    pub fn scaled_by(&self, factor: f64) -> Self {
        Self {
            abundance: self.abundance * factor,
            abundance_variance: self.abundance_variance * factor * factor,
            ..*self
        }
    }
}

impl PartialEq for AbundancePoint {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.mass.total_cmp(&other.mass) == Ordering::Equal
    }
}

impl Eq for AbundancePoint {}

impl PartialOrd for AbundancePoint {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AbundancePoint {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.mass.total_cmp(&other.mass)
    }
}

impl CoordinateLike<Mass> for AbundancePoint {
    #[inline]
    fn coordinate(&self) -> f64 {
        self.mass
    }
}

impl IntensityMeasurement for AbundancePoint {
    #[inline]
    fn intensity(&self) -> f32 {
        self.abundance as f32
    }
}

/// A mass-ordered, mass-deduplicated collection of [`AbundancePoint`].
///
/// Two points that land on the same mass are fused with
/// [`AbundancePoint::combine`] on insertion, so the sequence is always
/// strictly increasing in mass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IsotopeDistribution {
    points: Vec<AbundancePoint>,
}

impl IsotopeDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<AbundancePoint>) -> Self {
        let mut this = Self::new();
        for p in points {
            this.add(p);
        }
        this
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AbundancePoint> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[AbundancePoint] {
        &self.points
    }

    /// Locate `mass` in the ordered sequence, exactly as [`slice::binary_search`]
    /// reports it.
    #[inline]
    pub fn search(&self, mass: f64) -> Result<usize, usize> {
        self.points
            .binary_search_by(|p| p.mass.total_cmp(&mass))
    }

    /// Insert a point, fusing it with an existing point at the same mass.
    pub fn add(&mut self, point: AbundancePoint) {
        match self.search(point.mass) {
            Ok(i) => {
                let fused = self.points[i].combine(&point);
                self.points[i] = fused;
            }
            Err(i) => self.points.insert(i, point),
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<AbundancePoint> {
        if index < self.points.len() {
            Some(self.points.remove(index))
        } else {
            None
        }
    }

    /// Remove the point nearest to `mass`, provided it lies within `tolerance`.
    pub fn remove_nearest(&mut self, mass: f64, tolerance: f64) -> Option<AbundancePoint> {
        let index = match self.search(mass) {
            Ok(i) => Some(i),
            Err(i) => {
                let before = i
                    .checked_sub(1)
                    .map(|j| (j, (self.points[j].mass - mass).abs()));
                let after = self
                    .points
                    .get(i)
                    .map(|p| (i, (p.mass - mass).abs()));
                [before, after]
                    .into_iter()
                    .flatten()
                    .filter(|(_, d)| *d <= tolerance)
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(j, _)| j)
            }
        };
        index.map(|i| self.points.remove(i))
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.abundance).sum()
    }

    /// The single most abundant point, if any.
    pub fn base_peak(&self) -> Option<&AbundancePoint> {
        self.points
            .iter()
            .max_by(|a, b| a.abundance.total_cmp(&b.abundance))
    }

    /// The abundance-weighted mean mass over all points.
    pub fn average_mass(&self) -> Option<f64> {
        let total = self.total();
        if total <= 0.0 {
            return None;
        }
        Some(
            self.points
                .iter()
                .map(|p| p.mass * p.abundance)
                .sum::<f64>()
                / total,
        )
    }

    pub fn min_mass(&self) -> Option<f64> {
        self.points.first().map(|p| p.mass)
    }

    pub fn max_mass(&self) -> Option<f64> {
        self.points.last().map(|p| p.mass)
    }

    /// The contiguous run of points whose masses fall inside `interval`.
    pub fn between(&self, interval: SimpleInterval<f64>) -> &[AbundancePoint] {
        let start = self
            .points
            .partition_point(|p| p.mass < interval.start);
        let end = self.points.partition_point(|p| p.mass <= interval.end);
        &self.points[start..end]
    }

    /// Multiply every abundance by `factor`.
    pub fn scale_by(&mut self, factor: f64) {
        for p in self.points.iter_mut() {
            *p = p.scaled_by(factor);
        }
    }

    /// Move every point by `delta` mass units.
    pub fn shift_by(&mut self, delta: f64) {
        for p in self.points.iter_mut() {
            p.mass += delta;
        }
    }

    /// Drop every point whose abundance is below `threshold`.
    pub fn discard_below(&mut self, threshold: f64) {
        self.points.retain(|p| p.abundance >= threshold);
    }

    /// Restrict the collection to `interval` in place.
    pub fn clip(&mut self, interval: SimpleInterval<f64>) {
        self.points.retain(|p| interval.contains(&p.mass));
    }

    /// A new distribution holding only the points inside `interval`.
    pub fn extract(&self, interval: SimpleInterval<f64>) -> Self {
        Self {
            points: self.between(interval).to_vec(),
        }
    }

    /// Fuse mass-adjacent points closer than `distance` until no such pair
    /// remains.
    ///
    /// This is a fixed-point iteration, not a single pass: fusing two points
    /// moves the result toward the heavier parent, which can bring it within
    /// `distance` of its next neighbor.
    pub fn merge_closer_than(&mut self, distance: f64) {
        if distance <= 0.0 {
            return;
        }
        'outer: loop {
            for i in 1..self.points.len() {
                if isclose(self.points[i].mass, self.points[i - 1].mass, distance) {
                    let fused = self.points[i - 1].combine(&self.points[i]);
                    self.points[i - 1] = fused;
                    self.points.remove(i);
                    continue 'outer;
                }
            }
            break;
        }
    }

    /// Bucket points into bins half of `visible_resolution` wide and keep only
    /// the most abundant point of each bin. A display-oriented simplification;
    /// the authoritative distribution is left untouched.
    pub fn filter_to_resolution(&self, visible_resolution: f64) -> Self {
        if visible_resolution <= 0.0 || self.is_empty() {
            return self.clone();
        }
        let bin_width = visible_resolution * 0.5;
        let mut kept: Vec<AbundancePoint> = Vec::new();
        let mut current_bin = i64::MIN;
        for p in self.points.iter() {
            let bin = (p.mass / bin_width).floor() as i64;
            if bin != current_bin {
                kept.push(*p);
                current_bin = bin;
            } else if let Some(last) = kept.last_mut() {
                if p.abundance > last.abundance {
                    *last = *p;
                }
            }
        }
        Self { points: kept }
    }
}

impl Index<usize> for IsotopeDistribution {
    type Output = AbundancePoint;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<'a> IntoIterator for &'a IsotopeDistribution {
    type Item = &'a AbundancePoint;
    type IntoIter = std::slice::Iter<'a, AbundancePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl FromIterator<AbundancePoint> for IsotopeDistribution {
    fn from_iter<T: IntoIterator<Item = AbundancePoint>>(iter: T) -> Self {
        let mut this = Self::new();
        for p in iter {
            this.add(p);
        }
        this
    }
}

impl Extend<AbundancePoint> for IsotopeDistribution {
    fn extend<T: IntoIterator<Item = AbundancePoint>>(&mut self, iter: T) {
        for p in iter {
            self.add(p);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_is_close {
        ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
            assert!(
                ($t1 - $t2).abs() < $tol,
                "Observed {} {}, expected {}, difference {}",
                $label,
                $t1,
                $t2,
                $t1 - $t2,
            );
        };
    }

    #[test]
    fn test_identity_is_mass_only() {
        let a = AbundancePoint::new(100.0, 1.0, 0.0, 0.0);
        let b = AbundancePoint::new(100.0, 0.25, 0.5, 0.5);
        assert_eq!(a, b);
        let c = AbundancePoint::new(100.1, 1.0, 0.0, 0.0);
        assert!(a < c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_combine_weighted_mean() {
        let a = AbundancePoint::new(10.0, 3.0, 0.0, 0.5);
        let b = AbundancePoint::new(11.0, 1.0, 0.0, 0.5);
        let c = a.combine(&b);
        assert_is_close!(c.mass, 10.25, 1e-12, "mass");
        assert_is_close!(c.abundance, 4.0, 1e-12, "abundance");
        // weighted mean of squared drifts: (3*(0.25)^2 + 1*(0.75)^2)/4
        assert_is_close!(c.mass_variance, 0.1875, 1e-12, "mass variance");
        assert_is_close!(c.abundance_variance, 1.0, 1e-12, "abundance variance");
    }

    #[test]
    fn test_add_fuses_equal_masses() {
        let mut dist = IsotopeDistribution::new();
        dist.add(AbundancePoint::new(18.0, 0.5, 0.0, 0.0));
        dist.add(AbundancePoint::new(18.0, 0.5, 0.0, 0.0));
        dist.add(AbundancePoint::new(19.0, 0.1, 0.0, 0.0));
        assert_eq!(dist.len(), 2);
        assert_is_close!(dist[0].abundance, 1.0, 1e-12, "fused abundance");
    }

    #[test]
    fn test_merge_is_a_fixed_point() {
        let points = vec![
            AbundancePoint::new(10.0, 1.0, 0.0, 0.0),
            AbundancePoint::new(10.4, 4.0, 0.0, 0.0),
            AbundancePoint::new(10.75, 1.0, 0.0, 0.0),
            AbundancePoint::new(12.0, 1.0, 0.0, 0.0),
        ];
        let mut dist = IsotopeDistribution::from_points(points);
        dist.merge_closer_than(0.5);
        // 10.0 and 10.4 fuse to 10.333.., which is then within 0.5 of 10.75,
        // so the scan must restart and fuse again
        assert_eq!(dist.len(), 2);
        let masses: Vec<f64> = dist.iter().map(|p| p.mass).collect();
        let abundances: Vec<f64> = dist.iter().map(|p| p.abundance).collect();

        let mut again = dist.clone();
        again.merge_closer_than(0.5);
        let masses2: Vec<f64> = again.iter().map(|p| p.mass).collect();
        let abundances2: Vec<f64> = again.iter().map(|p| p.abundance).collect();
        assert_eq!(masses, masses2);
        assert_eq!(abundances, abundances2);

        again.merge_closer_than(0.25);
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_between_and_extract() {
        let dist = IsotopeDistribution::from_points(vec![
            AbundancePoint::new(10.0, 1.0, 0.0, 0.0),
            AbundancePoint::new(11.0, 2.0, 0.0, 0.0),
            AbundancePoint::new(12.0, 3.0, 0.0, 0.0),
        ]);
        let iv = SimpleInterval::new(10.5, 12.0);
        assert_eq!(dist.between(iv).len(), 2);
        let sub = dist.extract(iv);
        assert_eq!(sub.len(), 2);
        assert_is_close!(sub.total(), 5.0, 1e-12, "extracted total");

        let mut clipped = dist.clone();
        clipped.clip(SimpleInterval::new(0.0, 10.5));
        assert_eq!(clipped.len(), 1);
    }

    #[test]
    fn test_remove_nearest() {
        let mut dist = IsotopeDistribution::from_points(vec![
            AbundancePoint::new(10.0, 1.0, 0.0, 0.0),
            AbundancePoint::new(11.0, 2.0, 0.0, 0.0),
        ]);
        assert!(dist.remove_nearest(10.9, 0.2).is_some());
        assert_eq!(dist.len(), 1);
        assert!(dist.remove_nearest(10.9, 0.2).is_none());
        assert_eq!(dist.len(), 1);
    }

    #[test]
    fn test_filter_to_resolution() {
        let dist = IsotopeDistribution::from_points(vec![
            AbundancePoint::new(10.00, 1.0, 0.0, 0.0),
            AbundancePoint::new(10.02, 5.0, 0.0, 0.0),
            AbundancePoint::new(10.04, 2.0, 0.0, 0.0),
            AbundancePoint::new(11.0, 1.0, 0.0, 0.0),
        ]);
        let filtered = dist.filter_to_resolution(0.2);
        assert_eq!(filtered.len(), 2);
        assert_is_close!(filtered[0].abundance, 5.0, 1e-12, "bin survivor");
    }

    #[test]
    fn test_average_mass() {
        let dist = IsotopeDistribution::from_points(vec![
            AbundancePoint::new(10.0, 1.0, 0.0, 0.0),
            AbundancePoint::new(20.0, 3.0, 0.0, 0.0),
        ]);
        assert_is_close!(dist.average_mass().unwrap(), 17.5, 1e-12, "average mass");
        assert_is_close!(dist.base_peak().unwrap().mass, 20.0, 1e-12, "base peak");
    }
}
