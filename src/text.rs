//! Reading stick distributions from plain text.
//!
//! The format is deliberately forgiving: each line is split on whitespace
//! and commas, and the first two numeric tokens become a mass and an
//! abundance. A line carrying exactly one numeric token overrides the merge
//! distance for everything that follows. Lines with no numeric tokens, such
//! as comments or column headers, are skipped.

use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::distribution::{IsotopeDistributionEngine, DEFAULT_MERGE_DISTANCE};
use crate::peaks::{AbundancePoint, IsotopeDistribution};

#[derive(Debug, Error)]
pub enum TextLoadError {
    #[error("Failed to read distribution text: {0}")]
    Io(#[from] io::Error),
}

/// A parsed distribution together with the merge distance the text selected
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDistribution {
    pub distribution: IsotopeDistribution,
    pub merge_distance: f64,
}

/// Parse a stick distribution from `reader`.
///
/// A non-positive merge distance override falls back to the default rather
/// than being carried through literally.
pub fn read_distribution<R: BufRead>(reader: R) -> Result<LoadedDistribution, TextLoadError> {
    let mut distribution = IsotopeDistribution::new();
    let mut merge_distance = DEFAULT_MERGE_DISTANCE;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let mut numbers = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter_map(|token| token.parse::<f64>().ok());
        match (numbers.next(), numbers.next()) {
            (Some(mass), Some(abundance)) => {
                distribution.add(AbundancePoint::new(mass, abundance, 0.0, 0.0));
            }
            (Some(value), None) => {
                merge_distance = if value > 0.0 {
                    value
                } else {
                    warn!(
                        "Line {}: merge distance override {value} is not positive, using default",
                        line_number + 1
                    );
                    DEFAULT_MERGE_DISTANCE
                };
            }
            _ => {}
        }
    }
    debug!(
        "Read {} points, merge distance {merge_distance}",
        distribution.len()
    );
    Ok(LoadedDistribution {
        distribution,
        merge_distance,
    })
}

/// Parse a distribution from a file on disk.
pub fn read_distribution_from_path<P: AsRef<Path>>(
    path: P,
) -> Result<LoadedDistribution, TextLoadError> {
    let handle = fs::File::open(path)?;
    read_distribution(io::BufReader::new(handle))
}

/// Parse from `reader` and install the result as `engine`'s current
/// distribution, replacing whatever it held.
pub fn load_into_engine<R: BufRead>(
    reader: R,
    engine: &mut IsotopeDistributionEngine,
) -> Result<(), TextLoadError> {
    let loaded = read_distribution(reader)?;
    engine.set_merge_distance(loaded.merge_distance);
    engine.set_distribution(loaded.distribution);
    Ok(())
}
