use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Square moving-window side length in cells. Always odd and ≥ 3 so a
/// centre cell exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct WindowSize(usize);

impl WindowSize {
    pub fn new(size: usize) -> Result<Self> {
        if size < 3 {
            return Err(Error::InvalidWindow { size, reason: "must be at least 3 cells".into() });
        }
        if size % 2 == 0 {
            return Err(Error::InvalidWindow { size, reason: "must be odd so a centre cell exists".into() });
        }
        Ok(Self(size))
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// Cells on each side of the centre.
    pub fn half(self) -> usize {
        self.0 / 2
    }

    /// Ground side length of the window footprint.
    pub fn side_length(self, cell_size: f64) -> f64 {
        self.0 as f64 * cell_size
    }

    /// Fails with `InvalidWindow` when the window does not fit inside a
    /// `width`×`height` grid.
    pub fn check_fits(self, width: usize, height: usize) -> Result<()> {
        if self.0 > width || self.0 > height {
            return Err(Error::InvalidWindow {
                size: self.0,
                reason: format!("larger than the {width}x{height} raster"),
            });
        }
        Ok(())
    }
}

impl Default for WindowSize {
    /// 11 cells: 330 m on a 30 m grid.
    fn default() -> Self {
        Self(11)
    }
}

impl TryFrom<usize> for WindowSize {
    type Error = Error;

    fn try_from(size: usize) -> Result<Self> {
        Self::new(size)
    }
}

impl From<WindowSize> for usize {
    fn from(w: WindowSize) -> usize {
        w.0
    }
}

/// How the per-cell metric loop is scheduled. Results are identical in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    Sequential,
    /// All available cores.
    #[default]
    Parallel,
    /// A dedicated pool with this many workers.
    ParallelWith(usize),
}

impl ProcessingMode {
    /// `None` or `Some(0)` → all cores, `Some(1)` → sequential.
    pub fn from_workers(workers: Option<usize>) -> Self {
        match workers {
            None | Some(0) => Self::Parallel,
            Some(1) => Self::Sequential,
            Some(n) => Self::ParallelWith(n),
        }
    }

    /// Evaluate `f` for every row index in `0..rows`, preserving order.
    pub(crate) fn map_rows<T, F>(&self, rows: usize, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        #[cfg(feature = "threading")]
        {
            use rayon::prelude::*;
            match self {
                Self::Sequential => Ok((0..rows).map(f).collect()),
                Self::Parallel => Ok((0..rows).into_par_iter().map(f).collect()),
                Self::ParallelWith(threads) => {
                    let pool = rayon::ThreadPoolBuilder::new()
                        .num_threads(*threads)
                        .build()
                        .map_err(|e| Error::InvalidParameter {
                            name: "workers",
                            value: threads.to_string(),
                            reason: e.to_string(),
                        })?;
                    Ok(pool.install(|| (0..rows).into_par_iter().map(f).collect()))
                }
            }
        }
        #[cfg(not(feature = "threading"))]
        {
            let _ = self;
            Ok((0..rows).map(f).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_must_be_odd_and_at_least_three() {
        assert!(WindowSize::new(11).is_ok());
        assert!(matches!(WindowSize::new(10), Err(Error::InvalidWindow { size: 10, .. })));
        assert!(matches!(WindowSize::new(1), Err(Error::InvalidWindow { size: 1, .. })));
    }

    #[test]
    fn eleven_cells_of_thirty_metres_is_330() {
        assert_eq!(WindowSize::new(11).unwrap().side_length(30.0), 330.0);
    }

    #[test]
    fn window_larger_than_raster_rejected() {
        let w = WindowSize::new(5).unwrap();
        assert!(w.check_fits(5, 5).is_ok());
        assert!(w.check_fits(4, 10).is_err());
    }

    #[test]
    fn window_deserializes_with_validation() {
        let w: WindowSize = serde_json::from_str("7").unwrap();
        assert_eq!(w.get(), 7);
        assert!(serde_json::from_str::<WindowSize>("8").is_err());
    }

    #[test]
    fn row_order_is_preserved_in_every_mode() {
        for mode in [ProcessingMode::Sequential, ProcessingMode::Parallel, ProcessingMode::ParallelWith(3)] {
            let rows = mode.map_rows(50, |r| r * 2).unwrap();
            assert_eq!(rows, (0..50).map(|r| r * 2).collect::<Vec<_>>());
        }
    }
}
