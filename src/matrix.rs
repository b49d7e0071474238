use crate::error::{NumtError, Result};
use crate::{Dataset, ReadCount};
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

/// Pooled alternate-allele fraction of one site across all individuals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteFrequency {
    pub site: String,
    pub alt_total: u64,
    pub depth_total: u64,
    /// `None` when the site has no reads at all.
    pub alt_fraction: Option<f64>,
}

/// Individual × site matrices of a complete dataset.
///
/// Rows follow `Dataset::individuals()`, columns follow `Dataset::sites()`.
pub struct AlleleMatrix {
    individuals: Vec<String>,
    sites: Vec<String>,
    alt: Array2<ReadCount>,
    main: Array2<ReadCount>,
    polymorphic: Array2<bool>,
    map_depth: Array2<f64>,
}

impl AlleleMatrix {
    /// Reshapes the flat observations into matrices.
    ///
    /// Fails with `ShapeMismatch` unless every (individual, site) pair
    /// appears exactly once and with `InconsistentFlag` if a site's
    /// polymorphic flag differs between individuals.
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let n = dataset.individuals().len();
        let m = dataset.sites().len();
        let shape = (n, m);

        let mut seen = Array2::from_elem(shape, false);
        let mut alt = Array2::zeros(shape);
        let mut main = Array2::zeros(shape);
        let mut polymorphic = Array2::from_elem(shape, false);
        let mut map_depth = Array2::zeros(shape);

        for observation in dataset.observations() {
            // Levels were derived from these very observations.
            let (i, j) = match (
                dataset.individual_position(&observation.individual),
                dataset.site_position(&observation.site),
            ) {
                (Some(i), Some(j)) => (i, j),
                _ => {
                    return Err(NumtError::shape(
                        n,
                        m,
                        dataset.len(),
                        "observation outside index levels",
                    ))
                }
            };
            if seen[[i, j]] {
                return Err(NumtError::shape(
                    n,
                    m,
                    dataset.len(),
                    format!(
                        "duplicate record for individual {} at site {}",
                        observation.individual, observation.site
                    ),
                ));
            }
            seen[[i, j]] = true;
            alt[[i, j]] = observation.alt;
            main[[i, j]] = observation.main;
            polymorphic[[i, j]] = observation.polymorphic;
            map_depth[[i, j]] = observation.map_depth;
        }

        if let Some(((i, j), _)) = seen.indexed_iter().find(|(_, filled)| !**filled) {
            return Err(NumtError::shape(
                n,
                m,
                dataset.len(),
                format!(
                    "no record for individual {} at site {}",
                    dataset.individuals()[i],
                    dataset.sites()[j]
                ),
            ));
        }

        for (j, column) in polymorphic.axis_iter(Axis(1)).enumerate() {
            if column.iter().any(|flag| *flag != column[0]) {
                return Err(NumtError::InconsistentFlag {
                    site: dataset.sites()[j].clone(),
                });
            }
        }

        Ok(Self {
            individuals: dataset.individuals().to_vec(),
            sites: dataset.sites().to_vec(),
            alt,
            main,
            polymorphic,
            map_depth,
        })
    }

    pub fn individuals(&self) -> &[String] {
        &self.individuals
    }

    pub fn sites(&self) -> &[String] {
        &self.sites
    }

    pub fn alt(&self) -> &Array2<ReadCount> {
        &self.alt
    }

    pub fn main(&self) -> &Array2<ReadCount> {
        &self.main
    }

    pub fn polymorphic(&self) -> &Array2<bool> {
        &self.polymorphic
    }

    pub fn map_depth(&self) -> &Array2<f64> {
        &self.map_depth
    }

    pub fn dim(&self) -> (usize, usize) {
        self.alt.dim()
    }

    /// Column sums of the alternate and main counts.
    pub fn site_totals(&self) -> (Array1<u64>, Array1<u64>) {
        (
            self.alt.mapv(u64::from).sum_axis(Axis(0)),
            self.main.mapv(u64::from).sum_axis(Axis(0)),
        )
    }

    /// One flag per site. Constant within a column by construction.
    pub fn site_polymorphic(&self) -> Vec<bool> {
        self.polymorphic
            .axis_iter(Axis(1))
            .map(|column| column.iter().any(|flag| *flag))
            .collect()
    }

    pub fn site_frequencies(&self) -> Vec<SiteFrequency> {
        let (alt_totals, main_totals) = self.site_totals();
        self.sites
            .iter()
            .zip(alt_totals.iter().zip(main_totals.iter()))
            .map(|(site, (&alt_total, &main_total))| {
                let depth_total = alt_total + main_total;
                SiteFrequency {
                    site: site.clone(),
                    alt_total,
                    depth_total,
                    alt_fraction: if depth_total == 0 {
                        None
                    } else {
                        Some(alt_total as f64 / depth_total as f64)
                    },
                }
            })
            .collect()
    }
}
