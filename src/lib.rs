#![crate_name = "numts"]
//! Estimate the fraction of a nuclear genome made of mitochondrial-derived
//! sequence (numts) from how alternate-allele frequencies dilute as the share
//! of mitochondria-like reads grows.
//!
//! The pipeline runs forward through
//! [`matrix`] → [`subsample`] → [`regression`] → [`slope`] → [`bounds`] →
//! [`residual`] / [`pca`], orchestrated by [`pipeline::Pipeline`].
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod prelude;

pub mod bounds;
pub mod config;
pub mod error;
pub mod glm;
pub mod linalg;
pub mod matrix;
pub mod mixed;
pub mod observable;
pub mod pca;
pub mod pipeline;
pub mod regression;
pub mod report;
pub mod residual;
pub mod simulate;
pub mod slope;
pub mod subsample;

use crate::error::Result;

pub type ReadCount = u32;

/// Read counts for one individual at one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub individual: String,
    pub site: String,
    /// Fraction of reads at the site classified as mitochondria-like.
    pub map_depth: f64,
    pub alt: ReadCount,
    pub main: ReadCount,
    /// Polymorphic sites are excluded from the organellar-safe analysis.
    pub polymorphic: bool,
}

impl Observation {
    pub fn new(
        individual: &str,
        site: &str,
        map_depth: f64,
        alt: ReadCount,
        main: ReadCount,
        polymorphic: bool,
    ) -> Self {
        Self {
            individual: individual.into(),
            site: site.into(),
            map_depth,
            alt,
            main,
            polymorphic,
        }
    }

    pub fn depth(&self) -> u64 {
        u64::from(self.alt) + u64::from(self.main)
    }
}

/// An ordered collection of observations with the individual and site
/// levels in order of first appearance.
///
/// Completeness of the individual × site grid is checked when the
/// [`matrix::AlleleMatrix`] is built, not here.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    observations: Vec<Observation>,
    individuals: Vec<String>,
    sites: Vec<String>,
    individual_index: HashMap<String, usize>,
    site_index: HashMap<String, usize>,
}

impl Dataset {
    pub fn new(observations: Vec<Observation>) -> Self {
        let mut individuals = vec![];
        let mut sites = vec![];
        let mut individual_index = HashMap::new();
        let mut site_index = HashMap::new();
        for observation in &observations {
            if !individual_index.contains_key(&observation.individual) {
                individual_index.insert(observation.individual.clone(), individuals.len());
                individuals.push(observation.individual.clone());
            }
            if !site_index.contains_key(&observation.site) {
                site_index.insert(observation.site.clone(), sites.len());
                sites.push(observation.site.clone());
            }
        }
        Self {
            observations,
            individuals,
            sites,
            individual_index,
            site_index,
        }
    }

    /// Collect every observation from a source such as [`observable::Csv`].
    pub fn observe<I>(observable: I) -> Result<Self>
    where
        I: Iterator<Item = Result<Observation>>,
    {
        let observations = observable.collect::<Result<Vec<_>>>()?;
        Ok(Self::new(observations))
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn individuals(&self) -> &[String] {
        &self.individuals
    }

    pub fn sites(&self) -> &[String] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn individual_position(&self, individual: &str) -> Option<usize> {
        self.individual_index.get(individual).copied()
    }

    pub fn site_position(&self, site: &str) -> Option<usize> {
        self.site_index.get(site).copied()
    }

    /// A new dataset holding only the observations whose site passes `keep`.
    /// Site levels shrink to the retained sites and keep their original order.
    pub fn retain_sites<F>(&self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        Self::new(
            self.observations
                .iter()
                .filter(|o| keep(&o.site))
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_keep_first_appearance_order() {
        let dataset = Dataset::new(vec![
            Observation::new("ind2", "snpB", 0.5, 1, 9, false),
            Observation::new("ind2", "snpA", 0.5, 1, 9, false),
            Observation::new("ind1", "snpB", 0.5, 1, 9, false),
            Observation::new("ind1", "snpA", 0.5, 1, 9, false),
        ]);
        assert_eq!(dataset.individuals(), ["ind2", "ind1"]);
        assert_eq!(dataset.sites(), ["snpB", "snpA"]);
        assert_eq!(dataset.site_position("snpA"), Some(1));
    }

    #[test]
    fn test_retain_sites_drops_levels() {
        let dataset = Dataset::new(vec![
            Observation::new("ind1", "snpA", 0.5, 1, 9, false),
            Observation::new("ind1", "snpB", 0.5, 1, 9, false),
            Observation::new("ind1", "snpC", 0.5, 1, 9, false),
        ]);
        let kept = dataset.retain_sites(|site| site != "snpB");
        assert_eq!(kept.sites(), ["snpA", "snpC"]);
        assert_eq!(kept.len(), 2);
    }
}
