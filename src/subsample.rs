//! Frequency filter and weighted subsampling of sites.
//!
//! Sites are drawn without replacement, each draw choosing among the
//! remaining sites with probability proportional to their pooled
//! alternate-allele fraction. Polymorphic sites and sites at or below the
//! frequency cutoff carry zero weight and are never drawn.
use crate::config::Config;
use crate::error::{NumtError, Result};
use crate::matrix::{AlleleMatrix, SiteFrequency};
use crate::Dataset;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info};

/// A dataset restricted to the drawn sites.
pub struct SubsampledDataset {
    dataset: Dataset,
    frequencies: Vec<SiteFrequency>,
    draw_order: Vec<String>,
}

impl SubsampledDataset {
    /// Retained observations; site levels are the drawn sites in their
    /// original dataset order.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Pre-draw frequencies of the retained sites, in `dataset().sites()` order.
    pub fn frequencies(&self) -> &[SiteFrequency] {
        &self.frequencies
    }

    /// Site names in the order they were drawn.
    pub fn draw_order(&self) -> &[String] {
        &self.draw_order
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Subsampler {
    cutoff: f64,
    snp_no: usize,
}

impl Subsampler {
    pub fn new(cutoff: f64, snp_no: usize) -> Self {
        Self { cutoff, snp_no }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cutoff, config.snp_no)
    }

    /// Selection weight per site: the alternate fraction of eligible
    /// sites, zero for the rest.
    pub fn weights(&self, matrix: &AlleleMatrix) -> Vec<f64> {
        matrix
            .site_frequencies()
            .iter()
            .zip(matrix.site_polymorphic())
            .map(|(frequency, polymorphic)| match frequency.alt_fraction {
                Some(fraction) if !polymorphic && fraction > self.cutoff => fraction,
                _ => 0.0,
            })
            .collect()
    }

    /// Column indices of the drawn sites, in draw order.
    pub fn draw<R: Rng + ?Sized>(&self, weights: &[f64], rng: &mut R) -> Result<Vec<usize>> {
        let eligible = weights.iter().filter(|w| **w > 0.0).count();
        if eligible < self.snp_no {
            return Err(NumtError::InsufficientEligibleSites {
                eligible,
                requested: self.snp_no,
            });
        }

        let insufficient = |_| NumtError::InsufficientEligibleSites {
            eligible,
            requested: self.snp_no,
        };
        let mut distribution = WeightedIndex::new(weights).map_err(insufficient)?;
        let mut drawn = Vec::with_capacity(self.snp_no);
        for draw in 0..self.snp_no {
            let site = distribution.sample(rng);
            drawn.push(site);
            if draw + 1 < self.snp_no {
                distribution
                    .update_weights(&[(site, &0.0)])
                    .map_err(insufficient)?;
            }
        }
        Ok(drawn)
    }

    pub fn subsample<R: Rng + ?Sized>(
        &self,
        matrix: &AlleleMatrix,
        dataset: &Dataset,
        rng: &mut R,
    ) -> Result<SubsampledDataset> {
        let weights = self.weights(matrix);
        debug!(
            eligible = weights.iter().filter(|w| **w > 0.0).count(),
            sites = weights.len(),
            cutoff = self.cutoff,
            "site eligibility"
        );
        let drawn = self.draw(&weights, rng)?;

        let draw_order: Vec<String> = drawn.iter().map(|&j| matrix.sites()[j].clone()).collect();
        let retained: HashSet<&str> = draw_order.iter().map(String::as_str).collect();
        let subset = dataset.retain_sites(|site| retained.contains(site));
        let frequencies = matrix
            .site_frequencies()
            .into_iter()
            .filter(|f| retained.contains(f.site.as_str()))
            .collect();

        info!(drawn = draw_order.len(), "weighted site subsample");
        Ok(SubsampledDataset {
            dataset: subset,
            frequencies,
            draw_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observation;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dataset(alt: &[u32], main: &[u32], sites: usize) -> Dataset {
        Dataset::new(
            alt.iter()
                .zip(main)
                .enumerate()
                .map(|(k, (&a, &m))| {
                    let individual = format!("ind{}", k / sites);
                    let site = format!("snp{}", k % sites);
                    Observation::new(&individual, &site, 0.5, a, m, false)
                })
                .collect(),
        )
    }

    #[test]
    fn test_full_coverage_returns_every_site() -> std::result::Result<(), NumtError> {
        let data = dataset(&[1, 0, 2, 0, 3, 1], &[9, 10, 8, 10, 7, 9], 2);
        let matrix = AlleleMatrix::from_dataset(&data)?;
        let sampler = Subsampler::new(0.01, 2);
        let weights = sampler.weights(&matrix);
        assert_eq!(weights, vec![6.0 / 30.0, 1.0 / 30.0]);

        let subsample = sampler.subsample(&matrix, &data, &mut StdRng::seed_from_u64(1))?;
        assert_eq!(subsample.dataset().sites(), ["snp0", "snp1"]);
        assert_eq!(subsample.dataset().len(), 6);
        assert_eq!(subsample.frequencies().len(), 2);
        Ok(())
    }

    #[test]
    fn test_polymorphic_and_rare_sites_have_zero_weight() -> std::result::Result<(), NumtError> {
        let mut observations = dataset(&[5, 0, 5, 5, 0, 5], &[5, 10, 5, 5, 10, 5], 3)
            .observations()
            .to_vec();
        for observation in observations.iter_mut().filter(|o| o.site == "snp2") {
            observation.polymorphic = true;
        }
        let matrix = AlleleMatrix::from_dataset(&Dataset::new(observations))?;
        let weights = Subsampler::new(0.01, 1).weights(&matrix);
        assert_eq!(weights, vec![0.5, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_too_few_eligible_sites() {
        let sampler = Subsampler::new(0.01, 3);
        let result = sampler.draw(&[0.2, 0.0, 0.4], &mut StdRng::seed_from_u64(7));
        assert!(matches!(
            result,
            Err(NumtError::InsufficientEligibleSites { eligible: 2, requested: 3 })
        ));
    }

    proptest! {
        #[test]
        fn prop_draw_is_distinct_weighted_and_reproducible(
            weights in proptest::collection::vec(prop_oneof![Just(0.0), 0.02f64..1.0], 1..60),
            seed in any::<u64>(),
            take in 1usize..30,
        ) {
            let eligible = weights.iter().filter(|w| **w > 0.0).count();
            prop_assume!(take <= eligible);
            let sampler = Subsampler::new(0.01, take);

            let first = sampler.draw(&weights, &mut StdRng::seed_from_u64(seed)).unwrap();
            let second = sampler.draw(&weights, &mut StdRng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), take);
            prop_assert_eq!(first.iter().collect::<HashSet<_>>().len(), take);
            prop_assert!(first.iter().all(|&j| weights[j] > 0.0));
        }
    }
}
