//! Regression inputs and the cohort-split fit of the 1:1 dilution law.
//!
//! For each observation `x = -logit(mapDep)` and `y = ln(alt / (alt + main))`.
//! Under dilution `y = x + ln(c) + ln(p_n)`, so fitting `y` with `x` as an
//! offset leaves one intercept per (cohort, site) cell.
use crate::error::{NumtError, Result};
use crate::linalg::{least_squares, DesignMatrix};
use crate::{Dataset, ReadCount};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

pub fn inverse_logit(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Log of the alternate-allele fraction, `None` when there is no alternate read.
pub fn log_alt_fraction(alt: ReadCount, main: ReadCount) -> Option<f64> {
    if alt == 0 {
        None
    } else {
        Some((f64::from(alt) / (f64::from(alt) + f64::from(main))).ln())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cohort {
    Older,
    Newer,
}

impl Cohort {
    pub fn as_str(self) -> &'static str {
        match self {
            Cohort::Older => "older",
            Cohort::Newer => "newer",
        }
    }
}

/// Sequencing-technology cohort of each individual, by explicit membership.
#[derive(Debug, Clone)]
pub struct CohortAssignment {
    older: HashSet<String>,
}

impl CohortAssignment {
    /// Every identifier in `older_members` must name an individual in `individuals`.
    pub fn from_members(individuals: &[String], older_members: &[String]) -> Result<Self> {
        let known: HashSet<&str> = individuals.iter().map(String::as_str).collect();
        if let Some(unknown) = older_members.iter().find(|id| !known.contains(id.as_str())) {
            return Err(NumtError::UnknownIndividual { id: unknown.clone() });
        }
        Ok(Self {
            older: older_members.iter().cloned().collect(),
        })
    }

    pub fn cohort_of(&self, individual: &str) -> Cohort {
        if self.older.contains(individual) {
            Cohort::Older
        } else {
            Cohort::Newer
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionRow {
    /// Index into `RegressionInput::individuals()`.
    pub individual: usize,
    /// Index into `RegressionInput::sites()`.
    pub site: usize,
    pub cohort: Cohort,
    pub x: f64,
    pub y: Option<f64>,
    pub alt: ReadCount,
    pub main: ReadCount,
}

impl RegressionRow {
    /// Rows that enter the linear fits: a defined `y` and a finite `x`.
    pub fn is_complete(&self) -> bool {
        self.y.is_some() && self.x.is_finite()
    }

    pub fn depth(&self) -> u64 {
        u64::from(self.alt) + u64::from(self.main)
    }
}

/// Per-observation regression inputs with their own individual and site levels.
#[derive(Debug, Clone)]
pub struct RegressionInput {
    individuals: Vec<String>,
    sites: Vec<String>,
    rows: Vec<RegressionRow>,
}

impl RegressionInput {
    pub fn from_dataset(dataset: &Dataset, cohorts: &CohortAssignment) -> Self {
        let rows = dataset
            .observations()
            .iter()
            .filter_map(|o| {
                Some(RegressionRow {
                    individual: dataset.individual_position(&o.individual)?,
                    site: dataset.site_position(&o.site)?,
                    cohort: cohorts.cohort_of(&o.individual),
                    x: -logit(o.map_depth),
                    y: log_alt_fraction(o.alt, o.main),
                    alt: o.alt,
                    main: o.main,
                })
            })
            .collect();
        Self {
            individuals: dataset.individuals().to_vec(),
            sites: dataset.sites().to_vec(),
            rows,
        }
    }

    pub fn individuals(&self) -> &[String] {
        &self.individuals
    }

    pub fn sites(&self) -> &[String] {
        &self.sites
    }

    pub fn rows(&self) -> &[RegressionRow] {
        &self.rows
    }

    pub fn complete_rows(&self) -> impl Iterator<Item = &RegressionRow> {
        self.rows.iter().filter(|r| r.is_complete())
    }

    /// Rows passing `keep`, with individual and site levels reduced to the
    /// ones still present, in their previous order.
    pub fn filter<F>(&self, keep: F) -> Self
    where
        F: Fn(&RegressionRow, &str) -> bool,
    {
        let kept: Vec<&RegressionRow> = self
            .rows
            .iter()
            .filter(|r| keep(r, &self.sites[r.site]))
            .collect();

        let relevel = |present: Vec<bool>| -> (Vec<usize>, Vec<usize>) {
            let mut map = vec![usize::MAX; present.len()];
            let mut order = vec![];
            for (old, _) in present.iter().enumerate().filter(|(_, p)| **p) {
                map[old] = order.len();
                order.push(old);
            }
            (map, order)
        };
        let mut individual_present = vec![false; self.individuals.len()];
        let mut site_present = vec![false; self.sites.len()];
        for row in &kept {
            individual_present[row.individual] = true;
            site_present[row.site] = true;
        }
        let (individual_map, individual_order) = relevel(individual_present);
        let (site_map, site_order) = relevel(site_present);

        Self {
            individuals: individual_order.iter().map(|&i| self.individuals[i].clone()).collect(),
            sites: site_order.iter().map(|&j| self.sites[j].clone()).collect(),
            rows: kept
                .into_iter()
                .map(|r| RegressionRow {
                    individual: individual_map[r.individual],
                    site: site_map[r.site],
                    ..r.clone()
                })
                .collect(),
        }
    }

    pub fn cohort(&self, cohort: Cohort) -> Self {
        self.filter(|row, _| row.cohort == cohort)
    }

    pub fn without_sites(&self, excluded: &HashSet<String>) -> Self {
        self.filter(|_, site| !excluded.contains(site))
    }

    /// Largest finite `x` among the complete rows.
    pub fn max_x(&self) -> Option<f64> {
        self.complete_rows().map(|r| r.x).fold(None, |max, x| match max {
            Some(m) if m >= x => Some(m),
            _ => Some(x),
        })
    }
}

/// One intercept per (cohort, site) cell.
#[derive(Debug, Clone, Serialize)]
pub struct CohortIntercept {
    pub cohort: Cohort,
    pub site: String,
    pub intercept: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortFit {
    pub intercepts: Vec<CohortIntercept>,
    /// Extremes of the newer cohort's per-site intercepts.
    pub min_intercept: f64,
    pub max_intercept: f64,
    /// Slope of `x` when it is estimated instead of fixed at 1.
    pub free_slope: f64,
    pub offset_sigma: Option<f64>,
    pub free_slope_sigma: Option<f64>,
    pub n_obs: usize,
}

impl CohortFit {
    pub fn intercept(&self, cohort: Cohort, site: &str) -> Option<f64> {
        self.intercepts
            .iter()
            .find(|c| c.cohort == cohort && c.site == site)
            .map(|c| c.intercept)
    }
}

/// Fits `y ~ 0 + cohort:site` with `x` as offset, plus the free-slope variant.
pub fn fit_cohort_intercepts(input: &RegressionInput) -> Result<CohortFit> {
    let rows: Vec<&RegressionRow> = input.complete_rows().collect();
    let cohorts: Vec<Cohort> = {
        let mut present: Vec<Cohort> = input.rows().iter().map(|r| r.cohort).collect();
        present.sort();
        present.dedup();
        present
    };

    let mut cells = HashMap::new();
    let mut names = vec![];
    for &cohort in &cohorts {
        for (j, site) in input.sites().iter().enumerate() {
            cells.insert((cohort, j), names.len());
            names.push(format!("cohort{}:{}", cohort.as_str(), site));
        }
    }
    let p = names.len();

    let mut offset_design = Array2::zeros((rows.len(), p));
    let mut free_design = Array2::zeros((rows.len(), p + 1));
    for (i, row) in rows.iter().enumerate() {
        let cell = cells[&(row.cohort, row.site)];
        offset_design[[i, cell]] = 1.0;
        free_design[[i, cell]] = 1.0;
        free_design[[i, p]] = row.x;
    }
    let y: Array1<f64> = rows.iter().filter_map(|r| r.y).collect();
    let x: Array1<f64> = rows.iter().map(|r| r.x).collect();

    let offset_fit = least_squares(
        &DesignMatrix::new(names.clone(), offset_design),
        &(&y - &x),
        "cohort regression",
    )?;
    let mut free_names = names;
    free_names.push("x".to_owned());
    let free_fit = least_squares(
        &DesignMatrix::new(free_names, free_design),
        &y,
        "cohort regression (free slope)",
    )?;

    let intercepts: Vec<CohortIntercept> = cohorts
        .iter()
        .flat_map(|&cohort| {
            input
                .sites()
                .iter()
                .enumerate()
                .map(move |(j, site)| (cohort, j, site))
        })
        .map(|(cohort, j, site)| CohortIntercept {
            cohort,
            site: site.clone(),
            intercept: offset_fit.coefficients[cells[&(cohort, j)]],
        })
        .collect();

    let newer = intercepts
        .iter()
        .filter(|c| c.cohort == Cohort::Newer)
        .map(|c| c.intercept);
    let (min_intercept, max_intercept) = newer
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c), hi.max(c))
        });
    if !min_intercept.is_finite() {
        return Err(NumtError::NoSitesRetained {
            model: "cohort regression (newer cohort)",
        });
    }

    let fit = CohortFit {
        intercepts,
        min_intercept,
        max_intercept,
        free_slope: free_fit.coefficients[p],
        offset_sigma: offset_fit.sigma(),
        free_slope_sigma: free_fit.sigma(),
        n_obs: rows.len(),
    };
    info!(
        cells = p,
        n_obs = fit.n_obs,
        min_intercept = fit.min_intercept,
        max_intercept = fit.max_intercept,
        free_slope = fit.free_slope,
        "cohort regression"
    );
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observation;

    type TestResult = std::result::Result<(), NumtError>;

    /// Exact data: every row satisfies `y = x + b[cohort][site]`.
    fn exact_dataset(intercepts: &[[f64; 3]; 2]) -> (Dataset, CohortAssignment) {
        let alts = [[5, 12, 30, 7], [3, 20, 9, 15], [11, 4, 25, 6]];
        let mut observations = vec![];
        for i in 0..4 {
            let individual = format!("ind{}", i);
            let cohort = if i < 2 { 0 } else { 1 };
            for (j, site_alts) in alts.iter().enumerate() {
                let alt = site_alts[i];
                let main = 100 - alt;
                let y = (alt as f64 / 100.0).ln();
                let x = y - intercepts[cohort][j];
                let map_depth = inverse_logit(-x);
                let site = format!("snp{}", j);
                observations.push(Observation::new(
                    &individual,
                    &site,
                    map_depth,
                    alt,
                    main,
                    false,
                ));
            }
        }
        let dataset = Dataset::new(observations);
        let older = ["ind0".to_owned(), "ind1".to_owned()];
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &older).unwrap();
        (dataset, cohorts)
    }

    #[test]
    fn test_logit_transforms() {
        assert!((logit(0.5)).abs() < 1e-15);
        assert!((inverse_logit(logit(0.2)) - 0.2).abs() < 1e-12);
        assert_eq!(log_alt_fraction(0, 10), None);
        assert_eq!(log_alt_fraction(0, 0), None);
        assert!((log_alt_fraction(1, 9).unwrap() - 0.1f64.ln()).abs() < 1e-15);
    }

    #[test]
    fn test_unknown_older_member() {
        let result = CohortAssignment::from_members(&["a".into()], &["b".into()]);
        assert!(matches!(result, Err(NumtError::UnknownIndividual { id }) if id == "b"));
    }

    #[test]
    fn test_filter_relevels() {
        let dataset = Dataset::new(vec![
            Observation::new("a", "s1", 0.5, 1, 9, false),
            Observation::new("a", "s2", 0.5, 0, 9, false),
            Observation::new("b", "s1", 0.5, 1, 9, false),
            Observation::new("b", "s2", 0.5, 2, 9, false),
        ]);
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &["a".into()]).unwrap();
        let input = RegressionInput::from_dataset(&dataset, &cohorts);
        assert_eq!(input.rows()[1].y, None);
        assert_eq!(input.complete_rows().count(), 3);

        let newer = input.cohort(Cohort::Newer);
        assert_eq!(newer.individuals(), ["b"]);
        assert!(newer.rows().iter().all(|r| r.individual == 0));

        let dropped = input.without_sites(&["s1".to_owned()].into_iter().collect());
        assert_eq!(dropped.sites(), ["s2"]);
        assert!(dropped.rows().iter().all(|r| r.site == 0));
    }

    #[test]
    fn test_recovers_configured_intercepts_and_unit_slope() -> TestResult {
        let truth = [[-2.0, -1.5, -3.0], [-2.5, -1.0, -2.2]];
        let (dataset, cohorts) = exact_dataset(&truth);
        let fit = fit_cohort_intercepts(&RegressionInput::from_dataset(&dataset, &cohorts))?;

        for (c, cohort) in [Cohort::Older, Cohort::Newer].iter().enumerate() {
            for j in 0..3 {
                let estimate = fit.intercept(*cohort, &format!("snp{}", j)).unwrap();
                assert!((estimate - truth[c][j]).abs() < 1e-9, "{:?} {} {}", cohort, j, estimate);
            }
        }
        assert!((fit.free_slope - 1.0).abs() < 1e-8, "{}", fit.free_slope);
        assert!((fit.min_intercept - -2.5).abs() < 1e-9);
        assert!((fit.max_intercept - -1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_site_without_alt_reads_in_a_cohort_is_singular() {
        let dataset = Dataset::new(vec![
            Observation::new("a", "s1", 0.3, 1, 9, false),
            Observation::new("a", "s2", 0.3, 0, 9, false),
            Observation::new("b", "s1", 0.4, 2, 9, false),
            Observation::new("b", "s2", 0.4, 3, 9, false),
        ]);
        let cohorts = CohortAssignment::from_members(dataset.individuals(), &["a".into()]).unwrap();
        let result = fit_cohort_intercepts(&RegressionInput::from_dataset(&dataset, &cohorts));
        assert!(matches!(result, Err(NumtError::SingularFit { .. })));
    }
}
