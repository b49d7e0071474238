//! Hands a finished run to the reporting layer as JSON and CSV tables.
use crate::error::Result;
use crate::pipeline::NumtReport;
use crate::regression::Cohort;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize, PartialEq)]
pub struct SiteRow {
    pub site: String,
    pub alt_fraction: Option<f64>,
    pub older_intercept: Option<f64>,
    pub newer_intercept: Option<f64>,
    pub slope: Option<f64>,
    pub rogue: bool,
    pub cval: Option<f64>,
}

/// One row per subsampled site, joining every per-site estimate.
pub fn site_rows(report: &NumtReport) -> Vec<SiteRow> {
    report
        .subsample
        .frequencies
        .iter()
        .map(|frequency| {
            let site = frequency.site.as_str();
            let slope_fit = report.slopes.site(site);
            SiteRow {
                site: site.to_owned(),
                alt_fraction: frequency.alt_fraction,
                older_intercept: report.cohort.intercept(Cohort::Older, site),
                newer_intercept: report.cohort.intercept(Cohort::Newer, site),
                slope: slope_fit.and_then(|s| s.slope),
                rogue: report
                    .slopes
                    .flags
                    .iter()
                    .any(|f| f.site == site && f.rogue),
                cval: report
                    .bounds
                    .cvals
                    .iter()
                    .find(|c| c.site == site)
                    .map(|c| c.intercept),
            }
        })
        .collect()
}

pub fn write_site_table<W: Write>(report: &NumtReport, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in site_rows(report) {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Individual, label and one column per principal component.
pub fn write_scores<W: Write>(report: &NumtReport, writer: W) -> Result<()> {
    let pca = &report.pca;
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["individual".to_owned(), "label".to_owned()];
    header.extend((1..=pca.scores.ncols()).map(|c| format!("PC{}", c)));
    wtr.write_record(&header)?;
    for ((individual, label), scores) in pca
        .individuals
        .iter()
        .zip(&pca.labels)
        .zip(pca.scores.rows())
    {
        let mut record = vec![individual.clone(), label.label.clone()];
        record.extend(scores.iter().map(|s| s.to_string()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<P: AsRef<Path>>(report: &NumtReport, path: P) -> Result<()> {
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
