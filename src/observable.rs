use crate::error::{NumtError, Result};
use crate::{Observation, ReadCount};
use std::io::Read;
use std::path::Path;

/// Column positions of the observation fields in a record.
#[derive(Clone, Copy)]
struct Columns {
    individual: usize,
    site: usize,
    map_depth: usize,
    alt: usize,
    main: usize,
    polymorphic: usize,
}

/// Produces Observations from delimited data, one per record.
///
/// `Csv` implements Iterator so it can be passed
/// directly to `Dataset::observe()`
pub struct Csv {
    records: std::iter::Enumerate<csv::StringRecordsIntoIter<Box<dyn Read>>>,
    columns: Columns,
}

impl Csv {
    fn new(records: csv::StringRecordsIntoIter<Box<dyn Read>>, columns: Columns) -> Self {
        Self {
            records: records.enumerate(),
            columns,
        }
    }

    fn parse(&self, idx: usize, row: &csv::StringRecord) -> Result<Observation> {
        let field = |i: usize, name: &str| {
            row.get(i)
                .map(str::trim)
                .ok_or_else(|| NumtError::parse(idx, format!("missing {} field", name)))
        };
        let count = |i: usize, name: &str| -> Result<ReadCount> {
            let raw = field(i, name)?;
            raw.parse::<ReadCount>()
                .map_err(|e| NumtError::parse(idx, format!("{} {:?}: {}", name, raw, e)))
        };

        let raw_depth = field(self.columns.map_depth, "mapDep")?;
        let map_depth: f64 = raw_depth
            .parse()
            .map_err(|e| NumtError::parse(idx, format!("mapDep {:?}: {}", raw_depth, e)))?;
        if !(0.0..=1.0).contains(&map_depth) {
            return Err(NumtError::parse(
                idx,
                format!("mapDep {} outside [0, 1]", map_depth),
            ));
        }

        let raw_flag = field(self.columns.polymorphic, "polymorphic")?;
        let polymorphic = parse_flag(raw_flag)
            .ok_or_else(|| {
                NumtError::parse(idx, format!("polymorphic {:?} is not a boolean", raw_flag))
            })?;

        Ok(Observation {
            individual: field(self.columns.individual, "individual")?.to_owned(),
            site: field(self.columns.site, "SNP")?.to_owned(),
            map_depth,
            alt: count(self.columns.alt, "alt")?,
            main: count(self.columns.main, "main")?,
            polymorphic,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "TRUE" | "True" | "true" | "T" | "1" => Some(true),
        "FALSE" | "False" | "false" | "F" | "0" => Some(false),
        _ => None,
    }
}

impl Iterator for Csv {
    type Item = Result<Observation>;

    fn next(&mut self) -> Option<Result<Observation>> {
        match self.records.next()? {
            (idx, Ok(row)) => Some(self.parse(idx, &row)),
            (_, Err(e)) => Some(Err(e.into())),
        }
    }
}

pub struct CsvBuilder {
    delimiter: u8,
    individual_field: String,
    site_field: String,
    map_depth_field: String,
    alt_field: String,
    main_field: String,
    polymorphic_field: String,
}

impl Default for CsvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvBuilder {
    /// Construct a new Csv builder expecting the
    /// `individual,SNP,mapDep,alt,main,polymorphic` header.
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            individual_field: "individual".to_owned(),
            site_field: "SNP".to_owned(),
            map_depth_field: "mapDep".to_owned(),
            alt_field: "alt".to_owned(),
            main_field: "main".to_owned(),
            polymorphic_field: "polymorphic".to_owned(),
        }
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    pub fn individual_field(&mut self, name: &str) -> &mut Self {
        self.individual_field = name.to_owned();
        self
    }

    pub fn site_field(&mut self, name: &str) -> &mut Self {
        self.site_field = name.to_owned();
        self
    }

    pub fn map_depth_field(&mut self, name: &str) -> &mut Self {
        self.map_depth_field = name.to_owned();
        self
    }

    pub fn alt_field(&mut self, name: &str) -> &mut Self {
        self.alt_field = name.to_owned();
        self
    }

    pub fn main_field(&mut self, name: &str) -> &mut Self {
        self.main_field = name.to_owned();
        self
    }

    pub fn polymorphic_field(&mut self, name: &str) -> &mut Self {
        self.polymorphic_field = name.to_owned();
        self
    }

    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> Result<Csv> {
        self.from_reader(Box::new(std::fs::File::open(path)?))
    }

    pub fn from_reader(&self, reader: Box<dyn Read>) -> Result<Csv> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| NumtError::parse(0, format!("header has no {:?} column", name)))
        };
        let columns = Columns {
            individual: position(&self.individual_field)?,
            site: position(&self.site_field)?,
            map_depth: position(&self.map_depth_field)?,
            alt: position(&self.alt_field)?,
            main: position(&self.main_field)?,
            polymorphic: position(&self.polymorphic_field)?,
        };

        Ok(Csv::new(rdr.into_records(), columns))
    }
}
