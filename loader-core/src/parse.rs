use anyhow::{bail, Context, Error};

use crate::Row;

/// Parses a whole decoded object into ordered rows.
pub trait Parser: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<Vec<Row>, Error>;
}

impl<F> Parser for F
where
    F: Fn(&[u8]) -> Result<Vec<Row>, Error> + Send + Sync,
{
    fn parse(&self, data: &[u8]) -> Result<Vec<Row>, Error> {
        self(data)
    }
}

/// Parses CSV. Every line is a row: header lines are dropped by the handler's
/// `skip_leading_rows`, not here.
#[derive(Debug, Clone, Copy)]
pub struct CsvParser {
    delimiter: u8,
    flexible: bool,
}

impl Default for CsvParser {
    fn default() -> Self {
        Self {
            delimiter: b',',
            flexible: false,
        }
    }
}

impl CsvParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Accept records with a varying number of fields.
    pub fn flexible(mut self, flexible: bool) -> Self {
        self.flexible = flexible;
        self
    }
}

impl Parser for CsvParser {
    fn parse(&self, data: &[u8]) -> Result<Vec<Row>, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .flexible(self.flexible)
            .from_reader(data);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("failed to parse as CSV")?;
            rows.push(record.iter().map(str::to_owned).collect());
        }

        Ok(rows)
    }
}

/// Parses CSV wrapped in lines that are not CSV at all, such as statement banners at the top
/// and totals at the bottom. The given number of head and tail lines are dropped before parsing.
#[derive(Debug, Clone)]
pub struct PartialCsvParser {
    skip_head_lines: usize,
    skip_tail_lines: usize,
    line_separator: String,
    csv: CsvParser,
}

impl PartialCsvParser {
    pub fn new(skip_head_lines: usize, skip_tail_lines: usize, line_separator: &str) -> Self {
        Self {
            skip_head_lines,
            skip_tail_lines,
            line_separator: line_separator.to_owned(),
            csv: CsvParser::new(),
        }
    }

    pub fn csv(mut self, csv: CsvParser) -> Self {
        self.csv = csv;
        self
    }
}

impl Parser for PartialCsvParser {
    fn parse(&self, data: &[u8]) -> Result<Vec<Row>, Error> {
        let body = std::str::from_utf8(data).context("failed to read input as utf8")?;
        let lines: Vec<&str> = body.split(self.line_separator.as_str()).collect();

        let kept = self.skip_head_lines + self.skip_tail_lines;
        if kept > lines.len() {
            bail!(
                "cannot drop {} head and {} tail lines from {} lines",
                self.skip_head_lines,
                self.skip_tail_lines,
                lines.len()
            );
        }

        let csv_body = lines[self.skip_head_lines..lines.len() - self.skip_tail_lines]
            .join(&self.line_separator);

        self.csv.parse(csv_body.as_bytes())
    }
}
