use crate::error::{Error, Result};
use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// Selects the column whose value decides the output file of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// One-based column position.
    Index(usize),
    /// Column looked up by its name in the header line.
    Name(String),
}

impl Column {
    /// Resolves the column against the fields of the header and returns
    /// the zero-based field index.
    pub fn resolve(&self, header: &[&[u8]]) -> Result<usize> {
        match self {
            Column::Index(0) => Err(Error::Config(
                "column index is one-based, 0 is not a valid column".into(),
            )),
            Column::Index(n) if *n > header.len() => Err(Error::Config(format!(
                "column {n} is out of range, the header only has {} columns",
                header.len()
            ))),
            Column::Index(n) => Ok(n - 1),
            Column::Name(name) => header
                .iter()
                .position(|field| *field == name.as_bytes())
                .ok_or_else(|| Error::Config(format!("column '{name}' not found in header"))),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Data rows written.
    pub records: usize,
    /// Distinct output files created.
    pub files: usize,
    /// Keys whose output file already existed from an earlier run of rows
    /// and has been truncated on reopen. Each key is listed once.
    pub truncated: Vec<String>,
}

pub struct Splitter {
    column: Column,
    delimiter: char,
    stub: String,
    suffix: String,
    sanitize: bool,
}

/// The single output file open at any time.
struct Group {
    key: Vec<u8>,
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

impl Group {
    fn create(key: &[u8], path: PathBuf, header: &[u8]) -> Result<Self> {
        let file = File::create(&path).map_err(|err| Error::io(&path, err))?;
        let mut group = Self {
            key: key.to_vec(),
            path,
            writer: BufWriter::new(file),
            records: 0,
        };
        group.write_line(header)?;
        Ok(group)
    }

    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        let mut write = || -> io::Result<()> {
            self.writer.write_all(line)?;
            if !line.ends_with(b"\n") {
                self.writer.write_all(b"\n")?;
            }
            Ok(())
        };
        write().map_err(|err| Error::io(&self.path, err))
    }

    fn close(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|err| Error::io(&self.path, err))?;
        tracing::debug!(
            "... wrote {} records (key: {}) to {}",
            self.records,
            String::from_utf8_lossy(&self.key),
            self.path.display()
        );
        Ok(())
    }
}

/// Iterates the fields of a row separated by an encoded delimiter.
struct Fields<'a> {
    rest: Option<&'a [u8]>,
    delimiter: &'a [u8],
}

impl<'a> Fields<'a> {
    fn new(row: &'a [u8], delimiter: &'a [u8]) -> Self {
        Self {
            rest: Some(row),
            delimiter,
        }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        match rest
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter)
        {
            Some(pos) => {
                self.rest = Some(&rest[pos + self.delimiter.len()..]);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

impl Splitter {
    pub fn new(column: Column, delimiter: char, stub: String, suffix: String) -> Self {
        Self {
            column,
            delimiter,
            stub,
            suffix,
            sanitize: false,
        }
    }

    /// Strip characters outside of `[0-9A-Za-z_.-]` from keys before they
    /// become part of an output file name.
    pub fn sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn output_path(&self, key: &[u8]) -> PathBuf {
        let key = String::from_utf8_lossy(key);
        let key = if self.sanitize {
            protect_filename(&key)
        } else {
            key.into_owned()
        };
        PathBuf::from(format!("{}{}{}", self.stub, key, self.suffix))
    }

    pub fn split_file(&self, path: impl AsRef<Path>) -> Result<SplitSummary> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::io(path, err))?;
        self.split_stream(BufReader::new(file))
    }

    /// Streams `input` and writes every data row, byte for byte, to the
    /// output file named after its key. The input must be sorted by the
    /// split column; a key showing up again after a different one truncates
    /// its earlier file.
    pub fn split_stream(&self, mut input: impl BufRead) -> Result<SplitSummary> {
        let mut delimiter = [0u8; 4];
        let delimiter: &[u8] = self.delimiter.encode_utf8(&mut delimiter).as_bytes();

        let mut header = Vec::new();
        let n = input
            .read_until(b'\n', &mut header)
            .map_err(|source| Error::Read { line: 1, source })?;
        if n == 0 {
            return Err(Error::Format {
                line: 1,
                message: "input is empty, expected a header line".into(),
            });
        }

        let header_fields: Vec<&[u8]> = Fields::new(trim_newline(&header), delimiter).collect();
        let index = self.column.resolve(&header_fields)?;

        let mut summary = SplitSummary::default();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut current: Option<Group> = None;
        let mut line = Vec::new();
        let mut line_no = 1;

        loop {
            line.clear();
            line_no += 1;
            let n = input
                .read_until(b'\n', &mut line)
                .map_err(|source| Error::Read {
                    line: line_no,
                    source,
                })?;
            if n == 0 {
                break;
            }

            let row = trim_newline(&line);
            let Some(key) = Fields::new(row, delimiter).nth(index) else {
                return Err(Error::Format {
                    line: line_no,
                    message: format!(
                        "expected at least {} fields, found {}",
                        index + 1,
                        Fields::new(row, delimiter).count()
                    ),
                });
            };

            let group = match current.take() {
                Some(group) if group.key == key => group,
                previous => {
                    if let Some(previous) = previous {
                        previous.close()?;
                    }

                    let path = self.output_path(key);
                    let key_str = String::from_utf8_lossy(key);
                    if !seen.insert(path.clone()) {
                        tracing::warn!(
                            "key '{key_str}' reappeared on line {line_no}, truncating {}; \
                             the input is probably not sorted",
                            path.display()
                        );
                        if !summary.truncated.iter().any(|k| *k == key_str) {
                            summary.truncated.push(key_str.to_string());
                        }
                    }
                    tracing::info!("Writing to {} (key: {key_str})", path.display());
                    Group::create(key, path, &header)?
                }
            };

            let group = current.insert(group);
            group.write_line(&line)?;
            group.records += 1;
            summary.records += 1;
        }

        if let Some(group) = current {
            group.close()?;
        }

        summary.files = seen.len();
        Ok(summary)
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn protect_filename(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}
