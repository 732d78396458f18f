//! Reader/Writer contracts and the bundled delimited-text codec.
//!
//! `IO` statements carry an opaque directive map; the registry resolves a
//! reader or writer from the `format` directive and hands it the symbol
//! and record tables. The engine never inspects directives beyond
//! `operation` and `format`. A tab-separated file codec ships as the
//! `file` format; embedders register further formats by name.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use stratal_ram::{Domain, IoDirectives, TypeTag};

use crate::record::RecordTable;
use crate::relation::Relation;
use crate::symbol::SymbolTable;
use crate::tuple::Row;

pub trait Reader {
    /// Parse the source and insert every row into the relation.
    fn read_into(&self, relation: &Relation) -> Result<()>;
}

pub trait Writer {
    /// Emit every row of the relation.
    fn write_all(&self, relation: &Relation) -> Result<()>;
}

/// Tables a codec may need for symbol and record columns.
#[derive(Clone)]
pub struct IoSession {
    pub symbols: Arc<SymbolTable>,
    pub records: Arc<RecordTable>,
}

type ReaderFactory = Box<dyn Fn(&IoDirectives, &IoSession) -> Result<Box<dyn Reader>> + Send + Sync>;
type WriterFactory = Box<dyn Fn(&IoDirectives, &IoSession) -> Result<Box<dyn Writer>> + Send + Sync>;

pub struct IoRegistry {
    readers: HashMap<String, ReaderFactory>,
    writers: HashMap<String, WriterFactory>,
}

impl IoRegistry {
    pub fn empty() -> Self {
        IoRegistry { readers: HashMap::new(), writers: HashMap::new() }
    }

    /// Registry with the bundled `file` codec.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_reader("file", |directives, session| {
            Ok(Box::new(DelimitedReader::from_directives(directives, session)?))
        });
        registry.register_writer("file", |directives, session| {
            Ok(Box::new(DelimitedWriter::from_directives(directives, session)?))
        });
        registry
    }

    pub fn register_reader(
        &mut self,
        format: impl Into<String>,
        factory: impl Fn(&IoDirectives, &IoSession) -> Result<Box<dyn Reader>> + Send + Sync + 'static,
    ) {
        self.readers.insert(format.into(), Box::new(factory));
    }

    pub fn register_writer(
        &mut self,
        format: impl Into<String>,
        factory: impl Fn(&IoDirectives, &IoSession) -> Result<Box<dyn Writer>> + Send + Sync + 'static,
    ) {
        self.writers.insert(format.into(), Box::new(factory));
    }

    fn format_of(directives: &IoDirectives) -> &str {
        directives.get("format").map(String::as_str).unwrap_or("file")
    }

    pub fn reader_for(
        &self,
        directives: &IoDirectives,
        session: &IoSession,
    ) -> Result<Box<dyn Reader>> {
        let format = Self::format_of(directives);
        let factory = self
            .readers
            .get(format)
            .ok_or_else(|| anyhow!("no reader registered for format `{format}`"))?;
        factory(directives, session)
    }

    pub fn writer_for(
        &self,
        directives: &IoDirectives,
        session: &IoSession,
    ) -> Result<Box<dyn Writer>> {
        // Size printing reuses the writer contract regardless of format.
        if directives.get("operation").map(String::as_str) == Some("printsize") {
            return Ok(Box::new(SizeWriter));
        }
        let format = Self::format_of(directives);
        let factory = self
            .writers
            .get(format)
            .ok_or_else(|| anyhow!("no writer registered for format `{format}`"))?;
        factory(directives, session)
    }
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// Delimited text codec
// ============================================================================

fn filename_of(directives: &IoDirectives) -> Result<PathBuf> {
    directives
        .get("filename")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("io directive `filename` missing"))
}

fn delimiter_of(directives: &IoDirectives) -> String {
    directives.get("delimiter").cloned().unwrap_or_else(|| "\t".to_string())
}

pub struct DelimitedReader {
    filename: PathBuf,
    delimiter: String,
    session: IoSession,
}

impl DelimitedReader {
    fn from_directives(directives: &IoDirectives, session: &IoSession) -> Result<Self> {
        Ok(DelimitedReader {
            filename: filename_of(directives)?,
            delimiter: delimiter_of(directives),
            session: session.clone(),
        })
    }

    fn parse_column(&self, text: &str, tag: TypeTag) -> Result<Domain> {
        match tag {
            TypeTag::Signed => text
                .parse::<i64>()
                .with_context(|| format!("bad signed value `{text}`")),
            TypeTag::Unsigned => text
                .parse::<u64>()
                .map(stratal_ram::domain::from_unsigned)
                .with_context(|| format!("bad unsigned value `{text}`")),
            TypeTag::Float => text
                .parse::<f64>()
                .map(stratal_ram::domain::from_float)
                .with_context(|| format!("bad float value `{text}`")),
            TypeTag::Symbol => Ok(self.session.symbols.encode(text)),
            TypeTag::Record | TypeTag::Adt => {
                Err(anyhow!("record/ADT columns are not supported by the file codec"))
            }
        }
    }
}

impl Reader for DelimitedReader {
    fn read_into(&self, relation: &Relation) -> Result<()> {
        let decl = relation.decl();
        let file = File::open(&self.filename)
            .with_context(|| format!("cannot open {}", self.filename.display()))?;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            // Nullary relations record presence: any line is the one row.
            if decl.arity == 0 {
                relation.insert(&[]);
                continue;
            }
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(self.delimiter.as_str()).collect();
            if fields.len() != decl.arity {
                return Err(anyhow!(
                    "{}:{}: expected {} columns, found {}",
                    self.filename.display(),
                    lineno + 1,
                    decl.arity,
                    fields.len()
                ));
            }
            let mut row = Row::with_capacity(decl.arity);
            for (field, &tag) in fields.iter().zip(&decl.attribute_types) {
                row.push(self.parse_column(field, tag)?);
            }
            relation.insert(&row);
        }
        Ok(())
    }
}

pub struct DelimitedWriter {
    filename: PathBuf,
    delimiter: String,
    session: IoSession,
}

impl DelimitedWriter {
    fn from_directives(directives: &IoDirectives, session: &IoSession) -> Result<Self> {
        Ok(DelimitedWriter {
            filename: filename_of(directives)?,
            delimiter: delimiter_of(directives),
            session: session.clone(),
        })
    }

    fn render_column(&self, value: Domain, tag: TypeTag) -> String {
        match tag {
            TypeTag::Signed => value.to_string(),
            TypeTag::Unsigned => stratal_ram::domain::as_unsigned(value).to_string(),
            TypeTag::Float => stratal_ram::domain::as_float(value).to_string(),
            TypeTag::Symbol => self.session.symbols.decode(value),
            // Record references are written raw; decoding nested records
            // is a format of its own.
            TypeTag::Record | TypeTag::Adt => value.to_string(),
        }
    }
}

impl Writer for DelimitedWriter {
    fn write_all(&self, relation: &Relation) -> Result<()> {
        let decl = relation.decl();
        let file = File::create(&self.filename)
            .with_context(|| format!("cannot create {}", self.filename.display()))?;
        let mut out = BufWriter::new(file);
        for row in relation.scan() {
            let line: Vec<String> = row
                .iter()
                .zip(&decl.attribute_types)
                .map(|(&value, &tag)| self.render_column(value, tag))
                .collect();
            writeln!(out, "{}", line.join(&self.delimiter))?;
        }
        Ok(())
    }
}

/// `printsize`: one `name\tsize` line on standard output.
struct SizeWriter;

impl Writer for SizeWriter {
    fn write_all(&self, relation: &Relation) -> Result<()> {
        println!("{}\t{}", relation.name(), relation.len());
        Ok(())
    }
}
