use serde_json::{Map, Value};

use crate::extract::{ExtractionError, ExtractionResult};
use crate::schema::ExtractionRule;

pub type RowTuple = Map<String, Value>;

/// What to do with a document whose fields matched different numbers of nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnevenPolicy {
    #[default]
    Fail,
    Skip,
}

impl UnevenPolicy {
    #[must_use]
    pub const fn from_skip(skip: bool) -> Self {
        if skip {
            Self::Skip
        } else {
            Self::Fail
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Sequence(Vec<Value>),
    /// Broadcast to every row.
    Repeat(Value),
}

/// Per-field extraction results for one document, keyed in rule order.
#[derive(Debug, Default)]
pub struct Output {
    fields: Vec<(String, FieldValues)>,
    size: Option<usize>,
    hidden: Vec<String>,
}

impl Output {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field. The first sequence fixes the tuple size; any later
    /// sequence of another length is rejected.
    pub fn insert(&mut self, name: &str, values: FieldValues, hidden: bool) -> ExtractionResult<()> {
        if let FieldValues::Sequence(seq) = &values {
            match self.size {
                Some(expected) if expected != seq.len() => {
                    return Err(ExtractionError::UnevenSize {
                        field: name.to_string(),
                        expected,
                        actual: seq.len(),
                    });
                }
                Some(_) => {}
                None => self.size = Some(seq.len()),
            }
        }

        if hidden {
            self.hidden.push(name.to_string());
        }
        self.fields.push((name.to_string(), values));
        Ok(())
    }

    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        self.size
    }

    #[must_use]
    pub fn hidden_keys(&self) -> &[String] {
        &self.hidden
    }

    pub fn into_aligned(self) -> ExtractionResult<Aligned> {
        let size = self.size.ok_or(ExtractionError::NoTupleSize)?;

        let mut rows: Vec<RowTuple> = (0..size).map(|_| Map::new()).collect();
        for (name, values) in self.fields {
            match values {
                FieldValues::Sequence(seq) => {
                    for (row, value) in rows.iter_mut().zip(seq) {
                        row.insert(name.clone(), value);
                    }
                }
                FieldValues::Repeat(value) => {
                    for row in &mut rows {
                        row.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        Ok(Aligned {
            rows,
            hidden: self.hidden,
            skipped: false,
        })
    }
}

/// Row tuples of one document plus the names of fields kept out of payloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aligned {
    pub rows: Vec<RowTuple>,
    pub hidden: Vec<String>,
    /// Set when the document was dropped under [`UnevenPolicy::Skip`].
    pub skipped: bool,
}

impl Aligned {
    #[must_use]
    pub fn single(row: RowTuple) -> Self {
        Self {
            rows: vec![row],
            hidden: Vec::new(),
            skipped: false,
        }
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Resolves every rule once, in order, and zips the results into rows.
pub fn align<F>(rules: &[ExtractionRule], policy: UnevenPolicy, mut resolve: F) -> ExtractionResult<Aligned>
where
    F: FnMut(&ExtractionRule) -> ExtractionResult<Vec<Value>>,
{
    let mut output = Output::new();

    for rule in rules {
        let values = resolve(rule)?;
        let field = if rule.repeat {
            FieldValues::Repeat(values.into_iter().next().unwrap_or(Value::Null))
        } else {
            FieldValues::Sequence(values)
        };

        match output.insert(&rule.name, field, rule.hidden) {
            Ok(()) => {}
            Err(ExtractionError::UnevenSize {
                field,
                expected,
                actual,
            }) if policy == UnevenPolicy::Skip => {
                tracing::warn!(field = %field, expected, actual, "Skipping document with uneven matches");
                return Ok(Aligned::skipped());
            }
            Err(e) => return Err(e),
        }
    }

    output.into_aligned()
}
