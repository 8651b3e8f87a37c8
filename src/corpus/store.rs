use super::{Corpus, CorpusError, CorpusId, Record};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Provenance tag stored next to every indexed vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryRef {
    pub corpus: CorpusId,
    pub local_position: usize,
}

impl EntryRef {
    pub fn new(corpus: CorpusId, local_position: usize) -> Self {
        Self {
            corpus,
            local_position,
        }
    }
}

/// Both reference corpora, in combined-index order
#[derive(Debug, Clone)]
pub struct RecordStore {
    diagnosis: Corpus,
    procedure: Corpus,
}

impl RecordStore {
    pub fn new(diagnosis: Corpus, procedure: Corpus) -> Result<Self, CorpusError> {
        if diagnosis.id() != CorpusId::Diagnosis {
            return Err(CorpusError::WrongCorpus {
                expected: CorpusId::Diagnosis,
                actual: diagnosis.id(),
            });
        }
        if procedure.id() != CorpusId::Procedure {
            return Err(CorpusError::WrongCorpus {
                expected: CorpusId::Procedure,
                actual: procedure.id(),
            });
        }
        Ok(Self {
            diagnosis,
            procedure,
        })
    }

    /// Convenience constructor from plain record lists
    pub fn from_records(diagnosis: Vec<Record>, procedure: Vec<Record>) -> Self {
        Self {
            diagnosis: Corpus::new(CorpusId::Diagnosis, diagnosis),
            procedure: Corpus::new(CorpusId::Procedure, procedure),
        }
    }

    /// Load both corpora from their CSV files
    pub fn load(diagnosis_path: &Path, procedure_path: &Path) -> Result<Self, CorpusError> {
        let diagnosis = Corpus::load_csv(CorpusId::Diagnosis, diagnosis_path)?;
        let procedure = Corpus::load_csv(CorpusId::Procedure, procedure_path)?;

        tracing::info!(
            "Record store loaded: {} diagnosis codes, {} procedure codes",
            diagnosis.len(),
            procedure.len()
        );

        Ok(Self {
            diagnosis,
            procedure,
        })
    }

    pub fn corpus(&self, id: CorpusId) -> &Corpus {
        match id {
            CorpusId::Diagnosis => &self.diagnosis,
            CorpusId::Procedure => &self.procedure,
        }
    }

    /// Size of the combined index space
    pub fn total_len(&self) -> usize {
        self.diagnosis.len() + self.procedure.len()
    }

    /// Number of diagnosis records, i.e. the first procedure position
    pub fn boundary(&self) -> usize {
        self.diagnosis.len()
    }

    /// Map a combined position onto its corpus using the current boundary
    pub fn entry_at(&self, combined_position: usize) -> Option<EntryRef> {
        let boundary = self.boundary();
        if combined_position < boundary {
            Some(EntryRef::new(CorpusId::Diagnosis, combined_position))
        } else if combined_position < self.total_len() {
            Some(EntryRef::new(
                CorpusId::Procedure,
                combined_position - boundary,
            ))
        } else {
            None
        }
    }

    /// Look up the record a provenance tag points to
    ///
    /// Returns `None` when the tag points past the end of its corpus, which
    /// means the corpus changed after the index was built.
    pub fn resolve(&self, entry: EntryRef) -> Option<&Record> {
        self.corpus(entry.corpus).get(entry.local_position)
    }

    /// Every record tagged with its provenance, in combined-index order
    pub fn entries(&self) -> impl Iterator<Item = (EntryRef, &Record)> {
        CorpusId::ALL.into_iter().flat_map(move |id| {
            self.corpus(id)
                .records()
                .iter()
                .enumerate()
                .map(move |(i, record)| (EntryRef::new(id, i), record))
        })
    }
}
