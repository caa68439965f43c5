use crate::{
    document::Document,
    error::{EmptyBatchSnafu, Result},
};

/// An ordered, non-empty group of documents written as one unit of work.
#[derive(Debug, Clone)]
pub struct Batch {
    documents: Vec<Document>,
}

impl Batch {
    /// Creates a new batch, failing if `documents` is empty.
    pub fn new(documents: Vec<Document>) -> Result<Self> {
        if documents.is_empty() {
            return EmptyBatchSnafu {}.fail();
        }

        Ok(Self { documents })
    }

    /// Creates a batch from documents that are known to be non-empty.
    pub(crate) fn from_planned(documents: Vec<Document>) -> Self {
        debug_assert!(!documents.is_empty());
        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    /// Returns the sum of the documents' sizes.
    pub fn total_bytes(&self) -> u64 {
        self.documents.iter().map(Document::size_bytes).sum()
    }

    /// Splits the batch at `at`, returning the documents after it as a new batch.
    ///
    /// Returns `None` if there is nothing after `at`, or if `at` is zero.
    pub fn split_off(&mut self, at: usize) -> Option<Batch> {
        if at == 0 || at >= self.documents.len() {
            return None;
        }

        Some(Batch {
            documents: self.documents.split_off(at),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ImportError;

    fn doc(id: usize) -> Document {
        Document::new(id.to_string(), "p", json!({ "id": id }))
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let err = Batch::new(Vec::new()).unwrap_err();
        assert!(matches!(err, ImportError::EmptyBatch));
    }

    #[test]
    fn test_split_off() {
        let mut batch = Batch::new((0..5).map(doc).collect()).unwrap();

        let rest = batch.split_off(2).expect("remainder");
        assert_eq!(batch.len(), 2);
        assert_eq!(rest.len(), 3);
        assert_eq!(rest.documents()[0].id(), "2");

        assert!(batch.split_off(2).is_none());
        assert_eq!(batch.len(), 2);
    }
}
