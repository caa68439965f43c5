use serde_json::json;

use crate::document::Document;

/// Creates a document whose serialized size is exactly `size` bytes.
///
/// The body is `{"p":"xxx..."}`, so `size` must be at least 8.
pub fn document_of_size(i: usize, partition_key: &str, size: u64) -> Document {
    let padding = "x".repeat(size.saturating_sub(8) as usize);
    Document::new(i.to_string(), partition_key, json!({ "p": padding }))
}

/// Creates `n` documents of `size` bytes, cycling over `partitions` keys.
pub fn interleaved_documents(n: usize, partitions: usize, size: u64) -> Vec<Document> {
    (0..n)
        .map(|i| document_of_size(i, &format!("p{}", i % partitions.max(1)), size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_of_size() {
        for size in [8, 9, 100, 22_000] {
            assert_eq!(document_of_size(0, "p0", size).size_bytes(), size);
        }
    }
}
