use sluice_observability::{Counter, Histogram};

pub struct ImportMetrics {
    pub documents_written: Counter<u64>,
    pub request_cost: Counter<f64>,
    pub batches_failed: Counter<u64>,
    pub rejections: Counter<u64>,
    pub batch_duration: Histogram<f64>,
}

impl Default for ImportMetrics {
    fn default() -> Self {
        let meter = sluice_observability::meter("import");
        Self {
            documents_written: meter
                .u64_counter("import.documents.written")
                .with_unit("{document}")
                .with_description("number of documents written to the store")
                .build(),
            request_cost: meter
                .f64_counter("import.request.cost")
                .with_unit("{rcu}")
                .with_description("request cost units charged by the store")
                .build(),
            batches_failed: meter
                .u64_counter("import.batches.failed")
                .with_unit("{batch}")
                .with_description("number of batches that exhausted their attempts")
                .build(),
            rejections: meter
                .u64_counter("import.rejections")
                .with_unit("{request}")
                .with_description("number of writes rejected by admission control")
                .build(),
            batch_duration: meter
                .f64_histogram("import.batch.duration")
                .with_unit("s")
                .with_description("time to write a batch, including retries")
                .build(),
        }
    }
}
