use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Args, ValueEnum};
use sluice_import_core::{ImportOptions, ShrinkPolicy};
use snafu::ResultExt;

use crate::error::{ImportSnafu, IoSnafu, JsonParseSnafu, Result};

/// Import configuration.
///
/// Options are read from the configuration file first, then overridden by the
/// flags that are set.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a JSON configuration file.
    #[arg(long, env = "SLUICE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Number of documents planned together.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Maximum number of batches written concurrently.
    #[arg(long)]
    pub max_concurrent_batches: Option<usize>,
    /// Minimum interval between two batch dispatches, in milliseconds.
    #[arg(long)]
    pub min_time_between_batches_ms: Option<u64>,
    /// Maximum number of attempts to write a batch.
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Number of documents sent by attempts after the third.
    #[arg(long)]
    pub smaller_batch_size: Option<usize>,
    /// Maximum size of a batch (e.g. 2MB).
    #[arg(long)]
    pub max_batch_bytes: Option<ByteSize>,
    /// Maximum number of documents in a batch.
    #[arg(long)]
    pub max_batch_count: Option<usize>,
    /// Trailing batches smaller than this are merged into the previous batch.
    #[arg(long)]
    pub min_batch_size_for_merge: Option<usize>,
    /// Provisioned throughput in RCU per second. Read from the store if missing.
    #[arg(long)]
    pub ru_capacity: Option<u64>,
    /// Minimum interval between two writes to the same partition, in milliseconds.
    #[arg(long)]
    pub partition_cooldown_ms: Option<u64>,
    /// What to do with the documents left out of a shrunk attempt.
    #[arg(long, value_enum)]
    pub shrink_policy: Option<ShrinkPolicyArg>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum ShrinkPolicyArg {
    Requeue,
    Drop,
}

impl ConfigArgs {
    /// Loads and validates the import options.
    pub async fn load(&self) -> Result<ImportOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .context(IoSnafu { path: path.clone() })?;
                serde_json::from_str(&content).context(JsonParseSnafu { path: path.clone() })?
            }
            None => ImportOptions::default(),
        };

        self.apply(&mut options);
        options.validate().context(ImportSnafu {})?;

        Ok(options)
    }

    fn apply(&self, options: &mut ImportOptions) {
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if let Some(max_concurrent_batches) = self.max_concurrent_batches {
            options.max_concurrent_batches = max_concurrent_batches;
        }
        if let Some(ms) = self.min_time_between_batches_ms {
            options.min_time_between_batches_ms = ms;
        }
        if let Some(max_attempts) = self.max_attempts {
            options.max_attempts = max_attempts;
        }
        if let Some(smaller_batch_size) = self.smaller_batch_size {
            options.smaller_batch_size = smaller_batch_size;
        }
        if let Some(max_batch_bytes) = self.max_batch_bytes {
            options.max_batch_bytes = max_batch_bytes.as_u64();
        }
        if let Some(max_batch_count) = self.max_batch_count {
            options.max_batch_count = max_batch_count;
        }
        if let Some(min_batch_size_for_merge) = self.min_batch_size_for_merge {
            options.min_batch_size_for_merge = min_batch_size_for_merge;
        }
        if let Some(ru_capacity) = self.ru_capacity {
            options.ru_capacity = Some(ru_capacity);
        }
        if let Some(ms) = self.partition_cooldown_ms {
            options.partition_cooldown_ms = ms;
        }
        if let Some(policy) = self.shrink_policy {
            options.shrink_policy = policy.into();
        }
    }
}

impl From<ShrinkPolicyArg> for ShrinkPolicy {
    fn from(value: ShrinkPolicyArg) -> Self {
        match value {
            ShrinkPolicyArg::Requeue => ShrinkPolicy::Requeue,
            ShrinkPolicyArg::Drop => ShrinkPolicy::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::CliError;

    #[tokio::test]
    async fn test_defaults_without_file() {
        let options = ConfigArgs::default().load().await.unwrap();
        assert_eq!(options, ImportOptions::default());
    }

    #[tokio::test]
    async fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "batchSize": 200, "maxAttempts": 6, "ruCapacity": 10000 }}"#
        )
        .unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            max_attempts: Some(4),
            max_batch_bytes: Some(ByteSize::kb(500)),
            shrink_policy: Some(ShrinkPolicyArg::Drop),
            ..Default::default()
        };
        let options = args.load().await.unwrap();

        assert_eq!(options.batch_size, 200);
        assert_eq!(options.max_attempts, 4);
        assert_eq!(options.max_batch_bytes, 500_000);
        assert_eq!(options.ru_capacity, Some(10_000));
        assert_eq!(options.shrink_policy, ShrinkPolicy::Drop);
    }

    #[tokio::test]
    async fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let err = args.load().await.unwrap_err();
        assert!(matches!(err, CliError::JsonParse { .. }));
    }

    #[tokio::test]
    async fn test_invalid_options() {
        let args = ConfigArgs {
            max_concurrent_batches: Some(0),
            ..Default::default()
        };
        let err = args.load().await.unwrap_err();
        assert!(matches!(err, CliError::Import { .. }));
    }
}
