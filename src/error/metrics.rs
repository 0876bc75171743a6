use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Cannot merge {kind} aggregators with different configuration ({left} vs {right}).")]
    MergeMismatch {
        kind: &'static str,
        left: u64,
        right: u64,
    },
    #[error("Bucket is read-only and cannot accept further updates.")]
    ReadOnlyBucket,
    #[error("Cannot merge a bucket into itself.")]
    SelfMerge,
    #[error("Histogram error during {context}: {source}")]
    Histogram {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
