use super::EventOutput;
use crate::error::AgentResult;
use crate::record::Record;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Writes a per-schema summary of each chunk to the log
#[derive(Debug, Default)]
pub struct ConsoleEventOutput;

impl ConsoleEventOutput {
    pub fn new() -> Self {
        Self
    }
}

/// Group records by schema: count and sorted distinct attribute keys
fn summarize(records: &[Record]) -> BTreeMap<&str, (usize, BTreeSet<&str>)> {
    let mut groups: BTreeMap<&str, (usize, BTreeSet<&str>)> = BTreeMap::new();
    for record in records {
        let entry = groups.entry(record.schema()).or_default();
        entry.0 += 1;
        entry.1.extend(record.data().keys().map(String::as_str));
    }
    groups
}

#[async_trait]
impl EventOutput for ConsoleEventOutput {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, records: &[Record], _token: &CancellationToken) -> AgentResult<bool> {
        for (schema, (count, keys)) in summarize(records) {
            let keys = keys.into_iter().collect::<Vec<_>>().join(",");
            info!(count, schema, keys = %keys, "Sending record group");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_groups_by_schema() {
        let records = vec![
            Record::new("A").with("x", 1i64),
            Record::new("B").with("y", 1i64),
            Record::new("A").with("z", 1i64),
        ];
        let groups = summarize(&records);

        let (count, keys) = &groups["A"];
        assert_eq!(*count, 2);
        assert_eq!(
            keys.iter().copied().collect::<Vec<_>>(),
            vec!["machine", "x", "z"]
        );
        assert_eq!(groups["B"].0, 1);
    }

    #[tokio::test]
    async fn test_console_always_succeeds() {
        let output = ConsoleEventOutput::new();
        let token = CancellationToken::new();
        assert!(output.send(&[], &token).await.unwrap());
        assert!(output
            .send(&[Record::new("A")], &token)
            .await
            .unwrap());
    }
}
