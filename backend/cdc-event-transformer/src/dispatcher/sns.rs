//! Amazon SNS implementation of [`BatchPublisher`]

use super::{BatchPublisher, EntryOutcome, PublishEntry, PublishError, STRING_DATA_TYPE};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns::types::{MessageAttributeValue, PublishBatchRequestEntry};
use aws_sdk_sns::Client as SnsClient;
use tracing::{debug, info, warn};

/// Publishes entries to an SNS topic through `PublishBatch`.
///
/// Entry ids sent to SNS are the entry positions within the call, so results
/// map back to entries without any lookup table.
#[derive(Clone)]
pub struct SnsBatchPublisher {
    client: SnsClient,
}

impl SnsBatchPublisher {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }

    /// Create a publisher with default AWS configuration
    ///
    /// Region and credentials resolve from the environment, the shared config
    /// files or the execution role.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        info!(region = ?config.region(), "AWS SNS client initialized");
        Self::new(SnsClient::new(&config))
    }

    /// Verify that the topic is reachable with the current credentials
    pub async fn health_check(&self, topic: &str) -> Result<(), PublishError> {
        self.client
            .get_topic_attributes()
            .topic_arn(topic)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        debug!(topic = %topic, "SNS topic reachable");
        Ok(())
    }

    fn build_entry(
        index: usize,
        entry: &PublishEntry,
    ) -> Result<PublishBatchRequestEntry, PublishError> {
        let mut builder = PublishBatchRequestEntry::builder()
            .id(index.to_string())
            .message(&entry.body);

        for (name, value) in &entry.attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type(STRING_DATA_TYPE)
                .string_value(value)
                .build()
                .map_err(|e| {
                    PublishError::Build(format!("Failed to build attribute {}: {}", name, e))
                })?;
            builder = builder.message_attributes(name, attribute);
        }

        builder.build().map_err(|e| {
            PublishError::Build(format!(
                "Failed to build entry for event {}: {}",
                entry.event_id, e
            ))
        })
    }
}

fn parse_entry_id(id: &str) -> Option<usize> {
    id.parse().ok()
}

#[async_trait]
impl BatchPublisher for SnsBatchPublisher {
    async fn publish_batch(
        &self,
        topic: &str,
        entries: &[PublishEntry],
    ) -> Result<Vec<(usize, EntryOutcome)>, PublishError> {
        let request_entries = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| Self::build_entry(index, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .publish_batch()
            .topic_arn(topic)
            .set_publish_batch_request_entries(Some(request_entries))
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let mut outcomes = Vec::with_capacity(entries.len());

        for accepted in output.successful() {
            match accepted.id().and_then(parse_entry_id) {
                Some(index) => outcomes.push((
                    index,
                    EntryOutcome::Accepted {
                        message_id: accepted.message_id().map(str::to_string),
                    },
                )),
                None => warn!(id = ?accepted.id(), "SNS acknowledged an unknown entry id"),
            }
        }

        for failed in output.failed() {
            match parse_entry_id(failed.id()) {
                Some(index) => outcomes.push((
                    index,
                    EntryOutcome::Rejected {
                        code: failed.code().to_string(),
                        message: failed.message().map(str::to_string),
                        sender_fault: failed.sender_fault(),
                    },
                )),
                None => warn!(id = %failed.id(), "SNS rejected an unknown entry id"),
            }
        }

        debug!(
            topic = %topic,
            successful = output.successful().len(),
            failed = output.failed().len(),
            "SNS PublishBatch completed"
        );

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PublishEntry {
        PublishEntry {
            event_id: "evt-1".to_string(),
            event_type: "OrderCreated".to_string(),
            body: r#"{"type":"OrderCreated"}"#.to_string(),
            attributes: vec![
                ("event_type".to_string(), "OrderCreated".to_string()),
                ("event_source".to_string(), "/order/42".to_string()),
            ],
        }
    }

    #[test]
    fn test_build_entry_populates_request() {
        let request = SnsBatchPublisher::build_entry(3, &entry()).unwrap();

        assert_eq!(request.id(), "3");
        assert_eq!(request.message(), r#"{"type":"OrderCreated"}"#);

        let attributes = request.message_attributes().unwrap();
        assert_eq!(attributes.len(), 2);
        let event_type = &attributes["event_type"];
        assert_eq!(event_type.data_type(), "String");
        assert_eq!(event_type.string_value(), Some("OrderCreated"));
        assert_eq!(attributes["event_source"].string_value(), Some("/order/42"));
    }

    #[test]
    fn test_parse_entry_id() {
        assert_eq!(parse_entry_id("0"), Some(0));
        assert_eq!(parse_entry_id("9"), Some(9));
        assert_eq!(parse_entry_id("evt-1"), None);
    }
}
