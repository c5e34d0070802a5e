// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-shot delivery to a destination topic.
//!
//! Opens a connection, binds a sender, sends one message and closes both.
//! No retries here; the caller wraps this in a [`RetryPolicy`].
//!
//! Handles are boxed values, so an early return or a dropped future
//! releases them through `Drop` even when `close` never runs.
//!
//! [`RetryPolicy`]: crate::resilience::RetryPolicy

use crate::broker::DestinationConnector;
use crate::error::TransportResult;
use crate::message::ReplicatedMessage;
use crate::sanitize::sanitize_log_message;
use tracing::debug;

/// Send `message` to `destination` over a freshly scoped connection.
///
/// The send result wins over close failures; a close error after a
/// successful send is logged and ignored.
pub async fn send_message_to_destination<C>(
    connector: &C,
    destination: &str,
    message: ReplicatedMessage,
) -> TransportResult<()>
where
    C: DestinationConnector + ?Sized,
{
    let mut connection = connector.connect().await?;

    let mut sender = match connection.sender(destination).await {
        Ok(sender) => sender,
        Err(e) => {
            let _ = connection.close().await;
            return Err(e);
        }
    };

    let message_id = message.message_id.clone();
    let sent = sender.send(message).await;

    if let Err(e) = sender.close().await {
        debug!(destination, error = %sanitize_log_message(&e.to_string()), "Sender close failed");
    }
    drop(sender);
    if let Err(e) = connection.close().await {
        debug!(destination, error = %sanitize_log_message(&e.to_string()), "Connection close failed");
    }

    if sent.is_ok() {
        debug!(destination, message_id = %message_id, "Message sent");
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, TransportErrorKind};
    use crate::memory::InMemoryNamespace;
    use crate::message::SourceMessage;
    use crate::transform::create_replicated_message;
    use std::time::Duration;

    fn replica() -> ReplicatedMessage {
        let source = SourceMessage::new("body").with_message_id("m-1");
        create_replicated_message(&source, "corr-1", Some(60)).unwrap()
    }

    #[tokio::test]
    async fn test_send_success_releases_handles() {
        let ns = InMemoryNamespace::new("secondary");
        ns.create_subscription("orders", "audit");

        send_message_to_destination(&ns, "orders", replica()).await.unwrap();

        assert_eq!(ns.sent_to("orders").len(), 1);
        assert_eq!(ns.pending("orders", "audit"), 1);
        assert_eq!(ns.open_handles().total(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_releases_handles() {
        let ns = InMemoryNamespace::new("secondary");
        ns.create_topic("orders");
        ns.fail_next_sends(TransportError::service_request("timeout"), 1);

        let err = send_message_to_destination(&ns, "orders", replica())
            .await
            .unwrap_err();

        assert_eq!(err.kind, TransportErrorKind::ServiceRequest);
        assert_eq!(ns.open_handles().total(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let ns = InMemoryNamespace::new("secondary");
        ns.fail_next_connects(TransportError::authentication("bad key"), 1);

        let err = send_message_to_destination(&ns, "orders", replica())
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Authentication);
        assert_eq!(ns.open_handles().total(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_send_releases_handles() {
        let ns = InMemoryNamespace::new("secondary");
        ns.create_topic("orders");
        ns.set_send_delay(Some(Duration::from_secs(60)));

        let fut = send_message_to_destination(&ns, "orders", replica());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), fut).await;

        assert!(timed_out.is_err());
        assert_eq!(ns.open_handles().total(), 0);
        assert!(ns.sent_to("orders").is_empty());
    }
}
