//! AWS Lambda invoker
//!
//! Uses asynchronous (`Event`) invocation: Lambda queues the event and answers
//! 202 without waiting for the function to run.

use crate::invoker::{IngestInvoker, InvocationAck, InvocationError, InvocationRequest};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_lambda::error::{DisplayErrorContext, SdkError};
use aws_sdk_lambda::operation::RequestId;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_lambda::Client;
use tracing::{debug, instrument};

/// Status code Lambda returns for an accepted `Event` invocation.
const ACCEPTED_STATUS: i32 = 202;

#[derive(Clone)]
pub struct LambdaInvoker {
    client: Client,
    function_name: String,
}

impl LambdaInvoker {
    pub fn new(client: Client, function_name: impl Into<String>) -> Self {
        Self {
            client,
            function_name: function_name.into(),
        }
    }

    /// Build a client from the ambient AWS configuration (env, profile, role).
    pub async fn from_env(function_name: impl Into<String>) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(Client::new(&shared), function_name)
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }
}

#[async_trait]
impl IngestInvoker for LambdaInvoker {
    #[instrument(skip(self, request), fields(function = %self.function_name, feed_id = %request.feed_id))]
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationAck, InvocationError> {
        let payload = request
            .payload()
            .map_err(|e| InvocationError::Rejected(format!("payload could not be encoded: {e}")))?;

        let output = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(sdk_failure)?;

        let ack = acknowledge(output.status_code(), output.function_error(), output.request_id())?;
        debug!(invocation_id = ?ack.invocation_id, "Invocation accepted");

        Ok(ack)
    }
}

/// Only a 202 without a function error counts as accepted.
fn acknowledge(
    status: i32,
    function_error: Option<&str>,
    request_id: Option<&str>,
) -> Result<InvocationAck, InvocationError> {
    if let Some(function_error) = function_error {
        return Err(InvocationError::Rejected(format!("function error: {function_error}")));
    }
    if status != ACCEPTED_STATUS {
        return Err(InvocationError::Rejected(format!("unexpected status {status}")));
    }
    Ok(InvocationAck {
        invocation_id: request_id.map(str::to_string),
    })
}

/// Lambda answering with an error is a rejection; anything short of an answer is transport.
fn sdk_failure<E, R>(e: SdkError<E, R>) -> InvocationError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&e).to_string();
    match e {
        SdkError::ServiceError(_) => InvocationError::Rejected(detail),
        _ => InvocationError::Transport(detail),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("TooManyRequestsException: Rate exceeded")]
    struct Throttled;

    #[test]
    fn test_accepted_event_carries_request_id() {
        let ack = acknowledge(202, None, Some("6bc28136-a1b2")).unwrap();
        assert_eq!(ack.invocation_id.as_deref(), Some("6bc28136-a1b2"));

        let ack = acknowledge(202, None, None).unwrap();
        assert_eq!(ack.invocation_id, None);
    }

    #[test]
    fn test_function_error_is_rejected() {
        let err = acknowledge(202, Some("Unhandled"), Some("req-1")).unwrap_err();
        assert!(matches!(&err, InvocationError::Rejected(msg) if msg.contains("Unhandled")));
    }

    #[test]
    fn test_other_status_is_rejected() {
        for status in [200, 204, 400, 500] {
            let err = acknowledge(status, None, Some("req-1")).unwrap_err();
            assert!(
                matches!(&err, InvocationError::Rejected(msg) if msg.contains(&status.to_string())),
                "status {status} should be rejected"
            );
        }
    }

    #[test]
    fn test_service_error_is_rejected() {
        let err = sdk_failure(SdkError::<Throttled, ()>::service_error(Throttled, ()));
        assert!(matches!(&err, InvocationError::Rejected(msg) if msg.contains("Rate exceeded")));
    }

    #[test]
    fn test_failures_before_an_answer_are_transport() {
        let err = sdk_failure(SdkError::<Throttled, ()>::timeout_error("connect timed out"));
        assert!(matches!(err, InvocationError::Transport(_)));

        let err = sdk_failure(SdkError::<Throttled, ()>::construction_failure("no region"));
        assert!(matches!(err, InvocationError::Transport(_)));
    }
}
