//! Route planning message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::planning::{PlanningError, RoutePlanner};
use crate::types::{ErrorResponse, PlanRequest, RefineRequest, Request, SuccessResponse};

/// Map a planning failure onto the reply envelope
pub fn planning_error_response(request_id: Uuid, err: &PlanningError) -> ErrorResponse {
    let response = ErrorResponse::new(request_id, err.code(), err.to_string());
    if err.is_retryable() {
        response.with_details(json!({ "retryable": true }))
    } else {
        response
    }
}

/// Parse the envelope or answer INVALID_REQUEST. `None` means the message
/// has been dealt with.
async fn parse_request<T: DeserializeOwned>(
    client: &Client,
    reply: &async_nats::Subject,
    payload: &[u8],
) -> Result<Option<Request<T>>> {
    match serde_json::from_slice(payload) {
        Ok(request) => Ok(Some(request)),
        Err(e) => {
            error!("Failed to parse request: {}", e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            let _ = client.publish(reply.clone(), serde_json::to_vec(&error)?.into()).await;
            Ok(None)
        }
    }
}

async fn send_result<T: Serialize>(
    client: &Client,
    reply: async_nats::Subject,
    request_id: Uuid,
    result: Result<T, PlanningError>,
) -> Result<()> {
    let bytes = match result {
        Ok(payload) => serde_json::to_vec(&SuccessResponse::new(request_id, payload))?,
        Err(e) => serde_json::to_vec(&planning_error_response(request_id, &e))?,
    };
    let _ = client.publish(reply, bytes.into()).await;
    Ok(())
}

/// Handle route.optimize messages
///
/// Plans the day and, when `refineWithTraffic` is set, re-times it against
/// live traffic.
pub async fn handle_optimize(
    client: Client,
    mut subscriber: Subscriber,
    planner: Arc<RoutePlanner>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received route.optimize message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some(request) = parse_request::<PlanRequest>(&client, &reply, &msg.payload).await? else {
            continue;
        };

        let request_id = request.id;
        let result = planner.optimize(request.payload).await;
        match &result {
            Ok(refined) => info!(
                "Request {}: {} stops in {} legs, {} m, {} s, traffic delay {} s",
                request_id,
                refined.plan.stops.len(),
                refined.plan.routes.len(),
                refined.plan.total_distance_meters,
                refined.plan.total_duration_seconds,
                refined.traffic_delay_seconds
            ),
            Err(e) => warn!("Request {} failed: {}", request_id, e),
        }

        send_result(&client, reply, request_id, result).await?;
    }

    Ok(())
}

/// Handle route.refine messages
pub async fn handle_refine(
    client: Client,
    mut subscriber: Subscriber,
    planner: Arc<RoutePlanner>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received route.refine message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let Some(request) = parse_request::<RefineRequest>(&client, &reply, &msg.payload).await? else {
            continue;
        };

        let request_id = request.id;
        let result = planner.refine(request.payload).await;
        if let Err(e) = &result {
            warn!("Refine request {} failed: {}", request_id, e);
        }

        send_result(&client, reply, request_id, result).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_reply_is_retryable() {
        let err = PlanningError::Timeout { stage: "plan", after: Duration::from_secs(30) };
        let response = planning_error_response(Uuid::nil(), &err);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["error"]["code"], "TIMEOUT");
        assert_eq!(json["error"]["details"]["retryable"], true);
    }

    #[test]
    fn test_invalid_input_reply_has_no_details() {
        let err = PlanningError::invalid("no stops");
        let response = planning_error_response(Uuid::nil(), &err);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["error"]["code"], "INVALID_INPUT");
        assert!(json["error"]["message"].as_str().unwrap().contains("no stops"));
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn test_external_failure_reply_is_retryable() {
        let err = PlanningError::external("matrix", anyhow::anyhow!("connection refused"));
        let json = serde_json::to_value(planning_error_response(Uuid::nil(), &err)).unwrap();

        assert_eq!(json["error"]["code"], "EXTERNAL_SERVICE_ERROR");
        assert_eq!(json["error"]["details"]["retryable"], true);
    }
}
