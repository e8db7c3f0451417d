use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::{ExchangeClient, OrderRequest, OrderState};

/// Correction the engine must apply on its next cycle
#[derive(Debug, Clone)]
pub enum CorrectionAction {
    /// Order sat unfilled past the timeout and was cancelled; the engine
    /// re-submits the remainder at market on its next cycle
    CancelAndResubmit {
        order_id: String,
        request: OrderRequest,
    },
    /// Order filled while we watched; no position adjustment needed
    Confirmed { order_id: String },
}

/// Watch a submitted order and push a correction when it times out
///
/// The watcher never mutates engine state itself; it reports through the
/// correction queue and the engine applies the result single-threaded.
pub fn spawn_order_watcher(
    client: ExchangeClient,
    order_id: String,
    request: OrderRequest,
    timeout: Duration,
    corrections: mpsc::UnboundedSender<CorrectionAction>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;

        let status = match client.order_status(&order_id).await {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(order_id, %error, "order status check failed, forcing cancel");
                OrderState::Open
            }
        };

        match status {
            OrderState::Filled => {
                let _ = corrections.send(CorrectionAction::Confirmed { order_id });
            }
            OrderState::Cancelled | OrderState::Rejected => {
                tracing::info!(order_id, ?status, "order already terminal");
            }
            OrderState::Open => {
                tracing::warn!(
                    order_id,
                    timeout_secs = timeout.as_secs(),
                    "order unfilled past timeout, cancelling"
                );
                if let Err(error) = client.cancel_order(&order_id).await {
                    tracing::error!(order_id, %error, "cancel failed, order may still fill");
                    return;
                }
                let _ = corrections.send(CorrectionAction::CancelAndResubmit { order_id, request });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::OrderType;
    use crate::models::PositionSide;

    fn request() -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Short,
            order_type: OrderType::Limit,
            size: 1000.0,
            leverage: 3.0,
            stop_price: 51000.0,
            target_price: 48000.0,
        }
    }

    #[tokio::test]
    async fn test_unfilled_order_cancelled_and_queued() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/orders/ord-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"orderId": "ord-1", "status": "open"}"#)
            .create_async()
            .await;
        let cancel = server
            .mock("DELETE", "/api/v1/orders/ord-1")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = ExchangeClient::new(&server.url(), "test-key");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_order_watcher(
            client,
            "ord-1".to_string(),
            request(),
            Duration::from_millis(10),
            tx,
        );
        handle.await.unwrap();

        match rx.try_recv().unwrap() {
            CorrectionAction::CancelAndResubmit { order_id, request } => {
                assert_eq!(order_id, "ord-1");
                assert_eq!(request.symbol, "BTCUSDT");
            }
            other => panic!("expected cancel-and-resubmit, got {:?}", other),
        }
        cancel.assert_async().await;
    }

    #[tokio::test]
    async fn test_filled_order_confirmed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/orders/ord-2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"orderId": "ord-2", "status": "filled"}"#)
            .create_async()
            .await;

        let client = ExchangeClient::new(&server.url(), "test-key");
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_order_watcher(
            client,
            "ord-2".to_string(),
            request(),
            Duration::from_millis(10),
            tx,
        )
        .await
        .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            CorrectionAction::Confirmed { .. }
        ));
    }

    #[tokio::test]
    async fn test_terminal_order_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/orders/ord-3")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"orderId": "ord-3", "status": "cancelled"}"#)
            .create_async()
            .await;

        let client = ExchangeClient::new(&server.url(), "test-key");
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_order_watcher(
            client,
            "ord-3".to_string(),
            request(),
            Duration::from_millis(10),
            tx,
        )
        .await
        .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
