use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::{ConfidenceTier, Direction, Signal};
use crate::recovery::BotError;

/// Client for the external signal producer
///
/// The producer is advisory only; every recommendation still has to clear
/// the risk gates before any order is placed.
#[derive(Clone)]
pub struct SignalClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalRaw {
    direction: String,
    confidence: String,
    target_price: Option<f64>,
}

impl SignalClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Latest recommendation for a symbol
    /// Endpoint: GET /signals/latest?symbol={symbol}
    pub async fn fetch_latest(&self, symbol: &str) -> Result<Signal, BotError> {
        let url = format!("{}/signals/latest?symbol={}", self.base_url, symbol);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(BotError::Api {
                status: response.status().as_u16(),
                message: format!("signal fetch failed for {symbol}"),
            });
        }

        let raw: SignalRaw = response.json().await?;
        let direction = match raw.direction.as_str() {
            "long" => Direction::Long,
            "short" => Direction::Short,
            "hold" => Direction::Hold,
            other => {
                return Err(BotError::Data(format!("unknown signal direction: {other}")))
            }
        };
        let confidence = match raw.confidence.as_str() {
            "low" => ConfidenceTier::Low,
            "medium" => ConfidenceTier::Medium,
            "high" => ConfidenceTier::High,
            other => {
                return Err(BotError::Data(format!(
                    "unknown signal confidence: {other}"
                )))
            }
        };

        Ok(Signal {
            direction,
            confidence,
            target_price: raw.target_price,
            timestamp: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::ErrorKind;

    #[tokio::test]
    async fn test_fetch_latest_parses_signal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/signals/latest")
            .match_query(mockito::Matcher::UrlEncoded(
                "symbol".into(),
                "BTCUSDT".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"direction": "short", "confidence": "high", "targetPrice": 48000.0}"#)
            .create_async()
            .await;

        let client = SignalClient::new(&server.url());
        let signal = client.fetch_latest("BTCUSDT").await.unwrap();

        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.confidence, ConfidenceTier::High);
        assert_eq!(signal.target_price, Some(48000.0));
    }

    #[tokio::test]
    async fn test_unknown_direction_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/signals/latest")
            .match_query(mockito::Matcher::UrlEncoded(
                "symbol".into(),
                "BTCUSDT".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"direction": "sideways", "confidence": "high"}"#)
            .create_async()
            .await;

        let client = SignalClient::new(&server.url());
        let err = client.fetch_latest("BTCUSDT").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }
}
