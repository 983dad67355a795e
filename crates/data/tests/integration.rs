//! Data-service client against a local canned HTTP responder, plus the
//! default range fetch of the `DataSource` trait.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use lendwatch_common::error::AppError;
use lendwatch_common::types::{
    Asset, BalanceSnapshot, LedgerEvent, LiquidationRecord, PriceObservation, ReserveConfig,
    ReserveIndexUpdate,
};
use lendwatch_data::{DataServiceClient, DataSource};

// ============================================================
// Shared helpers
// ============================================================

/// Serve `body` with `status` to every connection; record request lines.
async fn serve(status: u16, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 8192];
            let mut read = 0;
            while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf[read..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => read += n,
                }
            }
            let request = String::from_utf8_lossy(&buf[..read]).to_string();
            if let Some(line) = request.lines().next() {
                seen.lock().unwrap().push(line.to_string());
            }

            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), requests)
}

fn client(base_url: &str) -> DataServiceClient {
    DataServiceClient::new(base_url, Duration::from_secs(5)).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================
// HTTP client
// ============================================================

#[tokio::test]
async fn test_fetch_prices_sends_date_key() {
    let (url, requests) = serve(
        200,
        r#"[{"UnderlyingToken":"0xA","name":"A","BlockNumber":"100","Timestamp":1674777600,"Price":"100000000","decimals":6}]"#,
    )
    .await;

    let prices = client(&url).fetch_prices(date(2023, 1, 27)).await.unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].asset, Asset::new("0xa"));
    assert_eq!(prices[0].price_usd(), 1.0);

    let lines = requests.lock().unwrap().clone();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("GET /prices?date=2023-Jan-27"));
}

#[tokio::test]
async fn test_fetch_user_balances_passes_user() {
    let (url, requests) = serve(
        200,
        r#"[{"underlyingAsset":"0xA","user_address":"0xu","scaledATokenBalance":"1000","scaledVariableDebt":"5"}]"#,
    )
    .await;

    let snapshot = client(&url)
        .fetch_user_balance_snapshot("0xu", date(2023, 1, 26))
        .await
        .unwrap();
    assert_eq!(snapshot[0].scaled_a_token_balance, 1000);
    assert_eq!(snapshot[0].scaled_variable_debt, 5);

    let lines = requests.lock().unwrap().clone();
    assert!(lines[0].contains("/user-selec-balances?"));
    assert!(lines[0].contains("user=0xu"));
}

#[tokio::test]
async fn test_server_error_is_data_unavailable() {
    let (url, _) = serve(503, "[]").await;
    let err = client(&url)
        .fetch_reserve_configs(date(2023, 1, 27))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DataUnavailable(_)));
    assert!(err.is_data_unavailable());
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let (url, _) = serve(200, r#"{"not":"an array"}"#).await;
    let err = client(&url)
        .fetch_liquidation_events(date(2023, 1, 27))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Decode(_)));
    assert!(err.is_data_unavailable());
}

#[tokio::test]
async fn test_unreachable_service_is_data_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .fetch_prices(date(2023, 1, 27))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DataUnavailable(_)));
}

// ============================================================
// Default range fetch
// ============================================================

/// One tick per asset per day, served from memory.
struct DailyTicks {
    assets: Vec<&'static str>,
}

impl DataSource for DailyTicks {
    async fn fetch_prices(&self, day: NaiveDate) -> Result<Vec<PriceObservation>, AppError> {
        let timestamp = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
        Ok(self
            .assets
            .iter()
            .map(|a| PriceObservation {
                asset: Asset::new(a),
                name: a.to_string(),
                block_number: timestamp.timestamp() as u64,
                timestamp,
                price: 100_000_000,
                decimals: 0,
            })
            .collect())
    }

    async fn fetch_reserve_configs(&self, _: NaiveDate) -> Result<Vec<ReserveConfig>, AppError> {
        Ok(Vec::new())
    }

    async fn fetch_reserve_index_updates(
        &self,
        _: NaiveDate,
    ) -> Result<Vec<ReserveIndexUpdate>, AppError> {
        Ok(Vec::new())
    }

    async fn fetch_user_balance_snapshot(
        &self,
        _: &str,
        _: NaiveDate,
    ) -> Result<Vec<BalanceSnapshot>, AppError> {
        Ok(Vec::new())
    }

    async fn fetch_user_events(&self, _: &str, _: NaiveDate) -> Result<Vec<LedgerEvent>, AppError> {
        Ok(Vec::new())
    }

    async fn fetch_liquidation_events(
        &self,
        _: NaiveDate,
    ) -> Result<Vec<LiquidationRecord>, AppError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_daily_prices_cover_inclusive_range() {
    let source = DailyTicks {
        assets: vec!["0xa", "0xb"],
    };
    let prices = source
        .fetch_daily_prices(&[], date(2023, 1, 1), date(2023, 1, 3))
        .await
        .unwrap();
    assert_eq!(prices.len(), 6);

    let only_a = source
        .fetch_daily_prices(&[Asset::new("0xA")], date(2023, 1, 1), date(2023, 1, 3))
        .await
        .unwrap();
    assert_eq!(only_a.len(), 3);
    assert!(only_a.iter().all(|p| p.asset.as_str() == "0xa"));

    let empty = source
        .fetch_daily_prices(&[], date(2023, 1, 3), date(2023, 1, 1))
        .await
        .unwrap();
    assert!(empty.is_empty());
}
