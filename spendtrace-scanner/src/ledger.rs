use crate::error::{Result, ScanError};
use crate::model::{Outspends, TransactionDetails, TxOutput, is_valid_txid};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://mempool.space/api";
pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// The remote ledger the crawl walks. One attempt per call; a failure is final.
pub trait Ledger: Send + Sync + 'static {
    /// Outputs of `txid`.
    fn fetch_transaction(
        &self,
        txid: &str,
    ) -> impl Future<Output = Result<TransactionDetails>> + Send;

    /// Per-output spender of `txid`.
    fn fetch_outspends(&self, txid: &str) -> impl Future<Output = Result<Outspends>> + Send;
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    vout: Vec<VoutResponse>,
}

#[derive(Debug, Deserialize)]
struct VoutResponse {
    #[serde(default)]
    value: u64,
    #[serde(default)]
    scriptpubkey_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutspendResponse {
    #[serde(default)]
    spent: bool,
    #[serde(default)]
    txid: Option<String>,
}

/// Esplora-style REST client (mempool.space, blockstream.info, self-hosted electrs).
///
/// Every call is followed by a fixed pause, whether it succeeded or not, so a
/// pool of workers sharing one client stays under the service's rate limit.
#[derive(Debug, Clone)]
pub struct MempoolClient {
    client: Client,
    base_url: String,
    delay: Duration,
}

impl MempoolClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScanError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                base_url,
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .user_agent("spendtrace/0.1 (https://github.com/trapdoorsec/spendtrace)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            delay: DEFAULT_DELAY,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let outcome = self.request(&url).await;
        if let Err(ref e) = outcome {
            warn!("Ledger call failed for {}: {}", url, e);
        }
        // The pause applies to failures too.
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome
    }

    async fn request<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("Fetching {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::StatusError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ScanError::ParseError(format!("{}: {}", url, e)))
    }
}

impl Ledger for MempoolClient {
    async fn fetch_transaction(&self, txid: &str) -> Result<TransactionDetails> {
        if !is_valid_txid(txid) {
            return Err(ScanError::InvalidTxid(txid.to_string()));
        }

        let url = format!("{}/tx/{}", self.base_url, txid);
        let body: TxResponse = self.get_json(url).await?;

        let outputs = body
            .vout
            .into_iter()
            .enumerate()
            .map(|(index, out)| TxOutput {
                index: index as u32,
                value: out.value,
                script_type: out
                    .scriptpubkey_type
                    .unwrap_or_else(|| "unknown".to_string()),
            })
            .collect();

        Ok(TransactionDetails {
            txid: txid.to_string(),
            outputs,
        })
    }

    async fn fetch_outspends(&self, txid: &str) -> Result<Outspends> {
        if !is_valid_txid(txid) {
            return Err(ScanError::InvalidTxid(txid.to_string()));
        }

        let url = format!("{}/tx/{}/outspends", self.base_url, txid);
        let body: Vec<OutspendResponse> = self.get_json(url).await?;

        Ok(Outspends(
            body.into_iter()
                .map(|out| if out.spent { out.txid } else { None })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const TXID: &str = "9996f5ad442be27bdc8c05ba32c0837185a36626fd8bc1c9cd0a4a2576277ec2";
    const SPENDER: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn client_for(server: &MockServer) -> MempoolClient {
        MempoolClient::with_base_url(&server.uri())
            .unwrap()
            .with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fetch_transaction_parses_outputs() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/tx/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "txid": TXID,
                "vout": [
                    { "value": 150000, "scriptpubkey_type": "v0_p2wpkh" },
                    { "value": 42, "scriptpubkey_type": "p2pkh" },
                    { "scriptpubkey": "6a" }
                ]
            })))
            .mount(&mock_server)
            .await;

        let tx = client_for(&mock_server)
            .fetch_transaction(TXID)
            .await
            .unwrap();

        assert_eq!(tx.txid, TXID);
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.outputs[0].value, 150000);
        assert_eq!(tx.outputs[0].script_type, "v0_p2wpkh");
        assert_eq!(tx.outputs[1].index, 1);
        assert_eq!(tx.outputs[2].value, 0);
        assert_eq!(tx.outputs[2].script_type, "unknown");
    }

    #[tokio::test]
    async fn test_fetch_outspends_maps_spent_flag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/tx/{}/outspends", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "spent": true, "txid": SPENDER, "vin": 0 },
                { "spent": false },
                { "spent": false, "txid": SPENDER }
            ])))
            .mount(&mock_server)
            .await;

        let outspends = client_for(&mock_server)
            .fetch_outspends(TXID)
            .await
            .unwrap();

        assert_eq!(outspends.len(), 3);
        assert_eq!(outspends.spender(0), Some(SPENDER));
        assert_eq!(outspends.spender(1), None);
        // `txid` without `spent` does not count as a spend
        assert_eq!(outspends.spender(2), None);
    }

    #[tokio::test]
    async fn test_non_success_status_is_status_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/tx/{}/outspends", TXID)))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server)
            .fetch_outspends(TXID)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::StatusError { status: 429, .. }));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/tx/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server)
            .fetch_transaction(TXID)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_invalid_txid_rejected_without_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server)
            .fetch_transaction("../admin")
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::InvalidTxid(_)));
    }

    #[tokio::test]
    async fn test_delay_applies_after_failed_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = MempoolClient::with_base_url(&mock_server.uri())
            .unwrap()
            .with_delay(Duration::from_millis(150));

        let start = Instant::now();
        let result = client.fetch_transaction(TXID).await;

        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        assert!(matches!(
            MempoolClient::with_base_url("ftp://example.com/api"),
            Err(ScanError::InvalidUrl(_))
        ));
        assert!(matches!(
            MempoolClient::with_base_url("not a url"),
            Err(ScanError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = MempoolClient::with_base_url("https://mempool.space/api/").unwrap();
        assert_eq!(client.base_url(), "https://mempool.space/api");
        assert_eq!(client.delay(), DEFAULT_DELAY);
    }
}
