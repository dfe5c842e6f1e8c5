use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    StatusError { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid transaction id: {0}")]
    InvalidTxid(String),

    #[error("Output {index} is out of range for transaction {txid}")]
    InvalidIndex { txid: String, index: u32 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Crawl state is busy: {0} units of work still pending")]
    StateBusy(usize),
}

pub type Result<T> = std::result::Result<T, ScanError>;
