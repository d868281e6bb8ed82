// ===============================
// src/ports.rs
// ===============================
//
// Kontrak kolaborator eksternal yang dipakai poller & command scheduler.
// Implementasi HTTP: leaderboard.rs (Binance) dan telegram.rs.
//
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{RawPosition, UpdateBatch};

/// Error transient dari API (HTTP/network/envelope).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("api error: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch_positions(&self, id: &str) -> Result<Vec<RawPosition>, ProviderError>;
}

/// Tidak pernah gagal ke pemanggil: "N/A" kalau ada error.
#[async_trait]
pub trait MarkPriceSource: Send + Sync {
    async fn fetch_mark_price(&self, symbol: &str) -> String;
}

/// Tidak pernah gagal ke pemanggil: identifier itu sendiri kalau ada error.
#[async_trait]
pub trait NicknameSource: Send + Sync {
    async fn fetch_nickname(&self, id: &str) -> String;
}

/// `destination`: chat id tujuan. false untuk kegagalan apa pun.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, text: &str, destination: i64) -> bool;
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn poll_updates(&self, cursor: Option<i64>) -> Result<UpdateBatch, ProviderError>;
}
