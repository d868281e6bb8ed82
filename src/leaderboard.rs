// ===============================
// src/leaderboard.rs
// ===============================
//
// Adapter Binance Futures Leaderboard (REST, tanpa signing):
// - getOtherPosition              -> daftar posisi terbuka
// - getOtherLeaderboardBaseInfo   -> nickName
// - fapi premiumIndex             -> mark price
//
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, ORIGIN, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::RawPosition;
use crate::ports::{MarkPriceSource, NicknameSource, PositionSource, ProviderError};

const POSITION_PATH: &str = "/bapi/futures/v2/private/future/leaderboard/getOtherPosition";
const BASE_INFO_PATH: &str = "/bapi/futures/v2/public/future/leaderboard/getOtherLeaderboardBaseInfo";
const MARK_PRICE_PATH: &str = "/fapi/v1/premiumIndex";

const API_OK_CODE: &str = "000000";
pub const MARK_PRICE_UNAVAILABLE: &str = "N/A";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Mobile Safari/537.36";

#[derive(Clone, Debug)]
pub struct LeaderboardCfg {
    pub web_url: String,
    pub fapi_url: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub request_timeout: Duration,
}

// ---- Model response ----
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    // jangan pakai #[serde(default)] di sini: menambah bound `T: Default`
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionData {
    #[serde(default)]
    other_position_ret_list: Option<Vec<ApiPosition>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPosition {
    symbol: Option<String>,
    amount: Option<f64>,
    entry_price: Option<f64>,
    mark_price: Option<f64>,
    pnl: Option<f64>,
    leverage: Option<f64>,
    update_time_stamp: Option<i64>,
}

impl From<ApiPosition> for RawPosition {
    fn from(p: ApiPosition) -> Self {
        RawPosition {
            symbol: p.symbol,
            size: p.amount,
            entry_price: p.entry_price,
            mark_price: p.mark_price,
            unrealized_pnl: p.pnl,
            leverage: p.leverage,
            update_timestamp: p.update_time_stamp,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BaseInfo {
    #[serde(default)]
    nick_name: Option<String>,
}

fn unwrap_envelope<T>(env: Envelope<T>) -> Result<Option<T>, ProviderError> {
    if env.code.as_deref() != Some(API_OK_CODE) || env.success != Some(true) {
        return Err(ProviderError::Api(
            env.message.unwrap_or_else(|| "Unknown error".to_string()),
        ));
    }
    Ok(env.data)
}

/// Body getOtherPosition -> raw positions. `otherPositionRetList` null berarti
/// trader tidak membagikan posisi; itu error, bukan snapshot kosong.
fn positions_from_body(body: &str) -> Result<Vec<RawPosition>, ProviderError> {
    let env: Envelope<PositionData> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let list = unwrap_envelope(env)?
        .and_then(|d| d.other_position_ret_list)
        .ok_or_else(|| ProviderError::Malformed("otherPositionRetList missing".into()))?;
    Ok(list.into_iter().map(RawPosition::from).collect())
}

fn nickname_from_body(body: &str) -> Result<Option<String>, ProviderError> {
    let env: Envelope<BaseInfo> =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    Ok(unwrap_envelope(env)?.and_then(|b| b.nick_name).filter(|n| !n.is_empty()))
}

fn mark_price_from_body(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    match v.get("markPrice")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct BinanceLeaderboard {
    http: reqwest::Client,
    cfg: LeaderboardCfg,
}

impl BinanceLeaderboard {
    pub fn new(cfg: LeaderboardCfg) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        let ua = cfg.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        if let Ok(v) = HeaderValue::from_str(ua) {
            headers.insert(USER_AGENT, v);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("clienttype", HeaderValue::from_static("web"));
        if let Ok(v) = HeaderValue::from_str(&cfg.web_url) {
            headers.insert(ORIGIN, v);
        }
        if let Some(cookie) = cfg.cookie.as_deref() {
            match HeaderValue::from_str(cookie) {
                Ok(v) => { headers.insert(COOKIE, v); }
                Err(e) => warn!(error = %e, "BINANCE_COOKIE is not a valid header value, ignored"),
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self { http, cfg })
    }

    async fn post_text(&self, path: &str, payload: serde_json::Value) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.cfg.web_url.trim_end_matches('/'), path);
        let rsp = self.http.post(url).json(&payload).send().await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status { status: status.as_u16(), body });
        }
        Ok(body)
    }

    async fn try_mark_price(&self, symbol: &str) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.cfg.fapi_url.trim_end_matches('/'), MARK_PRICE_PATH);
        let rsp = self.http.get(url).query(&[("symbol", symbol)]).send().await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status { status: status.as_u16(), body });
        }
        mark_price_from_body(&body).ok_or_else(|| ProviderError::Malformed("markPrice missing".into()))
    }
}

#[async_trait]
impl PositionSource for BinanceLeaderboard {
    async fn fetch_positions(&self, id: &str) -> Result<Vec<RawPosition>, ProviderError> {
        info!(%id, "fetching positions");
        let body = self
            .post_text(POSITION_PATH, json!({ "encryptedUid": id, "tradeType": "PERPETUAL" }))
            .await
            .map_err(|e| {
                error!(%id, error = %e, "position fetch failed");
                e
            })?;
        let positions = positions_from_body(&body).map_err(|e| {
            error!(%id, error = %e, "position response rejected");
            e
        })?;
        debug!(%id, count = positions.len(), "positions fetched");
        Ok(positions)
    }
}

#[async_trait]
impl NicknameSource for BinanceLeaderboard {
    async fn fetch_nickname(&self, id: &str) -> String {
        let res = match self.post_text(BASE_INFO_PATH, json!({ "encryptedUid": id })).await {
            Ok(body) => nickname_from_body(&body),
            Err(e) => Err(e),
        };
        match res {
            Ok(Some(nick)) => {
                debug!(%id, %nick, "nickname resolved");
                nick
            }
            Ok(None) => id.to_string(),
            Err(e) => {
                warn!(%id, error = %e, "nickname lookup failed, using identifier");
                id.to_string()
            }
        }
    }
}

#[async_trait]
impl MarkPriceSource for BinanceLeaderboard {
    async fn fetch_mark_price(&self, symbol: &str) -> String {
        match self.try_mark_price(symbol).await {
            Ok(px) => px,
            Err(e) => {
                error!(%symbol, error = %e, "mark price lookup failed");
                MARK_PRICE_UNAVAILABLE.to_string()
            }
        }
    }
}
