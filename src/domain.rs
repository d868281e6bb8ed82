// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arah posisi, diturunkan dari tanda `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction { Long, Short }

impl Direction {
    /// size > 0 => LONG, selain itu SHORT (termasuk size == 0).
    pub fn from_size(size: f64) -> Self {
        if size > 0.0 { Direction::Long } else { Direction::Short }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Direction::Long => "LONG", Direction::Short => "SHORT" }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Satu record mentah dari position source. Semua field opsional karena
/// validasinya dilakukan di `snapshot::normalize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPosition {
    pub symbol: Option<String>,
    pub size: Option<f64>,
    pub entry_price: Option<f64>,
    pub mark_price: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub leverage: Option<f64>,
    /// Unix millis
    pub update_timestamp: Option<i64>,
}

/// Posisi ter-normalisasi (immutable setelah dibuat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: f64,
    pub direction: Direction,
    pub entry_price: f64,
    /// mark_price * |size|
    pub position_value: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub update_ts_ms: i64,
}

/// symbol -> Position untuk satu identifier pada satu waktu.
/// BTreeMap agar urutan listing stabil.
pub type Snapshot = BTreeMap<String, Position>;

/// Pesan masuk dari message source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: i64,
    pub text: String,
}

/// Hasil satu long-poll: batch pesan + cursor berikutnya.
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    pub messages: Vec<InboundMessage>,
    pub next_cursor: Option<i64>,
}
