// ===============================
// src/snapshot.rs
// ===============================
use std::collections::BTreeSet;
use thiserror::Error;

use crate::domain::{Direction, Position, RawPosition, Snapshot};

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("record #{index} missing field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("symbol {0} appears more than once")]
    DuplicateSymbol(String),
}

/// Selisih dua snapshot, dihitung hanya dari key symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub opened: BTreeSet<String>,
    pub closed: BTreeSet<String>,
    /// ada di kedua sisi; tidak pernah memicu notifikasi
    pub unchanged: BTreeSet<String>,
}

impl DiffResult {
    /// true kalau tidak ada yang dibuka atau ditutup.
    pub fn is_empty(&self) -> bool { self.opened.is_empty() && self.closed.is_empty() }
}

fn required<T>(v: Option<T>, index: usize, field: &'static str) -> Result<T, NormalizeError> {
    v.ok_or(NormalizeError::MissingField { index, field })
}

/// Raw list -> Snapshot. Satu record invalid = seluruh panggilan gagal
/// (tidak ada snapshot parsial).
pub fn normalize(raw: &[RawPosition]) -> Result<Snapshot, NormalizeError> {
    let mut out = Snapshot::new();
    for (index, r) in raw.iter().enumerate() {
        let symbol = required(r.symbol.clone().filter(|s| !s.is_empty()), index, "symbol")?;
        let size = required(r.size, index, "size")?;
        let entry_price = required(r.entry_price, index, "entry_price")?;
        let mark_price = required(r.mark_price, index, "mark_price")?;
        let unrealized_pnl = required(r.unrealized_pnl, index, "unrealized_pnl")?;
        let leverage = required(r.leverage, index, "leverage")?;
        let update_ts_ms = required(r.update_timestamp, index, "update_timestamp")?;

        if out.contains_key(&symbol) {
            return Err(NormalizeError::DuplicateSymbol(symbol));
        }

        let pos = Position {
            symbol: symbol.clone(),
            size,
            direction: Direction::from_size(size),
            entry_price,
            position_value: mark_price * size.abs(),
            unrealized_pnl,
            leverage,
            update_ts_ms,
        };
        out.insert(symbol, pos);
    }
    Ok(out)
}

/// opened = keys(current) - keys(previous), closed = keys(previous) - keys(current)
pub fn diff(previous: &Snapshot, current: &Snapshot) -> DiffResult {
    let (unchanged, opened) = current
        .keys()
        .cloned()
        .partition(|k| previous.contains_key(k));
    let closed = previous
        .keys()
        .filter(|k| !current.contains_key(*k))
        .cloned()
        .collect();
    DiffResult { opened, closed, unchanged }
}
