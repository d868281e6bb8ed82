// ===============================
// src/testkit.rs
// ===============================
//
// Fake kolaborator in-memory untuk unit test poller & command scheduler.
//
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{RawPosition, UpdateBatch};
use crate::ports::{
    MarkPriceSource, MessageSink, MessageSource, NicknameSource, PositionSource, ProviderError,
};

pub const FAKE_MARK_PRICE: &str = "101.5";

#[derive(Default)]
pub struct FakeLeaderboard {
    positions: Mutex<HashMap<String, Result<Vec<RawPosition>, String>>>,
    nicknames: Mutex<HashMap<String, String>>,
    mark_calls: Mutex<Vec<String>>,
    nick_calls: AtomicUsize,
    nick_panics: AtomicBool,
}

impl FakeLeaderboard {
    pub fn set_positions(&self, id: &str, res: Result<Vec<RawPosition>, String>) {
        self.positions.lock().insert(id.to_string(), res);
    }

    pub fn set_nickname(&self, id: &str, nick: &str) {
        self.nicknames.lock().insert(id.to_string(), nick.to_string());
    }

    pub fn mark_price_calls(&self) -> Vec<String> { self.mark_calls.lock().clone() }

    pub fn nickname_calls(&self) -> usize { self.nick_calls.load(Ordering::SeqCst) }

    pub fn panic_on_nickname(&self, on: bool) { self.nick_panics.store(on, Ordering::SeqCst); }
}

#[async_trait]
impl PositionSource for FakeLeaderboard {
    async fn fetch_positions(&self, id: &str) -> Result<Vec<RawPosition>, ProviderError> {
        match self.positions.lock().get(id) {
            Some(Ok(v)) => Ok(v.clone()),
            Some(Err(e)) => Err(ProviderError::Api(e.clone())),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl MarkPriceSource for FakeLeaderboard {
    async fn fetch_mark_price(&self, symbol: &str) -> String {
        self.mark_calls.lock().push(symbol.to_string());
        FAKE_MARK_PRICE.to_string()
    }
}

#[async_trait]
impl NicknameSource for FakeLeaderboard {
    async fn fetch_nickname(&self, id: &str) -> String {
        if self.nick_panics.load(Ordering::SeqCst) {
            panic!("nickname lookup exploded");
        }
        self.nick_calls.fetch_add(1, Ordering::SeqCst);
        self.nicknames.lock().get(id).cloned().unwrap_or_else(|| id.to_string())
    }
}

/// Sink yang mencatat (text, destination) untuk setiap pengiriman sukses.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, i64)>>,
    fail_pattern: Mutex<Option<String>>,
    panic_on_send: AtomicBool,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<(String, i64)> { std::mem::take(&mut *self.sent.lock()) }

    pub fn fail_when_contains(&self, pattern: &str) {
        *self.fail_pattern.lock() = Some(pattern.to_string());
    }

    pub fn panic_on_send(&self) { self.panic_on_send.store(true, Ordering::SeqCst); }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, text: &str, destination: i64) -> bool {
        if self.panic_on_send.load(Ordering::SeqCst) {
            panic!("sink exploded");
        }
        let fail = self.fail_pattern.lock().as_deref().map_or(false, |p| text.contains(p));
        if fail {
            return false;
        }
        self.sent.lock().push((text.to_string(), destination));
        true
    }
}

/// Source dengan skrip respons; setelah skrip habis mengembalikan batch kosong.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<UpdateBatch, String>>>,
    cursors: Mutex<Vec<Option<i64>>>,
}

impl ScriptedSource {
    pub fn push(&self, res: Result<UpdateBatch, String>) { self.script.lock().push_back(res); }

    pub fn cursors_seen(&self) -> Vec<Option<i64>> { self.cursors.lock().clone() }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn poll_updates(&self, cursor: Option<i64>) -> Result<UpdateBatch, ProviderError> {
        self.cursors.lock().push(cursor);
        match self.script.lock().pop_front() {
            Some(Ok(b)) => Ok(b),
            Some(Err(e)) => Err(ProviderError::Api(e)),
            None => Ok(UpdateBatch::default()),
        }
    }
}
