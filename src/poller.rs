// ===============================
// src/poller.rs
// ===============================
//
// Polling scheduler: tiap siklus
//   fetch (bounded concurrency) -> normalize -> diff / listing -> simpan snapshot
//   -> dispatch semua notifikasi paralel -> sleep.
//
// State per identifier hanya dimiliki task ini; command scheduler tidak menyentuhnya.
//
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::{Position, Snapshot};
use crate::format;
use crate::metrics::{CYCLES, CYCLE_DURATION, CYCLE_ERRORS, FETCH_ERRORS, NOTIFICATIONS};
use crate::ports::{MarkPriceSource, MessageSink, NicknameSource, PositionSource};
use crate::registry::Registry;
use crate::snapshot::{diff, normalize};

#[derive(Clone, Debug)]
pub struct PollerCfg {
    pub interval: Duration,
    pub fetch_concurrency: usize,
    /// chat tujuan semua notifikasi
    pub chat_id: i64,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("{0} notification task(s) panicked during dispatch")]
    DispatchPanicked(usize),
    #[error("polling cycle panicked: {0}")]
    Panicked(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// FIRST_CYCLE -> STEADY, sekali saja, setelah fetch pertama yang sukses.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerState {
    FirstCycle,
    Steady { previous: Snapshot },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Opened { id: String, nickname: String, position: Position },
    /// `position` = baris terakhir yang diketahui dari snapshot sebelumnya
    Closed { id: String, nickname: String, position: Position },
    Listing { id: String, nickname: String, snapshot: Snapshot },
    FetchError { id: String, error: String },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Opened { .. } => "opened",
            Notification::Closed { .. } => "closed",
            Notification::Listing { .. } => "listing",
            Notification::FetchError { .. } => "fetch_error",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub tracked: usize,
    pub fetch_failed: usize,
    pub sent: usize,
    pub send_failed: usize,
}

/// Render teks final. Mark price untuk posisi tertutup diambil live di sini.
async fn render(note: &Notification, marks: &dyn MarkPriceSource) -> String {
    match note {
        Notification::Opened { id, nickname, position } => {
            format::opened_message(nickname, id, position)
        }
        Notification::Closed { id, nickname, position } => {
            let px = marks.fetch_mark_price(&position.symbol).await;
            format::closed_message(nickname, id, position, &px)
        }
        Notification::Listing { id, nickname, snapshot } => {
            format::listing_message(nickname, id, snapshot)
        }
        Notification::FetchError { id, error } => format::fetch_error_message(id, error),
    }
}

pub struct Poller {
    registry: Arc<Registry>,
    positions: Arc<dyn PositionSource>,
    marks: Arc<dyn MarkPriceSource>,
    nicknames: Arc<dyn NicknameSource>,
    sink: Arc<dyn MessageSink>,
    cfg: PollerCfg,
    states: HashMap<String, TrackerState>,
    // generasi registry saat state dibuat; beda generasi = entri baru
    generations: HashMap<String, u64>,
}

impl Poller {
    pub fn new(
        registry: Arc<Registry>,
        positions: Arc<dyn PositionSource>,
        marks: Arc<dyn MarkPriceSource>,
        nicknames: Arc<dyn NicknameSource>,
        sink: Arc<dyn MessageSink>,
        cfg: PollerCfg,
    ) -> Self {
        Self { registry, positions, marks, nicknames, sink, cfg, states: HashMap::new(), generations: HashMap::new() }
    }

    #[cfg(test)]
    pub fn state_of(&self, id: &str) -> Option<&TrackerState> { self.states.get(id) }

    /// Transisi state untuk satu identifier berdasarkan hasil fetch siklus ini.
    pub fn plan(&mut self, id: &str, fetched: Result<Snapshot, String>) -> Vec<Notification> {
        let current = match fetched {
            Ok(s) => s,
            Err(error) => {
                // snapshot sebelumnya dibiarkan utuh
                FETCH_ERRORS.inc();
                warn!(%id, %error, "fetch failed, identifier skipped this cycle");
                return vec![Notification::FetchError { id: id.to_string(), error }];
            }
        };

        let nickname = self.registry.nickname(id);
        let state = self.states.entry(id.to_string()).or_insert(TrackerState::FirstCycle);

        let notes = match state {
            TrackerState::FirstCycle => {
                debug!(%id, positions = current.len(), "first observation, sending full listing");
                vec![Notification::Listing {
                    id: id.to_string(),
                    nickname,
                    snapshot: current.clone(),
                }]
            }
            TrackerState::Steady { previous } => {
                let d = diff(previous, &current);
                if !d.is_empty() {
                    info!(%id, opened = ?d.opened, closed = ?d.closed, "position changes detected");
                }
                let mut out = Vec::with_capacity(d.opened.len() + d.closed.len());
                for sym in &d.opened {
                    if let Some(p) = current.get(sym) {
                        out.push(Notification::Opened {
                            id: id.to_string(),
                            nickname: nickname.clone(),
                            position: p.clone(),
                        });
                    }
                }
                for sym in &d.closed {
                    if let Some(p) = previous.get(sym) {
                        out.push(Notification::Closed {
                            id: id.to_string(),
                            nickname: nickname.clone(),
                            position: p.clone(),
                        });
                    }
                }
                out
            }
        };

        *state = TrackerState::Steady { previous: current };
        notes
    }

    /// Buang state identifier yang sudah tidak ada di registry, atau yang
    /// dihapus lalu ditambah lagi sejak siklus terakhir (generasi berubah).
    fn prune(&mut self, tracked: &[(String, u64)]) {
        let generations = &self.generations;
        self.states.retain(|id, _| {
            let keep = tracked.iter().any(|(t, g)| t == id && generations.get(id) == Some(g));
            if !keep {
                info!(%id, "identifier removed or re-added, state dropped");
            }
            keep
        });
        self.generations = tracked.iter().cloned().collect();
    }

    async fn resolve_missing_nicknames(&self, ids: &[String]) {
        for id in ids {
            if self.registry.has_nickname(id) {
                continue;
            }
            let nick = self.nicknames.fetch_nickname(id).await;
            self.registry.set_nickname(id, nick);
        }
    }

    /// Fetch + normalize semua identifier, paling banyak `fetch_concurrency` sekaligus.
    /// Urutan hasil sama dengan urutan `ids`.
    async fn fetch_all(&self, ids: &[String]) -> Vec<(String, Result<Snapshot, String>)> {
        let limit = self.cfg.fetch_concurrency.max(1);
        stream::iter(ids.to_vec())
            .map(|id| {
                let src = self.positions.clone();
                async move {
                    let task_id = id.clone();
                    let joined = tokio::spawn(async move {
                        let raw = src.fetch_positions(&task_id).await.map_err(|e| e.to_string())?;
                        normalize(&raw).map_err(|e| format!("invalid position data: {e}"))
                    })
                    .await;
                    let res = match joined {
                        Ok(r) => r,
                        Err(e) => Err(format!("fetch task failed: {e}")),
                    };
                    (id, res)
                }
            })
            .buffered(limit)
            .collect()
            .await
    }

    /// Kirim semua notifikasi paralel; satu kegagalan tidak menghalangi yang lain.
    async fn dispatch(&self, notes: Vec<Notification>) -> Result<(usize, usize), CycleError> {
        let mut set = JoinSet::new();
        for note in notes {
            let marks = self.marks.clone();
            let sink = self.sink.clone();
            let chat_id = self.cfg.chat_id;
            set.spawn(async move {
                let text = render(&note, marks.as_ref()).await;
                let ok = sink.send(&text, chat_id).await;
                let outcome = if ok { "sent" } else { "failed" };
                NOTIFICATIONS.with_label_values(&[note.kind(), outcome]).inc();
                if !ok {
                    error!(kind = note.kind(), "notification delivery failed");
                }
                ok
            });
        }

        let (mut sent, mut failed, mut panicked) = (0, 0, 0);
        while let Some(res) = set.join_next().await {
            match res {
                Ok(true) => sent += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    error!(error = %e, "notification task aborted");
                    panicked += 1;
                }
            }
        }
        if panicked > 0 {
            return Err(CycleError::DispatchPanicked(panicked));
        }
        Ok((sent, failed))
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let tracked = self.registry.tracked();
        self.prune(&tracked);
        let ids: Vec<String> = tracked.into_iter().map(|(id, _)| id).collect();
        debug!(?ids, "polling identifiers");

        self.resolve_missing_nicknames(&ids).await;

        let fetched = self.fetch_all(&ids).await;
        let mut report = CycleReport { tracked: ids.len(), ..Default::default() };
        let mut notes = Vec::new();
        for (id, res) in fetched {
            if res.is_err() {
                report.fetch_failed += 1;
            }
            notes.extend(self.plan(&id, res));
        }

        if !notes.is_empty() {
            debug!(count = notes.len(), "dispatching notifications");
        }
        let (sent, failed) = self.dispatch(notes).await?;
        report.sent = sent;
        report.send_failed = failed;
        Ok(report)
    }

    /// Satu siklus terlindungi: panic di mana pun di dalam siklus menjadi
    /// `CycleError`, dilaporkan ke chat operator, dan loop tetap jalan.
    pub async fn tick(&mut self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => Err(CycleError::Panicked(panic_message(payload.as_ref()))),
        };
        match &outcome {
            Ok(r) => {
                CYCLES.inc();
                info!(
                    tracked = r.tracked,
                    fetch_failed = r.fetch_failed,
                    sent = r.sent,
                    send_failed = r.send_failed,
                    ping_ms = started.elapsed().as_millis() as u64,
                    "bot is still running"
                );
            }
            Err(e) => {
                CYCLE_ERRORS.inc();
                error!(error = %e, "polling cycle failed");
                let msg = format::cycle_error_message(&e.to_string(), self.cfg.interval.as_secs());
                let _ = self.sink.send(&msg, self.cfg.chat_id).await;
            }
        }
        CYCLE_DURATION.observe(started.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    /// Loop utama; tidak pernah berhenti karena error.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.cfg.interval.as_secs(),
            concurrency = self.cfg.fetch_concurrency,
            "position monitor started"
        );
        loop {
            let _ = self.tick().await;
            sleep(self.cfg.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::uid;
    use crate::snapshot::tests::{raw, snap};
    use crate::store::MemoryStore;
    use crate::testkit::{FakeLeaderboard, RecordingSink};

    const CHAT: i64 = -100;

    struct Rig {
        poller: Poller,
        registry: Arc<Registry>,
        lb: Arc<FakeLeaderboard>,
        sink: Arc<RecordingSink>,
    }

    fn rig(ids: &[String]) -> Rig {
        let store = Arc::new(MemoryStore::with_ids(ids.to_vec()));
        let registry = Arc::new(Registry::load(store));
        let lb = Arc::new(FakeLeaderboard::default());
        let sink = Arc::new(RecordingSink::default());
        let poller = Poller::new(
            registry.clone(),
            lb.clone(),
            lb.clone(),
            lb.clone(),
            sink.clone(),
            PollerCfg { interval: Duration::from_millis(1), fetch_concurrency: 2, chat_id: CHAT },
        );
        Rig { poller, registry, lb, sink }
    }

    #[test]
    fn first_cycle_emits_exactly_one_listing() {
        let mut r = rig(&[uid('A')]);
        let notes = r.poller.plan(&uid('A'), Ok(snap(&[("BTCUSDT", 2.0), ("ETHUSDT", -1.0)])));
        assert_eq!(notes.len(), 1);
        assert!(matches!(notes[0], Notification::Listing { ref snapshot, .. } if snapshot.len() == 2));
        assert!(matches!(r.poller.state_of(&uid('A')), Some(TrackerState::Steady { .. })));
    }

    #[test]
    fn fetch_error_keeps_previous_snapshot() {
        let mut r = rig(&[uid('A')]);
        let id = uid('A');
        r.poller.plan(&id, Ok(snap(&[("BTCUSDT", 2.0)])));
        let notes = r.poller.plan(&id, Err("boom".into()));
        assert_eq!(notes, vec![Notification::FetchError { id: id.clone(), error: "boom".into() }]);
        assert_eq!(
            r.poller.state_of(&id),
            Some(&TrackerState::Steady { previous: snap(&[("BTCUSDT", 2.0)]) })
        );
        // data sama lagi -> tidak ada notifikasi
        assert!(r.poller.plan(&id, Ok(snap(&[("BTCUSDT", 2.0)]))).is_empty());
    }

    #[test]
    fn first_fetch_failure_stays_in_first_cycle() {
        let mut r = rig(&[uid('A')]);
        let id = uid('A');
        r.poller.plan(&id, Err("down".into()));
        assert!(r.poller.state_of(&id).is_none());
        let notes = r.poller.plan(&id, Ok(Snapshot::new()));
        assert!(matches!(notes[0], Notification::Listing { .. }));
    }

    #[test]
    fn changed_numbers_on_same_symbol_are_silent() {
        let mut r = rig(&[uid('A')]);
        let id = uid('A');
        r.poller.plan(&id, Ok(snap(&[("BTCUSDT", 2.0)])));
        assert!(r.poller.plan(&id, Ok(snap(&[("BTCUSDT", 7.0)]))).is_empty());
    }

    #[tokio::test]
    async fn steady_state_open_then_close_scenario() {
        let id = uid('U');
        let mut r = rig(&[id.clone()]);
        r.lb.set_nickname(&id, "U1");

        // siklus 1: first observation
        r.lb.set_positions(&id, Ok(vec![raw("BTCUSDT", 2.0)]));
        let rep = r.poller.run_cycle().await.unwrap();
        assert_eq!(rep.sent, 1);
        let sent = r.sink.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Current positions"));
        assert_eq!(sent[0].1, CHAT);

        // siklus 2: ETHUSDT short dibuka
        r.lb.set_positions(&id, Ok(vec![raw("BTCUSDT", 2.0), raw("ETHUSDT", -1.0)]));
        r.poller.run_cycle().await.unwrap();
        let sent = r.sink.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("New position opened"));
        assert!(sent[0].0.contains("ETHUSDT SHORT"));
        assert!(sent[0].0.contains("[<b>U1</b>]"));
        assert!(!sent[0].0.contains("BTCUSDT"));
        match r.poller.state_of(&id) {
            Some(TrackerState::Steady { previous }) => {
                assert_eq!(previous.keys().collect::<Vec<_>>(), vec!["BTCUSDT", "ETHUSDT"]);
            }
            other => panic!("unexpected state {other:?}"),
        }

        // siklus 3: semua ditutup, mark price live per simbol
        r.lb.set_positions(&id, Ok(vec![]));
        r.poller.run_cycle().await.unwrap();
        let mut sent: Vec<String> = r.sink.take().into_iter().map(|(t, _)| t).collect();
        sent.sort();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|t| t.contains("Position closed")));
        assert!(sent[0].contains("BTCUSDT LONG") && sent[0].contains("Current Price: 101.5 USDT"));
        assert!(sent[1].contains("ETHUSDT SHORT"));
        let mut priced = r.lb.mark_price_calls();
        priced.sort();
        assert_eq!(priced, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(r.poller.state_of(&id), Some(&TrackerState::Steady { previous: Snapshot::new() }));
    }

    #[tokio::test]
    async fn provider_error_is_reported_and_others_continue() {
        let (a, b) = (uid('A'), uid('B'));
        let mut r = rig(&[a.clone(), b.clone()]);
        r.lb.set_positions(&a, Err("HTTP 503".into()));
        r.lb.set_positions(&b, Ok(vec![raw("SOLUSDT", 1.0)]));

        let rep = r.poller.run_cycle().await.unwrap();
        assert_eq!(rep.fetch_failed, 1);
        let sent = r.sink.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|(t, _)| t.contains("Error for encryptedUid") && t.contains("HTTP 503")));
        assert!(sent.iter().any(|(t, _)| t.contains("SOLUSDT")));
        assert!(r.poller.state_of(&a).is_none());
    }

    #[tokio::test]
    async fn malformed_record_counts_as_fetch_failure() {
        let a = uid('A');
        let mut r = rig(&[a.clone()]);
        let mut bad = raw("BTCUSDT", 1.0);
        bad.entry_price = None;
        r.lb.set_positions(&a, Ok(vec![bad]));
        let rep = r.poller.run_cycle().await.unwrap();
        assert_eq!(rep.fetch_failed, 1);
        assert!(r.sink.take()[0].0.contains("invalid position data"));
    }

    #[tokio::test]
    async fn send_failure_does_not_block_other_notifications() {
        let (a, b) = (uid('A'), uid('B'));
        let mut r = rig(&[a.clone(), b.clone()]);
        r.lb.set_positions(&a, Ok(vec![raw("BTCUSDT", 1.0)]));
        r.lb.set_positions(&b, Ok(vec![raw("XRPUSDT", 1.0)]));
        r.sink.fail_when_contains("BTCUSDT");

        let rep = r.poller.run_cycle().await.unwrap();
        assert_eq!((rep.sent, rep.send_failed), (1, 1));
        // transisi tetap terjadi walau pengiriman gagal
        assert!(matches!(r.poller.state_of(&a), Some(TrackerState::Steady { .. })));
    }

    #[tokio::test]
    async fn removed_identifier_state_is_dropped_and_readd_restarts() {
        let a = uid('A');
        let mut r = rig(&[a.clone()]);
        r.lb.set_positions(&a, Ok(vec![raw("BTCUSDT", 1.0)]));
        r.poller.run_cycle().await.unwrap();
        r.sink.take();

        assert!(r.registry.remove_by_index(0));
        let rep = r.poller.run_cycle().await.unwrap();
        assert_eq!(rep.tracked, 0);
        assert!(r.poller.state_of(&a).is_none());
        assert!(r.sink.take().is_empty());

        assert!(r.registry.add(&a));
        r.poller.run_cycle().await.unwrap();
        let sent = r.sink.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Current positions"));
    }

    #[tokio::test]
    async fn readd_between_two_cycles_restarts_with_listing() {
        let a = uid('A');
        let mut r = rig(&[a.clone()]);
        r.lb.set_positions(&a, Ok(vec![raw("BTCUSDT", 1.0)]));
        r.poller.run_cycle().await.unwrap();
        r.sink.take();

        // hapus + tambah lagi dalam satu interval
        assert!(r.registry.remove_by_index(0));
        assert!(r.registry.add(&a));
        r.lb.set_positions(&a, Ok(vec![raw("ETHUSDT", -1.0)]));
        r.poller.run_cycle().await.unwrap();

        let sent = r.sink.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Current positions"));
        assert!(sent[0].0.contains("ETHUSDT"));
        assert!(!sent[0].0.contains("Position closed"));
    }

    #[tokio::test]
    async fn panic_inside_cycle_is_reported_and_next_tick_runs() {
        let a = uid('A');
        let mut r = rig(&[a.clone()]);
        r.lb.set_positions(&a, Ok(vec![]));
        r.lb.panic_on_nickname(true);

        let err = r.poller.tick().await.unwrap_err();
        assert!(matches!(err, CycleError::Panicked(ref m) if m.contains("nickname lookup exploded")));
        let sent = r.sink.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Global error occurred"));
        assert_eq!(sent[0].1, CHAT);

        r.lb.panic_on_nickname(false);
        let rep = r.poller.tick().await.unwrap();
        assert_eq!(rep.sent, 1);
        assert!(r.sink.take()[0].0.contains("No positions found"));
    }

    #[tokio::test]
    async fn nicknames_resolved_once_and_cached() {
        let a = uid('A');
        let mut r = rig(&[a.clone()]);
        r.lb.set_nickname(&a, "whale");
        r.lb.set_positions(&a, Ok(vec![]));
        r.poller.run_cycle().await.unwrap();
        r.poller.run_cycle().await.unwrap();
        assert_eq!(r.registry.nickname(&a), "whale");
        assert_eq!(r.lb.nickname_calls(), 1);
        assert!(r.sink.take()[0].0.contains("No positions found"));
    }

    #[tokio::test]
    async fn panicking_sink_surfaces_as_cycle_error() {
        let a = uid('A');
        let mut r = rig(&[a.clone()]);
        r.lb.set_positions(&a, Ok(vec![]));
        r.sink.panic_on_send();
        let err = r.poller.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::DispatchPanicked(1)));
        // state tetap maju: transisi didorong oleh fetch yang sukses
        assert!(matches!(r.poller.state_of(&a), Some(TrackerState::Steady { .. })));
    }
}
