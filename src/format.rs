// ===============================
// src/format.rs
// ===============================
//
// Builder teks pesan (Telegram HTML). Murni: tanpa network, tanpa state.
//
use chrono::{FixedOffset, TimeZone, Utc};

use crate::domain::{Position, Snapshot};

pub const PROFILE_URL_BASE: &str =
    "https://www.binance.com/en/futures-activity/leaderboard/user/um?encryptedUid=";

// Timestamp ditampilkan di UTC+7
const DISPLAY_OFFSET_SECS: i32 = 7 * 3600;
const DISPLAY_OFFSET_LABEL: &str = "UTC+7";

const RULE: &str = "------------------------------";

pub fn profile_url(id: &str) -> String {
    format!("{PROFILE_URL_BASE}{id}")
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn format_update_time(ts_ms: i64) -> String {
    let (Some(tz), Some(t)) = (
        FixedOffset::east_opt(DISPLAY_OFFSET_SECS),
        Utc.timestamp_millis_opt(ts_ms).single(),
    ) else {
        return format!("{ts_ms} (unix ms)");
    };
    format!("{} ({DISPLAY_OFFSET_LABEL})", t.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S"))
}

fn header(nickname: &str) -> String {
    format!("⚠️ [<b>{}</b>]\n", escape_html(nickname))
}

fn profile_link(id: &str) -> String {
    format!("🔗 <a href='{}'>VIEW PROFILE ON BINANCE</a>", profile_url(&escape_html(id)))
}

fn pnl_emoji(pnl: f64) -> &'static str {
    if pnl >= 0.0 { "🟢" } else { "🔴" }
}

fn position_body(p: &Position) -> String {
    format!(
        "💵 Base currency - USDT\n\
         {RULE}\n\
         🎯 Entry Price: {}\n\
         💰 Est. Entry Size: {}\n\
         {} PnL: {}\n\n",
        p.entry_price,
        p.position_value,
        pnl_emoji(p.unrealized_pnl),
        p.unrealized_pnl,
    )
}

pub fn opened_message(nickname: &str, id: &str, p: &Position) -> String {
    format!(
        "{}❇️ New position opened\n\n\
         Position: {} {} {}X\n\n\
         {}\
         🕒 Last Update:\n{}\n\
         {}",
        header(nickname),
        p.symbol,
        p.direction,
        p.leverage,
        position_body(p),
        format_update_time(p.update_ts_ms),
        profile_link(id),
    )
}

/// `mark_price` diambil live oleh pemanggil saat dispatch ("N/A" kalau gagal).
pub fn closed_message(nickname: &str, id: &str, p: &Position, mark_price: &str) -> String {
    format!(
        "{}⛔️ Position closed\n\n\
         Position: {} {} {}X\n\
         💵 Current Price: {} USDT\n\n\
         🕒 Last Update:\n{}\n\
         {}",
        header(nickname),
        p.symbol,
        p.direction,
        p.leverage,
        escape_html(mark_price),
        format_update_time(p.update_ts_ms),
        profile_link(id),
    )
}

pub fn listing_message(nickname: &str, id: &str, snap: &Snapshot) -> String {
    if snap.is_empty() {
        return format!("{}💎 <b>No positions found</b>", header(nickname));
    }
    let mut msg = format!("{}💎 Current positions:\n\n", header(nickname));
    for p in snap.values() {
        msg.push_str(&format!("🔄 Position: {} {} {}X\n\n", p.symbol, p.direction, p.leverage));
        msg.push_str(&position_body(p));
    }
    // ambil update paling baru di antara semua posisi
    let latest = snap.values().map(|p| p.update_ts_ms).max().unwrap_or_default();
    msg.push_str(&format!("🕒 Last Update:\n{}\n", format_update_time(latest)));
    msg.push_str(&profile_link(id));
    msg
}

// Body error dari API bisa berupa halaman HTML utuh; batas pesan Telegram 4096 karakter.
const MAX_ERROR_CHARS: usize = 300;

fn clip_error(err: &str) -> String {
    match err.char_indices().nth(MAX_ERROR_CHARS) {
        Some((cut, _)) => format!("{}…", &err[..cut]),
        None => err.to_string(),
    }
}

pub fn fetch_error_message(id: &str, err: &str) -> String {
    format!("Error for encryptedUid {}: {}", escape_html(id), escape_html(&clip_error(err)))
}

pub fn cycle_error_message(err: &str, retry_secs: u64) -> String {
    format!(
        "Global error occurred:\n{}\n\nRetrying after {retry_secs}s",
        escape_html(&clip_error(err))
    )
}

// -------- Command replies --------

pub fn permission_denied() -> String {
    "You are not allowed to use this command.".to_string()
}

pub fn add_usage() -> String { "Wrong format. Use: /add &lt;encryptedUid&gt;".to_string() }

pub fn remove_usage() -> String { "Wrong format. Use: /remove &lt;number&gt;".to_string() }

pub fn added(id: &str) -> String { format!("Added {}", escape_html(id)) }

pub fn add_failed(id: &str, reason: &str) -> String {
    format!("Failed to add {}: {}", escape_html(id), escape_html(reason))
}

pub fn removed(index: usize, id: &str, nickname: &str) -> String {
    format!("Removed #{index}: {} ({})", escape_html(nickname), escape_html(id))
}

pub fn remove_failed(index: usize, reason: &str) -> String {
    format!("Failed to remove #{index}: {}", escape_html(reason))
}

/// `entries`: (identifier, nickname) sesuai urutan registry.
pub fn list_reply(entries: &[(String, String)]) -> String {
    if entries.is_empty() {
        return "The encryptedUid list is empty.".to_string();
    }
    let mut msg = String::from("Tracked encryptedUid list:\n");
    for (i, (_, nick)) in entries.iter().enumerate() {
        msg.push_str(&format!("{i}. {}\n", escape_html(nick)));
    }
    msg
}

pub fn help() -> String {
    "📋 Commands\n\n\
     /add &lt;encryptedUid&gt; - track a trader\n\
     /remove &lt;number&gt; - stop tracking (number from /list)\n\
     /list - tracked traders"
        .to_string()
}
