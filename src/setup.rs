// ===============================
// src/setup.rs
// ===============================
//
// Wizard interaktif: tulis .env (kredensial Telegram) + file identifier awal.
//
use std::fs;
use std::path::Path;

use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{parse_admins, parse_chat_id, validate_bot_token};
use crate::registry::is_valid_identifier;
use crate::store::{IdentifierStore, JsonFileStore, StoreError};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupAnswers {
    pub bot_token: String,
    pub chat_id: i64,
    pub admins: Vec<i64>,
    pub identifiers: Vec<String>,
}

/// Isi file .env; variabel lain tetap pakai default.
pub fn render_env(a: &SetupAnswers, identifiers_file: &Path) -> String {
    let admins: Vec<String> = a.admins.iter().map(i64::to_string).collect();
    format!(
        "TELEGRAM_BOT_TOKEN={}\nTELEGRAM_CHAT_ID={}\nTELEGRAM_ADMINS={}\nIDENTIFIERS_FILE={}\n",
        a.bot_token,
        a.chat_id,
        admins.join(","),
        identifiers_file.display()
    )
}

/// Tulis hasil wizard ke disk. Identifier ganda dibuang, urutan dipertahankan.
pub fn write_answers(a: &SetupAnswers, env_path: &Path, identifiers_file: &Path) -> Result<(), SetupError> {
    fs::write(env_path, render_env(a, identifiers_file)).map_err(|source| SetupError::Io {
        path: env_path.display().to_string(),
        source,
    })?;
    let mut ids: Vec<String> = Vec::with_capacity(a.identifiers.len());
    for id in &a.identifiers {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    JsonFileStore::new(identifiers_file).save(&ids)?;
    info!(env = %env_path.display(), identifiers = ids.len(), "setup files written");
    Ok(())
}

fn prompt_answers(theme: &ColorfulTheme) -> Result<SetupAnswers, SetupError> {
    let bot_token: String = Input::with_theme(theme)
        .with_prompt("Telegram bot token")
        .validate_with(|s: &String| validate_bot_token(s).map(|_| ()))
        .interact_text()?;
    let chat_id: String = Input::with_theme(theme)
        .with_prompt("Telegram chat ID for notifications")
        .validate_with(|s: &String| parse_chat_id(s).map(|_| ()))
        .interact_text()?;
    let admins: String = Input::with_theme(theme)
        .with_prompt("Admin chat IDs, comma separated (e.g. -123456789,123456)")
        .validate_with(|s: &String| parse_admins(s).map(|_| ()))
        .interact_text()?;

    println!("\nEnter encryptedUid values one per line, empty line to finish:");
    let mut identifiers = Vec::new();
    loop {
        let uid: String = Input::with_theme(theme)
            .with_prompt("encryptedUid")
            .allow_empty(true)
            .interact_text()?;
        let uid = uid.trim().to_string();
        if uid.is_empty() {
            break;
        }
        if !is_valid_identifier(&uid) {
            warn!(%uid, "invalid encryptedUid skipped");
            println!("  skipped: not a valid encryptedUid");
            continue;
        }
        identifiers.push(uid);
    }

    // nilai sudah tervalidasi oleh prompt
    Ok(SetupAnswers {
        bot_token: validate_bot_token(&bot_token).unwrap_or(bot_token),
        chat_id: parse_chat_id(&chat_id).unwrap_or_default(),
        admins: parse_admins(&admins).unwrap_or_default(),
        identifiers,
    })
}

pub fn execute(env_path: &Path, identifiers_file: &Path) -> Result<(), SetupError> {
    let theme = ColorfulTheme::default();
    println!("lb_tracker_rust {} setup\n", env!("CARGO_PKG_VERSION"));

    if env_path.exists() {
        let overwrite = Confirm::with_theme(&theme)
            .with_prompt(format!("{} already exists. Overwrite?", env_path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Setup aborted, nothing written.");
            return Ok(());
        }
    }

    let answers = prompt_answers(&theme)?;
    write_answers(&answers, env_path, identifiers_file)?;
    println!(
        "\nSetup done: {} and {} ({} encryptedUid).",
        env_path.display(),
        identifiers_file.display(),
        answers.identifiers.len()
    );
    Ok(())
}
