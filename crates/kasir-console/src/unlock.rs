//! Interactive PIN dialog over stdin

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use zeroize::Zeroizing;

use kasir_auth::{
    AuthConfig, AuthOutcome, AuthenticationSession, CompositionState, HashedDirectory, Pin,
    SessionEvent,
};

use crate::render;

/// Run one PIN dialog; returns whether someone authenticated
pub async fn run(credentials: &Path, config: AuthConfig, json: bool) -> Result<bool> {
    let directory = HashedDirectory::load(credentials)
        .with_context(|| format!("Failed to load credentials from {:?}", credentials))?;
    if directory.is_empty() {
        warn!("Credentials file {:?} has no entries", credentials);
    }

    let session = AuthenticationSession::builder(Arc::new(directory))
        .config(config)
        .build();
    info!("PIN dialog open (session {})", session.id());

    let mut events = session
        .take_events()
        .context("Session event stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Countdown { remaining_ms } => {
                    eprint!("\r{}", render::countdown_line(remaining_ms));
                    let _ = std::io::stderr().flush();
                }
                SessionEvent::Unlocked(snapshot) => {
                    eprintln!("\n{}", render::unlocked_line(&snapshot));
                }
            }
        }
    });

    println!("Enter your 6-digit PIN (q to quit):");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut authenticated = false;

    while let Some(line) = lines.next_line().await? {
        let line = Zeroizing::new(line);
        let input = line.trim();
        if input.eq_ignore_ascii_case("q") {
            break;
        }
        if let Err(e) = Pin::parse(input) {
            println!("{}", render::notice(&e.to_string(), json));
            continue;
        }

        if let Some(outcome) = submit(&session, input, json).await? {
            report(&outcome, json)?;
            if matches!(outcome, AuthOutcome::Success { .. }) {
                authenticated = true;
                break;
            }
        }
    }

    session.cancel()?;
    drop(session);
    let _ = printer.await;

    Ok(authenticated)
}

/// Feed a validated PIN digit by digit
async fn submit(
    session: &AuthenticationSession,
    input: &str,
    json: bool,
) -> Result<Option<AuthOutcome>> {
    for (index, byte) in input.bytes().enumerate() {
        match session.submit_digit(index, byte - b'0').await? {
            CompositionState::Composing { .. } => continue,
            CompositionState::Ignored(snapshot) => {
                println!("{}", render::notice(&render::locked_line(&snapshot), json));
                return Ok(None);
            }
            CompositionState::Submitted(outcome) => return Ok(Some(outcome)),
        }
    }
    Ok(None)
}

fn report(outcome: &AuthOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(outcome)?);
        return Ok(());
    }
    println!("{}", render::outcome_line(outcome));
    if render::needs_help_hint(outcome) {
        println!("{}", render::HELP_HINT);
    }
    Ok(())
}
