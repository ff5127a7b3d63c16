//! Text rendering for the PIN dialog

use kasir_auth::{countdown_label, AuthOutcome, ConfigError, CredentialEntry, LockoutSnapshot};

/// Shown once a session has been locked out twice
pub const HELP_HINT: &str =
    "Having trouble? Ask the shop owner to confirm or reset your PIN before trying again.";

/// One-line summary of an authentication outcome
pub fn outcome_line(outcome: &AuthOutcome) -> String {
    match outcome {
        AuthOutcome::Success { identity } => match &identity.role {
            Some(role) => format!("Welcome, {} ({})", identity.label, role),
            None => format!("Welcome, {}", identity.label),
        },
        AuthOutcome::Failure { remaining_attempts } => format!(
            "Incorrect PIN. {} attempt{} remaining.",
            remaining_attempts,
            if *remaining_attempts == 1 { "" } else { "s" }
        ),
        AuthOutcome::Locked { remaining_ms, .. } => format!(
            "Too many incorrect PINs. Locked for {}.",
            countdown_label(*remaining_ms)
        ),
        AuthOutcome::DirectoryError { reason } => {
            format!("Could not check the PIN right now ({}). Please try again.", reason)
        }
    }
}

/// Whether the help hint belongs under this outcome
pub fn needs_help_hint(outcome: &AuthOutcome) -> bool {
    matches!(
        outcome,
        AuthOutcome::Locked {
            help_advised: true,
            ..
        }
    )
}

pub fn countdown_line(remaining_ms: u64) -> String {
    format!("Locked. Time remaining: {}", countdown_label(remaining_ms))
}

pub fn locked_line(snapshot: &LockoutSnapshot) -> String {
    format!(
        "Still locked. Try again in {}.",
        snapshot.countdown_label()
    )
}

pub fn unlocked_line(snapshot: &LockoutSnapshot) -> String {
    format!(
        "Unlocked. {} attempts before the next lockout.",
        snapshot.remaining_attempts
    )
}

/// Line for `hash-pin`: the bare hash, or a full `[[credential]]` table when `id` is set
pub fn credential_block(
    hash: &str,
    id: Option<&str>,
    label: Option<&str>,
    role: Option<&str>,
) -> Result<String, ConfigError> {
    let Some(id) = id else {
        return Ok(hash.to_string());
    };

    let entry = CredentialEntry {
        id: id.to_string(),
        label: label.unwrap_or(id).to_string(),
        role: role.map(str::to_string),
        pin_hash: hash.to_string(),
    };
    Ok(entry.to_toml()?.trim().to_string())
}

/// Dialog notice that is not an outcome; a JSON object under `--json`
pub fn notice(message: &str, json: bool) -> String {
    if json {
        serde_json::json!({ "notice": message }).to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasir_auth::{hash_pin, HashedDirectory, Identity, Pin};

    #[test]
    fn test_outcome_lines() {
        let success = AuthOutcome::Success {
            identity: Identity::new("owner-1", "Budi").with_role("owner"),
        };
        assert_eq!(outcome_line(&success), "Welcome, Budi (owner)");

        assert_eq!(
            outcome_line(&AuthOutcome::Failure { remaining_attempts: 1 }),
            "Incorrect PIN. 1 attempt remaining."
        );
        assert_eq!(
            outcome_line(&AuthOutcome::Failure { remaining_attempts: 4 }),
            "Incorrect PIN. 4 attempts remaining."
        );

        let locked = AuthOutcome::Locked {
            remaining_ms: 180_000,
            escalation_count: 1,
            help_advised: false,
        };
        assert_eq!(
            outcome_line(&locked),
            "Too many incorrect PINs. Locked for 03:00."
        );
        assert!(!needs_help_hint(&locked));
        assert!(needs_help_hint(&AuthOutcome::Locked {
            remaining_ms: 180_000,
            escalation_count: 2,
            help_advised: true,
        }));
    }

    #[test]
    fn test_countdown_line() {
        assert_eq!(countdown_line(61_000), "Locked. Time remaining: 01:01");
    }

    #[test]
    fn test_credential_block() {
        assert_eq!(
            credential_block("$argon2id$x", None, None, None).unwrap(),
            "$argon2id$x"
        );

        let block =
            credential_block("$argon2id$x", Some("owner-1"), Some("Budi"), Some("owner")).unwrap();
        assert!(block.starts_with("[[credential]]"));
        assert!(block.contains(r#"label = "Budi""#));
        assert!(block.contains(r#"role = "owner""#));
    }

    #[test]
    fn test_credential_block_escapes_label() {
        let hash = hash_pin(&Pin::parse("802417").unwrap()).unwrap();
        let label = r#"Budi "Bos" Santoso \ Cabang 2"#;
        let block = credential_block(&hash, Some("owner-1"), Some(label), None).unwrap();

        let directory = HashedDirectory::from_toml_str(&block).unwrap();
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_notice_is_json_under_json_mode() {
        assert_eq!(notice("Still locked.", false), "Still locked.");

        let line = notice(r#"PIN "12a" is malformed"#, true);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["notice"], r#"PIN "12a" is malformed"#);
    }
}
