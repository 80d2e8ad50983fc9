// Logging utilities
// Dual-format logging (JSON lines + human-readable text) with secret masking.
//
// Messages carry `[PHASE: ...]` and `[STEP: ...]` tags; the formatters lift them into
// dedicated fields so the JSON log can be filtered per orchestration step.

use log::Level;
use serde_json::json;
use std::path::Path;

/// Mask a sensitive value, keeping the first/last four characters of long values.
pub fn mask_sensitive(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Mask credentials in a connection string while keeping host/database visible.
///
/// Handles URL-style strings (`postgres://`, `mysql://`), semicolon key/value strings
/// (SQL Server) and `file:` paths (left unchanged).
pub fn mask_connection_string(conn_str: &str) -> String {
    let s = conn_str.trim();
    if s.is_empty() || s.starts_with("file:") {
        return s.to_string();
    }

    if s.contains("://") {
        // Unparseable URL: hide everything rather than risk leaking a password.
        return mask_url_userinfo(s).unwrap_or_else(|| "***".to_string());
    }

    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(mask_kv_part)
        .collect::<Vec<_>>()
        .join(";")
}

fn mask_kv_part(part: &str) -> String {
    let Some((key, value)) = part.split_once('=') else {
        return part.to_string();
    };
    let norm = key.trim().to_ascii_lowercase().replace([' ', '_'], "");
    match norm.as_str() {
        "password" | "pwd" => format!("{}=***", key.trim()),
        "userid" | "user" | "username" | "uid" => {
            format!("{}={}", key.trim(), mask_sensitive(value.trim()))
        }
        _ => part.to_string(),
    }
}

fn mask_url_userinfo(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    // rsplit: passwords may contain '@'
    let Some((userinfo, host_part)) = rest.rsplit_once('@') else {
        return Some(url.to_string());
    };
    if userinfo.is_empty() {
        return Some(url.to_string());
    }
    let (user, has_password) = match userinfo.split_once(':') {
        Some((u, _)) => (u, true),
        None => (userinfo, false),
    };
    let user = if user.is_empty() {
        String::new()
    } else {
        mask_sensitive(user)
    };
    Some(if has_password {
        format!("{}://{}:***@{}", scheme, user, host_part)
    } else {
        format!("{}://{}@{}", scheme, user, host_part)
    })
}

/// Split `[PHASE: x] [STEP: y] message` into `(phase, step, message)`.
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let (phase, rest) = take_tag(message, "[PHASE:");
    let (step, rest) = take_tag(&rest, "[STEP:");
    (phase, step, rest)
}

fn take_tag(message: &str, open: &str) -> (Option<String>, String) {
    let Some(start) = message.find(open) else {
        return (None, message.to_string());
    };
    let Some(len) = message[start..].find(']') else {
        return (None, message.to_string());
    };
    let value = message[start + open.len()..start + len].trim().to_string();
    let cleaned = format!("{} {}", &message[..start], &message[start + len + 1..])
        .trim()
        .to_string();
    (Some(value), cleaned)
}

pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });
    if let Some(phase) = phase {
        entry["phase"] = json!(phase);
    }
    if let Some(step) = step {
        entry["step"] = json!(step);
    }
    serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut line = format!("[{}] [{}]", timestamp, level.as_str());
    if let Some(phase) = phase {
        line.push_str(&format!(" [PHASE: {}]", phase));
    }
    if let Some(step) = step {
        line.push_str(&format!(" [STEP: {}]", step));
    }
    line.push_str(&format!(" [{}] {}", target, message));
    line
}

fn human_dispatch() -> fern::Dispatch {
    fern::Dispatch::new().format(|out, message, record| {
        let (phase, step, cleaned) = parse_log_metadata(&message.to_string());
        out.finish(format_args!(
            "{}",
            format_human_readable_log(
                &chrono::Local::now()
                    .format("%Y-%m-%d %H:%M:%S%.3f")
                    .to_string(),
                record.level(),
                record.target(),
                &cleaned,
                phase.as_deref(),
                step.as_deref(),
            )
        ))
    })
}

/// Install the global logger: JSON lines to `bootstrap-<ts>.log`, text to `bootstrap-<ts>.txt`,
/// and optionally text to stdout. fern appends the line separator for each output.
pub fn init_logging(log_dir: &Path, level: log::LevelFilter, with_stdout: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let stamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_file = log_dir.join(format!("bootstrap-{}.log", stamp));
    let txt_file = log_dir.join(format!("bootstrap-{}.txt", stamp));

    let mut dispatch = fern::Dispatch::new().level(level);
    if with_stdout {
        dispatch = dispatch.chain(human_dispatch().chain(std::io::stdout()));
    }

    dispatch
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    let (phase, step, cleaned) = parse_log_metadata(&message.to_string());
                    out.finish(format_args!(
                        "{}",
                        format_json_log(
                            &chrono::Utc::now().to_rfc3339(),
                            record.level(),
                            record.target(),
                            &cleaned,
                            phase.as_deref(),
                            step.as_deref(),
                        )
                    ))
                })
                .chain(fern::log_file(json_file)?),
        )
        .chain(human_dispatch().chain(fern::log_file(txt_file)?))
        .apply()?;

    log::info!(
        "[PHASE: startup] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}
