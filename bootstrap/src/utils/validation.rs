// Input validation utilities

use regex::Regex;

use crate::models::provider::ProviderId;

fn matches(pattern: &str, value: &str) -> Result<bool, String> {
    let re = Regex::new(pattern)
        .map_err(|e| format!("Internal error: failed to compile validation regex: {}", e))?;
    Ok(re.is_match(value))
}

/// Validate a database name for the given provider.
pub fn validate_database_name(provider: ProviderId, name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Database name is required.".to_string());
    }
    if name.contains('\0') {
        return Err("Database name cannot contain null bytes.".to_string());
    }

    let max_len = match provider {
        ProviderId::Postgres => 63,
        ProviderId::MySql => 64,
        ProviderId::SqlServer => 128,
        ProviderId::Local => 255,
    };
    if name.len() > max_len {
        return Err(format!(
            "Database name must be {} characters or fewer for {}.",
            max_len, provider
        ));
    }

    if provider == ProviderId::SqlServer {
        let invalid_chars = ['<', '>', ':', '"', '/', '\\', '|', '?', '*', ';'];
        if name.chars().any(|c| invalid_chars.contains(&c)) {
            return Err("Database name contains invalid characters.".to_string());
        }
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if !matches(r"^[A-Za-z0-9_.-]{3,64}$", username)? {
        return Err(
            "Username must be 3-64 characters: letters, numbers, '.', '_' or '-'.".to_string(),
        );
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.len() > 254 || !matches(r"^[^@\s]+@[^@\s]+\.[^@\s]+$", email)? {
        return Err("Email address is not valid.".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters.".to_string());
    }
    if password.trim().is_empty() {
        return Err("Password cannot be blank.".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_rules_follow_provider_limits() {
        assert!(validate_database_name(ProviderId::Postgres, "appdb").is_ok());
        assert!(validate_database_name(ProviderId::Postgres, &"a".repeat(64)).is_err());
        assert!(validate_database_name(ProviderId::SqlServer, &"a".repeat(128)).is_ok());
        assert!(validate_database_name(ProviderId::SqlServer, "bad;name").is_err());
        assert!(validate_database_name(ProviderId::MySql, "  ").is_err());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("admin").is_ok());
        assert!(validate_username("ops.admin-1").is_ok());
        assert!(validate_username("ad").is_err());
        assert!(validate_username("has space").is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("admin@example.com").is_ok());
        assert!(validate_email("admin@localhost").is_err());
        assert!(validate_email("not-an-email").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("longenough").is_ok());
        assert!(validate_password("short").is_err());
        assert!(validate_password("        ").is_err());
    }
}
