use bcrypt::{DEFAULT_COST, hash, verify};
use uuid::Uuid;

use crate::error::AppError;

// bcrypt 是 CPU 密集操作，放到阻塞线程池执行
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash(password.as_bytes(), DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

pub async fn verify_password(password: String, password_hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify(password.as_bytes(), &password_hash))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

/// 64 位十六进制的随机会话令牌
pub fn generate_session_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub mod validation {
    use chrono::{DateTime, Utc};

    use crate::error::FieldError;

    const PASSWORD_SPECIALS: &str = "@$!%*?&";

    pub fn length(errors: &mut Vec<FieldError>, field: &str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min || len > max {
            errors.push(FieldError::new(
                field,
                format!("must be between {} and {} characters", min, max),
            ));
        }
    }

    pub fn max_length(errors: &mut Vec<FieldError>, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            errors.push(FieldError::new(field, format!("must be at most {} characters", max)));
        }
    }

    pub fn is_email(value: &str) -> bool {
        match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.chars().any(char::is_whitespace)
            }
            None => false,
        }
    }

    /// 可选的 `+`，首位 1-9，总共 2 到 15 位数字
    pub fn is_phone_number(value: &str) -> bool {
        let digits = value.strip_prefix('+').unwrap_or(value);
        (2..=15).contains(&digits.len())
            && digits.chars().all(|c| c.is_ascii_digit())
            && !digits.starts_with('0')
    }

    /// 至少各含一个小写、大写、数字和特殊字符
    pub fn is_strong_password(value: &str) -> bool {
        value.len() >= 8
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c))
            && value.chars().any(|c| c.is_ascii_lowercase())
            && value.chars().any(|c| c.is_ascii_uppercase())
            && value.chars().any(|c| c.is_ascii_digit())
            && value.chars().any(|c| PASSWORD_SPECIALS.contains(c))
    }

    pub fn parse_datetime(
        errors: &mut Vec<FieldError>,
        field: &str,
        value: &str,
    ) -> Option<DateTime<Utc>> {
        match DateTime::parse_from_rfc3339(value) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                errors.push(FieldError::new(field, "must be an ISO-8601 datetime"));
                None
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn email_shape() {
            assert!(is_email("a@b.fr"));
            assert!(!is_email("a@b"));
            assert!(!is_email("@b.fr"));
            assert!(!is_email("a b@c.fr"));
        }

        #[test]
        fn phone_numbers() {
            assert!(is_phone_number("+33612345678"));
            assert!(is_phone_number("12"));
            assert!(!is_phone_number("+0612"));
            assert!(!is_phone_number("1"));
            assert!(!is_phone_number("+1234567890123456"));
        }

        #[test]
        fn strong_password_rules() {
            assert!(is_strong_password("Test123!@"));
            assert!(!is_strong_password("test123!@"));
            assert!(!is_strong_password("Test1234"));
            assert!(!is_strong_password("Te1!"));
            assert!(!is_strong_password("Test123!#"));
        }

        #[test]
        fn datetime_parsing_reports_field() {
            let mut errors = Vec::new();
            assert!(parse_datetime(&mut errors, "departureDatetime", "2026-05-01T08:00:00Z").is_some());
            assert!(parse_datetime(&mut errors, "arrivalDatetime", "tomorrow").is_none());
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].field, "arrivalDatetime");
        }
    }
}
