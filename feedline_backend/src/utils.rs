use chrono::{SecondsFormat, Utc};

pub const APP_NAME: &str = "feedline_backend";

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Public URL of a stored avatar file.
pub fn avatar_url(origin: &str, avatar: Option<String>) -> Option<String> {
    avatar.map(|file| format!("{}/img/avatars/{}", origin.trim_end_matches('/'), file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_urls_join_origin_once() {
        assert_eq!(
            avatar_url("http://localhost:8080/", Some("a.png".into())).as_deref(),
            Some("http://localhost:8080/img/avatars/a.png")
        );
        assert_eq!(avatar_url("http://x", None), None);
    }
}
