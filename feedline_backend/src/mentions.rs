use regex::Regex;
use std::sync::OnceLock;

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@([A-Za-z0-9]+)").expect("mention pattern compiles"))
}

/// Usernames mentioned in `content`, first occurrence order, without repeats.
pub fn collect_mentions(content: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for capture in mention_pattern().captures_iter(content) {
        let username = &capture[1];
        if !mentions.iter().any(|seen| seen == username) {
            mentions.push(username.to_string());
        }
    }
    mentions
}
