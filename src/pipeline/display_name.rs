use crate::utils::formatting::truncate_chars;

/// Webhook usernames longer than this are rejected by Discord.
pub const MAX_DISPLAY_NAME_CHARS: usize = 80;

pub struct DisplayNameRules<'a> {
    pub reserved_user: Option<&'a str>,
    pub marker: &'a str,
}

pub fn format_display_name(username: &str, pronoun_suffix: &str, rules: &DisplayNameRules<'_>) -> String {
    let is_reserved = rules
        .reserved_user
        .is_some_and(|reserved| reserved.eq_ignore_ascii_case(username));

    let name = if is_reserved {
        format!("{} {}{}", rules.marker, username, pronoun_suffix)
    } else {
        format!("{username}{pronoun_suffix}")
    };

    truncate_chars(&name, MAX_DISPLAY_NAME_CHARS)
}

/// Whether a relayed message's author name belongs to `username`, ignoring the
/// marker prefix and the pronoun suffix.
pub fn author_matches(author_name: &str, username: &str, marker: &str) -> bool {
    let mut name = author_name.trim();
    if !marker.is_empty() {
        if let Some(rest) = name.strip_prefix(marker) {
            name = rest.trim_start();
        }
    }
    if let Some(open) = name.find(" (") {
        if name.ends_with(')') {
            name = &name[..open];
        }
    }
    name.eq_ignore_ascii_case(username.trim())
}
