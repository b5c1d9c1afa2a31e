use std::collections::{HashMap, HashSet};

const TWITCH_EMOTE_CDN: &str = "https://static-cdn.jtvnw.net/emoticons/v2";

/// Discord's custom emoji name limits.
pub const MAX_EMOJI_NAME_CHARS: usize = 32;
const MIN_EMOJI_NAME_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteLink {
    pub name: String,
    pub url: String,
}

pub fn native_emote_url(id: &str) -> String {
    format!("{TWITCH_EMOTE_CDN}/{id}/default/dark/3.0")
}

/// Native emotes first, in position order, then any whitespace token the
/// secondary provider knows. Each name appears once.
pub fn collect_emote_links<'a>(
    text: &str,
    native: impl IntoIterator<Item = (&'a str, &'a str)>,
    provider_map: &HashMap<String, String>,
) -> Vec<EmoteLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for (id, name) in native {
        if seen.insert(name.to_string()) {
            links.push(EmoteLink {
                name: name.to_string(),
                url: native_emote_url(id),
            });
        }
    }

    if provider_map.is_empty() {
        return links;
    }

    for token in text.split_whitespace() {
        if seen.contains(token) {
            continue;
        }
        if let Some(url) = provider_map.get(token) {
            seen.insert(token.to_string());
            links.push(EmoteLink {
                name: token.to_string(),
                url: url.clone(),
            });
        }
    }

    links
}

/// Maps an emote name onto the `[A-Za-z0-9_]` alphabet custom emoji accept.
///
/// Every other character, `_` included, becomes `_<hex code point>_`, which
/// keeps the mapping reversible until truncation kicks in.
pub fn escape_emoji_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            escaped.push(ch);
        } else {
            escaped.push_str(&format!("_{:x}_", ch as u32));
        }
    }

    let mut escaped: String = escaped.chars().take(MAX_EMOJI_NAME_CHARS).collect();
    while escaped.chars().count() < MIN_EMOJI_NAME_CHARS {
        escaped.push('_');
    }
    escaped
}

#[cfg(test)]
pub fn unescape_emoji_name(escaped: &str) -> String {
    let mut output = String::with_capacity(escaped.len());
    let mut rest = escaped;

    while let Some(start) = rest.find('_') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let decoded = after.find('_').and_then(|end| {
            let hex = &after[..end];
            let ch = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)?;
            Some((ch, end))
        });

        match decoded {
            Some((ch, end)) if end > 0 => {
                output.push(ch);
                rest = &after[end + 1..];
            }
            _ => {
                output.push('_');
                rest = after;
            }
        }
    }

    output.push_str(rest);
    output
}

/// Retry URL after the platform rejected the image format.
pub fn fallback_extension(url: &str) -> Option<String> {
    url.contains(".gif").then(|| url.replace(".gif", ".webp"))
}

/// Retry URL at a smaller size after the platform rejected the upload size.
pub fn lower_resolution(url: &str) -> Option<String> {
    url.strip_suffix("3.0").map(|base| format!("{base}2.0"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::{
        collect_emote_links, escape_emoji_name, fallback_extension, lower_resolution,
        native_emote_url, unescape_emoji_name,
    };

    #[test]
    fn native_url_uses_large_dark_variant() {
        assert_eq!(
            native_emote_url("25"),
            "https://static-cdn.jtvnw.net/emoticons/v2/25/default/dark/3.0"
        );
    }

    #[test]
    fn links_are_deduplicated_first_wins() {
        let mut provider = HashMap::new();
        provider.insert("catJAM".to_string(), "https://cdn.7tv.app/emote/1/1x.gif".to_string());
        provider.insert("Kappa".to_string(), "https://cdn.7tv.app/emote/2/1x.gif".to_string());

        let links = collect_emote_links(
            "Kappa catJAM Kappa catJAM hello",
            [("25", "Kappa"), ("25", "Kappa")],
            &provider,
        );

        assert_eq!(links.len(), 2);
        assert_eq!(links[0].name, "Kappa");
        assert_eq!(links[0].url, native_emote_url("25"));
        assert_eq!(links[1].name, "catJAM");
        assert_eq!(links[1].url, "https://cdn.7tv.app/emote/1/1x.gif");
    }

    #[test_case("Kappa", "Kappa" ; "plain name")]
    #[test_case("D:", "D_3a_" ; "punctuation")]
    #[test_case("peepo_happy", "peepo_5f_happy" ; "underscore")]
    #[test_case("W", "W_" ; "padded to minimum")]
    fn escape_cases(name: &str, expected: &str) {
        assert_eq!(escape_emoji_name(name), expected);
    }

    #[test_case("D:" ; "punctuation")]
    #[test_case("peepo_happy" ; "underscore")]
    #[test_case("<3" ; "angle bracket")]
    #[test_case("héhé" ; "non ascii")]
    fn escape_round_trips(name: &str) {
        assert_eq!(unescape_emoji_name(&escape_emoji_name(name)), name);
    }

    #[test]
    fn escape_truncates_to_limit() {
        let escaped = escape_emoji_name(&"a:".repeat(20));
        assert_eq!(escaped.chars().count(), 32);
    }

    #[test]
    fn retry_url_transforms() {
        assert_eq!(
            fallback_extension("https://cdn.7tv.app/emote/1/1x.gif").as_deref(),
            Some("https://cdn.7tv.app/emote/1/1x.webp")
        );
        assert_eq!(fallback_extension("https://x/3.0"), None);
        assert_eq!(
            lower_resolution(&native_emote_url("25")).as_deref(),
            Some("https://static-cdn.jtvnw.net/emoticons/v2/25/default/dark/2.0")
        );
        assert_eq!(lower_resolution("https://cdn.7tv.app/emote/1/1x.gif"), None);
    }
}
