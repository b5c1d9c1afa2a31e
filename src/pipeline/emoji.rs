use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::platform::CustomEmoji;

static EMOJI_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\w+):").expect("hardcoded regex"));

/// Replaces `:name:` tokens with the community's emoji of the same name.
/// Unknown names are left as typed.
pub fn substitute_guild_emoji(text: &str, emoji: &[CustomEmoji]) -> String {
    if emoji.is_empty() {
        return text.to_string();
    }

    EMOJI_TOKEN
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            emoji
                .iter()
                .find(|candidate| candidate.name == name)
                .map(|candidate| candidate.reference.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
