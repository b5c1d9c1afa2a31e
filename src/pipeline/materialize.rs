use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::emotes::{EmoteLink, escape_emoji_name, fallback_extension, lower_resolution};
use crate::error::RelayError;
use crate::platform::{ChatPlatform, CustomEmoji, EmojiCreateError};
use crate::web::metrics::Metrics;

/// Makes sure every emote exists as a custom emoji in the community.
///
/// Returns emote name → inline emoji reference for the emotes that are
/// available. A failed upload only loses that one emote.
pub async fn materialize_emotes(
    platform: &dyn ChatPlatform,
    community_id: &str,
    links: &[EmoteLink],
    existing: &[CustomEmoji],
) -> HashMap<String, String> {
    let mut references = HashMap::new();
    let mut pending = Vec::new();

    for link in links {
        let escaped = escape_emoji_name(&link.name);
        match existing.iter().find(|emoji| emoji.name == escaped) {
            Some(emoji) => {
                references.insert(link.name.clone(), emoji.reference.clone());
            }
            None => pending.push((link, escaped)),
        }
    }

    let uploads = pending.into_iter().map(|(link, escaped)| async move {
        let outcome = upload_with_retry(platform, community_id, &escaped, &link.url).await;
        (link, outcome)
    });

    for (link, outcome) in join_all(uploads).await {
        match outcome {
            Ok(emoji) => {
                Metrics::emote_materialized();
                info!(
                    "materialized emote {} as {} in community={}",
                    link.name, emoji.name, community_id
                );
                references.insert(link.name.clone(), emoji.reference);
            }
            Err(err) => {
                let err = RelayError::EmoteMaterializationFailed {
                    name: link.name.clone(),
                    reason: err.to_string(),
                };
                warn!("community={}: {}", community_id, err);
            }
        }
    }

    references
}

async fn upload_with_retry(
    platform: &dyn ChatPlatform,
    community_id: &str,
    name: &str,
    url: &str,
) -> Result<CustomEmoji, EmojiCreateError> {
    let err = match platform.create_custom_emoji(community_id, name, url).await {
        Ok(emoji) => return Ok(emoji),
        Err(err) => err,
    };

    let retry_url = match &err {
        EmojiCreateError::NameInvalid(_) => fallback_extension(url),
        EmojiCreateError::QuotaExceeded(_) => lower_resolution(url),
        EmojiCreateError::Other(_) => None,
    };

    match retry_url {
        Some(retry_url) => {
            debug!("retrying emote {} with {} after: {}", name, retry_url, err);
            platform.create_custom_emoji(community_id, name, &retry_url).await
        }
        None => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::materialize_emotes;
    use crate::pipeline::emotes::{EmoteLink, native_emote_url};
    use crate::platform::EmojiCreateError;
    use crate::platform::fake::FakePlatform;

    fn link(name: &str, url: &str) -> EmoteLink {
        EmoteLink {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn existing_emoji_are_not_uploaded_again() {
        let platform = FakePlatform::new();
        platform.state.lock().add_emoji("g1", "Kappa");
        let existing = platform.state.lock().emoji["g1"].clone();

        let refs = materialize_emotes(
            &platform,
            "g1",
            &[link("Kappa", &native_emote_url("25")), link("D:", "https://x/1x.gif")],
            &existing,
        )
        .await;

        assert_eq!(refs["Kappa"], "<emoji:Kappa>");
        assert_eq!(refs["D:"], "<emoji:D_3a_>");
        let uploads = platform.state.lock().emoji_uploads.clone();
        assert_eq!(uploads, vec![("D_3a_".to_string(), "https://x/1x.gif".to_string())]);
    }

    #[tokio::test]
    async fn invalid_image_retries_as_webp() {
        let platform = FakePlatform::new();
        platform.state.lock().emoji_failures.insert(
            "https://cdn/1x.gif".to_string(),
            EmojiCreateError::NameInvalid("bad image".to_string()),
        );

        let refs =
            materialize_emotes(&platform, "g1", &[link("catJAM", "https://cdn/1x.gif")], &[]).await;

        assert_eq!(refs["catJAM"], "<emoji:catJAM>");
        let uploads = platform.state.lock().emoji_uploads.clone();
        assert_eq!(uploads[1].1, "https://cdn/1x.webp");
    }

    #[tokio::test]
    async fn quota_retries_at_lower_resolution_once() {
        let platform = FakePlatform::new();
        let big = native_emote_url("25");
        let small = big.replace("3.0", "2.0");
        {
            let mut state = platform.state.lock();
            state
                .emoji_failures
                .insert(big.clone(), EmojiCreateError::QuotaExceeded("too big".to_string()));
            state
                .emoji_failures
                .insert(small.clone(), EmojiCreateError::QuotaExceeded("too big".to_string()));
        }

        let refs = materialize_emotes(&platform, "g1", &[link("Kappa", &big)], &[]).await;

        assert!(refs.is_empty());
        assert_eq!(platform.state.lock().emoji_uploads.len(), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let platform = FakePlatform::new();
        platform.state.lock().emoji_failures.insert(
            "https://cdn/broken.png".to_string(),
            EmojiCreateError::Other("boom".to_string()),
        );

        let refs = materialize_emotes(
            &platform,
            "g1",
            &[link("broken", "https://cdn/broken.png"), link("fine", "https://cdn/fine.png")],
            &[],
        )
        .await;

        assert!(!refs.contains_key("broken"));
        assert_eq!(refs["fine"], "<emoji:fine>");
        assert_eq!(platform.state.lock().emoji_uploads.len(), 2);
    }
}
