//! Turns recent channel history into a role-tagged conversation.

use std::collections::{BTreeMap, HashMap};

use cogworks_core::{
    CogError, ContentPart, ConversationMessage, ImageUrl, MessageContent, MessageKind, Platform,
    Result, Role, UserId,
};
use cogworks_core::platform::ChannelMessage;
use regex::Regex;
use tracing::debug;

/// Inputs for one extraction. The channel is the trigger's channel.
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub trigger: &'a ChannelMessage,
    /// User id -> real name / title, from the capability lookup table.
    pub names: Option<&'a HashMap<UserId, String>>,
    pub full_history: bool,
    pub depth: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub title: String,
    pub messages: Vec<ConversationMessage>,
    /// `@handle` -> resolved name, for the authors that appear in `messages`.
    pub display_names: BTreeMap<String, String>,
}

/// Walks history backward from the trigger and returns the conversation in
/// chronological order, trigger last.
///
/// The walk stops at the depth limit, at a topic boundary, or at a bot
/// message that is not a chat answer (dashboards, embeds).
pub async fn extract_conversation(
    platform: &dyn Platform,
    request: ContextRequest<'_>,
) -> Result<ConversationContext> {
    let trigger = request.trigger;
    let bot_id = platform.bot_user_id();

    let mut chain: Vec<ChannelMessage> = Vec::new();
    if request.full_history && request.depth > 0 {
        let history = platform
            .history_before(trigger.channel_id, trigger.id, request.depth)
            .await
            .map_err(|e| {
                CogError::HistoryExtraction(format!(
                    "history of channel {} unavailable: {e}",
                    trigger.channel_id
                ))
            })?;
        for message in history {
            if message.kind == MessageKind::Boundary {
                break;
            }
            if message.author.id == bot_id && !is_chat_answer(&message) {
                break;
            }
            chain.push(message);
        }
        chain.reverse();
    }
    chain.push(trigger.clone());

    let mention = bot_mention_pattern(bot_id);
    let messages: Vec<ConversationMessage> = chain
        .iter()
        .filter_map(|m| to_conversation_message(m, bot_id, &mention, request.full_history))
        .collect();

    if messages.is_empty() {
        return Err(CogError::HistoryExtraction(format!(
            "no retrievable messages in channel {}",
            trigger.channel_id
        )));
    }

    // The lookup table wins over the platform's own display name.
    let mut display_names = BTreeMap::new();
    for m in chain.iter().filter(|m| m.author.id != bot_id) {
        let looked_up = request.names.and_then(|names| names.get(&m.author.id));
        if let Some(name) = looked_up.or(m.author.display_name.as_ref()) {
            if *name != m.author.name {
                display_names.insert(format!("@{}", m.author.name), name.clone());
            }
        }
    }

    let title = match platform.channel_name(trigger.channel_id).await {
        Ok(name) => format!("#{name}"),
        Err(e) => {
            debug!(channel_id = trigger.channel_id, "No channel name for title: {e}");
            "conversation".to_string()
        }
    };

    debug!(
        channel_id = trigger.channel_id,
        messages = messages.len(),
        names = display_names.len(),
        "Extracted conversation"
    );
    Ok(ConversationContext { title, messages, display_names })
}

/// The trigger alone, with the bot mention removed. `None` when nothing is
/// left to answer.
pub fn single_turn(trigger: &ChannelMessage, bot_id: UserId) -> Option<ConversationMessage> {
    let mention = bot_mention_pattern(bot_id);
    to_conversation_message(trigger, bot_id, &mention, false)
}

pub fn strip_mentions(text: &str, bot_id: UserId) -> String {
    bot_mention_pattern(bot_id).replace_all(text, "").trim().to_string()
}

fn bot_mention_pattern(bot_id: UserId) -> Regex {
    // The id is numeric, so the pattern is always valid.
    Regex::new(&format!(r"<@!?{bot_id}>\s?")).expect("mention pattern")
}

fn is_chat_answer(message: &ChannelMessage) -> bool {
    !message.has_embeds && !message.content.trim().is_empty()
}

fn to_conversation_message(
    message: &ChannelMessage,
    bot_id: UserId,
    mention: &Regex,
    tag_author: bool,
) -> Option<ConversationMessage> {
    let role = if message.author.id == bot_id { Role::Assistant } else { Role::User };

    let stripped = mention.replace_all(&message.content, "");
    let stripped = stripped.trim();
    let text = if tag_author && role == Role::User && !stripped.is_empty() {
        format!("@{}: {stripped}", message.author.name)
    } else {
        stripped.to_string()
    };

    let images: Vec<ContentPart> = message
        .attachments
        .iter()
        .filter(|a| a.is_image())
        .map(|a| ContentPart::ImageUrl { image_url: ImageUrl { url: a.url.clone() } })
        .collect();

    let content = if images.is_empty() {
        if text.is_empty() {
            return None;
        }
        MessageContent::Text(text)
    } else {
        let mut parts = Vec::with_capacity(images.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::Text { text });
        }
        parts.extend(images);
        MessageContent::Parts(parts)
    };

    Some(ConversationMessage { role, content })
}

#[cfg(test)]
mod tests {
    use cogworks_core::testing::{incoming, FakePlatform};
    use cogworks_core::{Attachment, Author};

    use super::*;

    const BOT: UserId = 99;
    const CHANNEL: u64 = 50;

    fn from_bot(id: u64, content: &str) -> ChannelMessage {
        let mut m = incoming(BOT, CHANNEL, id, content);
        m.author = Author { id: BOT, name: "sabby".into(), display_name: None, bot: true };
        m
    }

    fn mention(id: u64, author: UserId, content: &str) -> ChannelMessage {
        let mut m = incoming(author, CHANNEL, id, content);
        m.mentions = vec![BOT];
        m
    }

    fn request(trigger: &ChannelMessage) -> ContextRequest<'_> {
        ContextRequest { trigger, names: None, full_history: true, depth: 20 }
    }

    fn roles(ctx: &ConversationContext) -> Vec<Role> {
        ctx.messages.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn three_prior_messages_plus_mention_give_four_entries() {
        let platform = FakePlatform::new(BOT);
        platform.seed_history(
            CHANNEL,
            vec![
                incoming(1, CHANNEL, 1, "what's a monad?"),
                from_bot(2, "A monoid in the category of endofunctors."),
                incoming(2, CHANNEL, 3, "lol"),
            ],
        );
        let trigger = mention(4, 1, "<@99> explain simpler");

        let ctx = extract_conversation(&platform, request(&trigger)).await.unwrap();

        assert_eq!(roles(&ctx), vec![Role::User, Role::Assistant, Role::User, Role::User]);
        assert_eq!(ctx.messages[3].content, MessageContent::Text("@user1: explain simpler".into()));
        assert_eq!(
            ctx.messages[1].content,
            MessageContent::Text("A monoid in the category of endofunctors.".into())
        );
        assert_eq!(ctx.title, "#channel-50");
    }

    #[tokio::test]
    async fn walk_stops_at_topic_boundary() {
        let platform = FakePlatform::new(BOT);
        let mut boundary = incoming(1, CHANNEL, 2, "");
        boundary.kind = MessageKind::Boundary;
        platform.seed_history(
            CHANNEL,
            vec![incoming(1, CHANNEL, 1, "old topic"), boundary, incoming(1, CHANNEL, 3, "new topic")],
        );
        let trigger = mention(4, 1, "<@99> go");

        let ctx = extract_conversation(&platform, request(&trigger)).await.unwrap();
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].content.text(), "@user1: new topic");
    }

    #[tokio::test]
    async fn walk_stops_at_bot_message_outside_answer_chain() {
        let platform = FakePlatform::new(BOT);
        let mut dashboard = from_bot(2, "");
        dashboard.has_embeds = true;
        platform.seed_history(
            CHANNEL,
            vec![incoming(1, CHANNEL, 1, "earlier"), dashboard, incoming(1, CHANNEL, 3, "hey")],
        );
        let trigger = mention(4, 1, "<@99> status?");

        let ctx = extract_conversation(&platform, request(&trigger)).await.unwrap();
        assert_eq!(roles(&ctx), vec![Role::User, Role::User]);
    }

    #[tokio::test]
    async fn depth_limits_the_walk() {
        let platform = FakePlatform::new(BOT);
        platform.seed_history(
            CHANNEL,
            (1..=10).map(|i| incoming(1, CHANNEL, i, &format!("m{i}"))).collect(),
        );
        let trigger = mention(11, 1, "<@99> hi");
        let req = ContextRequest { depth: 3, ..request(&trigger) };

        let ctx = extract_conversation(&platform, req).await.unwrap();
        let texts: Vec<String> = ctx.messages.iter().map(|m| m.content.text()).collect();
        assert_eq!(texts, vec!["@user1: m8", "@user1: m9", "@user1: m10", "@user1: hi"]);
    }

    #[tokio::test]
    async fn image_attachments_become_image_parts() {
        let platform = FakePlatform::new(BOT);
        let mut trigger = mention(4, 1, "<@99> what is this");
        trigger.attachments = vec![
            Attachment {
                url: "https://cdn.example/cat.png".into(),
                filename: "cat.png".into(),
                content_type: Some("image/png".into()),
            },
            Attachment {
                url: "https://cdn.example/notes.txt".into(),
                filename: "notes.txt".into(),
                content_type: Some("text/plain".into()),
            },
        ];

        let ctx = extract_conversation(&platform, request(&trigger)).await.unwrap();
        assert_eq!(
            ctx.messages[0].content,
            MessageContent::Parts(vec![
                ContentPart::Text { text: "@user1: what is this".into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: "https://cdn.example/cat.png".into() }
                },
            ])
        );
    }

    #[tokio::test]
    async fn denied_history_is_an_extraction_error() {
        let platform = FakePlatform::new(BOT);
        platform.deny_history();
        let trigger = mention(4, 1, "<@99> hi");
        let err = extract_conversation(&platform, request(&trigger)).await.unwrap_err();
        assert!(matches!(err, CogError::HistoryExtraction(_)));
    }

    #[tokio::test]
    async fn empty_channel_with_bare_mention_is_an_extraction_error() {
        let platform = FakePlatform::new(BOT);
        let trigger = mention(4, 1, "<@99>");
        let err = extract_conversation(&platform, request(&trigger)).await.unwrap_err();
        assert!(matches!(err, CogError::HistoryExtraction(_)));
    }

    #[tokio::test]
    async fn single_turn_mode_ignores_history() {
        let platform = FakePlatform::new(BOT);
        platform.seed_history(CHANNEL, vec![incoming(1, CHANNEL, 1, "ignored")]);
        let trigger = mention(4, 1, "<@!99> just this");
        let req = ContextRequest { full_history: false, ..request(&trigger) };

        let ctx = extract_conversation(&platform, req).await.unwrap();
        assert_eq!(ctx.messages, vec![ConversationMessage::user("just this")]);
    }

    #[tokio::test]
    async fn known_authors_get_display_names() {
        let platform = FakePlatform::new(BOT);
        platform.seed_history(CHANNEL, vec![incoming(2, CHANNEL, 1, "hi")]);
        let trigger = mention(4, 1, "<@99> hello");
        let names = HashMap::from([(1, "Sol (creator)".to_string()), (7, "Absent".to_string())]);
        let req = ContextRequest { names: Some(&names), ..request(&trigger) };

        let ctx = extract_conversation(&platform, req).await.unwrap();
        assert_eq!(
            ctx.display_names,
            BTreeMap::from([("@user1".to_string(), "Sol (creator)".to_string())])
        );
        assert!(ctx.messages.iter().all(|m| !m.content.text().contains("Sol")));
    }

    #[tokio::test]
    async fn platform_display_names_fill_in_for_unlisted_authors() {
        let platform = FakePlatform::new(BOT);
        let mut listed = incoming(1, CHANNEL, 1, "hi");
        listed.author.display_name = Some("Solstice".into());
        let mut unlisted = incoming(2, CHANNEL, 2, "hey");
        unlisted.author.display_name = Some("Marguerite".into());
        let mut same = incoming(3, CHANNEL, 3, "yo");
        same.author.display_name = Some("user3".into());
        platform.seed_history(CHANNEL, vec![listed, unlisted, same]);
        let trigger = mention(4, 5, "<@99> hello");
        let names = HashMap::from([(1, "Sol (creator)".to_string())]);
        let req = ContextRequest { names: Some(&names), ..request(&trigger) };

        let ctx = extract_conversation(&platform, req).await.unwrap();
        assert_eq!(
            ctx.display_names,
            BTreeMap::from([
                ("@user1".to_string(), "Sol (creator)".to_string()),
                ("@user2".to_string(), "Marguerite".to_string()),
            ])
        );
    }

    #[test]
    fn single_turn_strips_mention_and_rejects_empty() {
        let trigger = mention(4, 1, "<@99>   ");
        assert_eq!(single_turn(&trigger, BOT), None);
        let trigger = mention(4, 1, "<@99> hello <@99>");
        assert_eq!(single_turn(&trigger, BOT), Some(ConversationMessage::user("hello")));
    }
}
