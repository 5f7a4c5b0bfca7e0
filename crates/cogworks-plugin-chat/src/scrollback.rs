use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use cogworks_core::{ChannelId, ConversationMessage};

/// Bounded per-channel memory of recent turns, oldest dropped first.
pub struct Scrollback {
    channels: Mutex<HashMap<ChannelId, VecDeque<ConversationMessage>>>,
    capacity: usize,
}

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        Self { channels: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
    }

    /// Records a question and its answer together, so a turn is never kept
    /// without its reply.
    pub fn push_exchange(&self, channel: ChannelId, asked: ConversationMessage, answer: ConversationMessage) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let turns = channels.entry(channel).or_default();
        turns.push_back(asked);
        turns.push_back(answer);
        while turns.len() > self.capacity {
            turns.pop_front();
        }
    }

    pub fn recent(&self, channel: ChannelId) -> Vec<ConversationMessage> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(&channel).map(|t| t.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_turns() {
        let scrollback = Scrollback::new(3);
        for i in 0..3 {
            scrollback.push_exchange(
                7,
                ConversationMessage::user(format!("q{i}")),
                ConversationMessage::assistant(format!("a{i}")),
            );
        }
        let texts: Vec<String> = scrollback.recent(7).iter().map(|m| m.content.text()).collect();
        assert_eq!(texts, vec!["a1", "q2", "a2"]);
    }

    #[test]
    fn channels_are_independent() {
        let scrollback = Scrollback::new(4);
        scrollback.push_exchange(1, ConversationMessage::user("a"), ConversationMessage::assistant("b"));
        scrollback.push_exchange(2, ConversationMessage::user("c"), ConversationMessage::assistant("d"));
        assert_eq!(scrollback.recent(1).len(), 2);
        assert_eq!(scrollback.recent(2)[0].content.text(), "c");
        assert!(scrollback.recent(3).is_empty());
        assert_eq!(scrollback.channel_count(), 2);
    }
}
