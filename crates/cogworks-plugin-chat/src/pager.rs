//! Splits completion text into platform-sized messages.
//!
//! Fenced code blocks are kept whole when they fit. A block longer than the
//! limit is cut into pieces that each close and reopen the fence, so every
//! chunk renders on its own. Plain text breaks on line ends when it can.

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;

pub const MESSAGE_LIMIT: usize = 2000;

const FENCE: &str = "```";

fn code_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("static regex"))
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").expect("static regex"))
}

/// Collapses runs of blank lines into a single newline.
pub fn normalize(text: &str) -> String {
    blank_runs().replace_all(text, "\n").into_owned()
}

/// Lazily yields chunks of at most `limit` characters. Consumed once.
#[derive(Debug)]
pub struct PagedReply {
    text: String,
    pos: usize,
    limit: usize,
    pending: VecDeque<String>,
}

impl PagedReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_limit(text, MESSAGE_LIMIT)
    }

    pub fn with_limit(text: impl Into<String>, limit: usize) -> Self {
        // A re-fenced piece needs room for two fences plus at least one char.
        let limit = limit.max(2 * FENCE.len() + 2);
        Self { text: text.into(), pos: 0, limit, pending: VecDeque::new() }
    }

    /// Normalizes blank lines first, the way completion replies are handled.
    pub fn from_completion(raw: &str) -> Self {
        Self::new(normalize(raw))
    }
}

impl Iterator for PagedReply {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if let Some(piece) = self.pending.pop_front() {
            return Some(piece);
        }

        let mut chunk = String::new();
        let mut used = 0usize;

        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let next_block = code_block().find(rest);

            match next_block {
                Some(m) if m.start() == 0 => {
                    let block = m.as_str();
                    let block_len = block.chars().count();
                    if used + block_len <= self.limit {
                        chunk.push_str(block);
                        used += block_len;
                        self.pos += m.end();
                        continue;
                    }
                    if used > 0 {
                        break;
                    }
                    let mut pieces = split_code_block(block, self.limit);
                    self.pos += m.end();
                    chunk = pieces.pop_front().unwrap_or_default();
                    self.pending = pieces;
                    break;
                }
                _ => {
                    let end = next_block.map(|m| m.start()).unwrap_or(rest.len());
                    let region = &rest[..end];
                    let room = self.limit - used;
                    let region_len = region.chars().count();
                    if region_len <= room {
                        chunk.push_str(region);
                        used += region_len;
                        self.pos += end;
                        continue;
                    }
                    let cut = match line_break_within(region, room) {
                        Some(cut) => cut,
                        None if used == 0 => byte_index_of_char(region, room),
                        None => break,
                    };
                    chunk.push_str(&region[..cut]);
                    self.pos += cut;
                    break;
                }
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }
}

/// Byte offset just past the last `\n` within the first `max_chars` chars.
fn line_break_within(text: &str, max_chars: usize) -> Option<usize> {
    let limit = byte_index_of_char(text, max_chars);
    text[..limit].rfind('\n').map(|i| i + 1)
}

fn byte_index_of_char(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

/// Language tag of a fenced block: the first line after the fence when it is a
/// single word.
fn fence_language(inner: &str) -> &str {
    match inner.split_once('\n') {
        Some((first, _)) if !first.is_empty() && !first.contains(char::is_whitespace) => first,
        _ => "",
    }
}

/// Cuts an oversized block into standalone fenced pieces.
///
/// The first piece keeps the original opening fence, later pieces reopen with
/// "```<lang>\n"; every piece but the last gets a closing "```". Stripping
/// those added fences and concatenating gives back the block unchanged.
fn split_code_block(block: &str, limit: usize) -> VecDeque<String> {
    let inner = &block[FENCE.len()..block.len() - FENCE.len()];
    let reopen = format!("{FENCE}{}\n", fence_language(inner));

    let mut pieces = VecDeque::new();
    let mut rest = inner;
    let mut first = true;
    while !rest.is_empty() {
        let open = if first { FENCE.to_string() } else { reopen.clone() };
        let open_len = open.chars().count();
        let room = limit.saturating_sub(open_len + FENCE.len()).max(1);
        let rest_len = rest.chars().count();

        if rest_len + open_len + FENCE.len() <= limit {
            pieces.push_back(format!("{open}{rest}{FENCE}"));
            break;
        }
        // A break in the first half of the room would leave a near-empty piece.
        let cut = line_break_within(rest, room)
            .filter(|&cut| rest[..cut].chars().count() * 2 >= room)
            .unwrap_or_else(|| byte_index_of_char(rest, room));
        pieces.push_back(format!("{open}{}{FENCE}", &rest[..cut]));
        rest = &rest[cut..];
        first = false;
    }
    if pieces.is_empty() {
        pieces.push_back(block.to_string());
    }
    pieces
}
