//! Prompt text used by the ranking pipeline.
//!
//! Every provider gets the same instruction preamble by default so answers come
//! back in a shape the deterministic extractor can read (a numbered list, best
//! first). The assisted-extraction prompt asks for a single token reply.

use crate::gateway::Message;

/// Default instruction preamble sent as the system message with every probe question.
pub const DEFAULT_PROBE_PREAMBLE: &str = "You are an assistant that provides brief, concise \
answers. For each question, generate a short response and assign it a rank based on \
relevance and accuracy.";

/// Literal reply meaning the company is mentioned but not given a position.
pub const UNRANKED_TOKEN: &str = "unranked";

/// Literal reply meaning the company is not mentioned at all.
pub const NULL_TOKEN: &str = "null";

const RANK_EXTRACTION_SYSTEM: &str = "You read an answer produced by another assistant and \
report where a given company is ranked in it.

Rules:
- If the answer lists or ranks options and the company appears, reply with its \
position as a bare integer (e.g. 3).
- If the company is mentioned but the answer does not place it at a position, reply with: unranked
- If the company is not mentioned at all, reply with: null
- Match the company by name or by website, ignoring case.
- Reply with exactly one token. No punctuation, no explanation.";

/// Escape XML special characters so the answer text cannot close the wrapping tags.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Messages for a probe: the preamble as system message, the question as user message.
pub fn probe_messages(preamble: &str, question: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if !preamble.trim().is_empty() {
        messages.push(Message::system(preamble));
    }
    messages.push(Message::user(question));
    messages
}

/// Messages for the assisted rank extraction sub-call.
pub fn rank_extraction_messages(
    answer: &str,
    company_name: &str,
    company_url: &str,
) -> Vec<Message> {
    let user = format!(
        "<company>\n<name>{}</name>\n<website>{}</website>\n</company>\n\n\
         <answer>\n{}\n</answer>\n\n\
         Reply with the company's rank as a bare integer, or `unranked`, or `null`.",
        escape_xml_chars(company_name),
        escape_xml_chars(company_url),
        escape_xml_chars(answer),
    );
    vec![Message::system(RANK_EXTRACTION_SYSTEM), Message::user(user)]
}
