//! Conversion of conversation messages into oracle requests

use super::{Message, Role};
use crate::llm::{ContentBlock, LlmMessage, MessageRole, SystemContent};
use std::collections::HashSet;

/// Faithful conversion for the capability router.
///
/// System messages become system blocks. Invocation requests become tool-use
/// blocks, and a responder result becomes a tool-result block when an earlier
/// message requested its invocation id. Consecutive messages of the same
/// oracle role are merged into one.
pub fn to_llm_messages(messages: &[Message]) -> (Vec<SystemContent>, Vec<LlmMessage>) {
    let mut system = Vec::new();
    let mut out: Vec<LlmMessage> = Vec::new();
    let mut requested: HashSet<&str> = HashSet::new();

    for message in messages {
        let (role, blocks) = match message.role {
            Role::System => {
                system.push(SystemContent::new(message.content.clone()));
                continue;
            }
            Role::User => (MessageRole::User, vec![ContentBlock::text(&message.content)]),
            Role::Assistant => match message.reply_to.as_deref() {
                Some(id) if requested.contains(id) => (
                    MessageRole::User,
                    vec![ContentBlock::tool_result(id, &message.content)],
                ),
                _ => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(ContentBlock::text(attributed(message)));
                    }
                    for invocation in &message.tool_invocations {
                        requested.insert(invocation.id.as_str());
                        blocks.push(ContentBlock::tool_use(
                            &invocation.id,
                            &invocation.name,
                            invocation.arguments.clone(),
                        ));
                    }
                    (MessageRole::Assistant, blocks)
                }
            },
        };

        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(LlmMessage {
                role,
                content: blocks,
            }),
        }
    }

    (system, out)
}

/// Text-only conversion for responders that answer from the conversation.
///
/// Invocation requests are dropped; responder results are kept as assistant
/// text labelled with their origin.
pub fn plain_transcript(messages: &[Message]) -> (Vec<SystemContent>, Vec<LlmMessage>) {
    let mut system = Vec::new();
    let mut out: Vec<LlmMessage> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => {
                system.push(SystemContent::new(message.content.clone()));
                continue;
            }
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        };
        if message.content.is_empty() {
            continue;
        }
        let block = ContentBlock::text(attributed(message));
        match out.last_mut() {
            Some(last) if last.role == role => last.content.push(block),
            _ => out.push(LlmMessage {
                role,
                content: vec![block],
            }),
        }
    }

    (system, out)
}

fn attributed(message: &Message) -> String {
    match &message.origin {
        Some(origin) if message.reply_to.is_some() => format!("[{origin}] {}", message.content),
        _ => message.content.clone(),
    }
}
