use arena_core::domain::battle::{Speaker, Utterance};
use arena_core::domain::persona::Persona;
use arena_core::rubric::Rubric;

/// Token a speaker appends when they hang up or sign off.
pub const END_OF_CALL_MARKER: &str = "[END_CALL]";

const OPENING_CUE: &str = "(The prospect picks up the phone.)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptRole {
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

pub fn closer_system_prompt(persona: &Persona, turn_index: u32, max_turns: u32) -> String {
    format!(
        "You are an experienced B2B sales closer on a live phone call with {name}. \
         Qualify the prospect, handle objections without discounting away value, and \
         ask for a concrete next step. Keep each reply under 80 words. \
         This is turn {turn} of at most {max_turns}. If the call is clearly over, \
         finish your reply with {END_OF_CALL_MARKER}.",
        name = persona.name,
        turn = turn_index + 1,
    )
}

pub fn persona_system_prompt(persona: &Persona, turn_index: u32, max_turns: u32) -> String {
    format!(
        "{instruction}\n\nYou are {name}, the prospect on this call. Stay in character, \
         resist weak pitches and only agree to a next step when genuinely convinced. \
         Keep each reply under 80 words. This is turn {turn} of at most {max_turns}. \
         If you hang up or end the call, finish your reply with {END_OF_CALL_MARKER}.",
        instruction = persona.instruction.trim(),
        name = persona.name,
        turn = turn_index + 1,
    )
}

/// Renders the transcript from the point of view of `speaker`: their own lines
/// become assistant messages, the counterparty's become user messages.
///
/// Consecutive lines from the same side are merged and the list always opens
/// with a user message.
pub fn dialogue_messages(speaker: Speaker, transcript: &[Utterance]) -> Vec<PromptMessage> {
    let mut messages: Vec<PromptMessage> = Vec::with_capacity(transcript.len() + 1);

    for utterance in transcript {
        let role =
            if utterance.speaker == speaker { PromptRole::Assistant } else { PromptRole::User };
        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&utterance.text);
            }
            _ => messages.push(PromptMessage { role, content: utterance.text.clone() }),
        }
    }

    if messages.first().map(|message| message.role != PromptRole::User).unwrap_or(true) {
        messages.insert(
            0,
            PromptMessage { role: PromptRole::User, content: OPENING_CUE.to_string() },
        );
    }

    messages
}

/// Plain-text transcript used by the referee and the audit note.
pub fn render_transcript(persona_name: &str, transcript: &[Utterance]) -> String {
    transcript
        .iter()
        .map(|utterance| {
            let label = match utterance.speaker {
                Speaker::Closer => "CLOSER",
                Speaker::Persona => persona_name,
            };
            format!("[{}] {}: {}", utterance.turn_index + 1, label, utterance.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn referee_system_prompt(rubric: &Rubric) -> String {
    format!(
        "You are an impartial sales coach grading a recorded sales call. Judge only \
         the closer's performance.\n\n{}",
        rubric.prompt_section()
    )
}

pub fn audit_system_prompt() -> String {
    "You write short internal audit notes about recorded sales calls. In at most three \
     sentences, state what the closer did best, the biggest missed opportunity, and \
     whether a commitment was secured."
        .to_string()
}

/// Strips the end-of-call marker. Returns the cleaned text and whether it was present.
pub fn strip_end_marker(text: &str) -> (String, bool) {
    if text.contains(END_OF_CALL_MARKER) {
        (text.replace(END_OF_CALL_MARKER, "").trim().to_string(), true)
    } else {
        (text.trim().to_string(), false)
    }
}
