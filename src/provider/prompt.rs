//! Prompt construction for batch and single-item requests

use crate::config::PrimingSample;
use crate::terminology::TermMatch;
use crate::types::TranslationItem;

fn push_terms(prompt: &mut String, terms: &[TermMatch]) {
    if terms.is_empty() {
        return;
    }
    prompt.push_str("\n\nUse these term translations exactly:");
    for term in terms {
        prompt.push_str(&format!("\n- {} -> {}", term.source, term.target));
    }
}

/// System prompt for a batch request
///
/// Instructs the provider to answer with `{"translations": [...]}` in item order.
pub fn batch_system_prompt(source_lang: &str, target_lang: &str, terms: &[TermMatch]) -> String {
    let mut prompt = format!(
        "You are a professional software localization translator. Translate each item's \
         \"source\" from {source_lang} to {target_lang}. Keys and file names are context only; \
         never translate them. Preserve placeholders, markup and surrounding whitespace.\n\n\
         Respond with a JSON object of the form {{\"translations\": [\"...\"]}} containing \
         exactly one translated string per input item, in the same order. Do not add \
         explanations."
    );
    push_terms(&mut prompt, terms);
    prompt
}

/// System prompt for a single-item request, including the item's context hints
pub fn item_system_prompt(
    source_lang: &str,
    target_lang: &str,
    item: &TranslationItem,
    terms: &[TermMatch],
) -> String {
    let mut prompt = format!(
        "You are a professional software localization translator. Translate the user's text \
         from {source_lang} to {target_lang}. Preserve placeholders, markup and surrounding \
         whitespace. Reply with the translation only."
    );

    let metadata = &item.metadata;
    let mut context = Vec::new();
    if let Some(key) = &metadata.key {
        context.push(format!("key: {key}"));
    }
    if !metadata.file.is_empty() {
        context.push(format!("file: {}", metadata.file));
    }
    context.extend(metadata.context.iter().cloned());
    if !context.is_empty() {
        prompt.push_str("\n\nContext:");
        for line in context {
            prompt.push_str("\n- ");
            prompt.push_str(&line);
        }
    }

    push_terms(&mut prompt, terms);
    prompt
}

/// Reference-only message showing the project's key naming
pub fn priming_message(samples: &[PrimingSample]) -> Option<String> {
    if samples.is_empty() {
        return None;
    }
    let mut message = String::from(
        "For reference only (do not translate or include these in your answer), \
         here are existing entries of this project:",
    );
    for sample in samples {
        message.push_str(&format!("\n- {} = {:?}", sample.key, sample.source_text));
        if !sample.file.is_empty() {
            message.push_str(&format!(" ({})", sample.file));
        }
    }
    Some(message)
}
