use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::error::{AppError, ErrorKind, Result};
use crate::generation::GenerationEngine;
use crate::models::{Flashcard, FlashcardSet};
use crate::pdf::PdfService;

const DEFAULT_TOPIC: &str = "Concept";

/// Flashcard generation pipeline: acquires source text, prompts the model,
/// and parses the free-form response into typed flashcards.
pub struct FlashcardService {
    pdf: PdfService,
    engine: Arc<dyn GenerationEngine>,
}

impl FlashcardService {
    pub fn new(pdf: PdfService, engine: Arc<dyn GenerationEngine>) -> Self {
        Self { pdf, engine }
    }

    pub async fn generate_from_url(&self, url: &str) -> Result<FlashcardSet> {
        let data = self.pdf.download(url).await?;
        self.pdf.validate(&data)?;
        let text = self.pdf.extract_text(data).await?;
        self.generate(&text, url).await
    }

    pub async fn generate_from_pdf_data(&self, data: Vec<u8>) -> Result<FlashcardSet> {
        self.pdf.validate(&data)?;
        let text = self.pdf.extract_text(data).await?;
        self.generate(&text, "uploaded_pdf").await
    }

    pub async fn generate_from_text(&self, text: &str) -> Result<FlashcardSet> {
        self.generate(text, "user_input").await
    }

    async fn generate(&self, text: &str, source: &str) -> Result<FlashcardSet> {
        info!(length = text.len(), source, "generating flashcards");

        if text.trim().is_empty() {
            return Err(AppError::invalid_params("no content to generate flashcards from"));
        }

        let prompt = build_prompt(text);

        let response = self
            .engine
            .generate(&prompt)
            .await
            .map_err(|e| {
                AppError::with_detail(ErrorKind::Internal, "failed to generate flashcards", e.to_string())
            })?;

        if response.trim().is_empty() {
            return Err(AppError::internal("no response generated from AI model"));
        }

        let flashcards = parse_flashcards(&response);
        if flashcards.is_empty() {
            return Err(AppError::internal(
                "could not generate meaningful flashcards from the content",
            ));
        }

        let total_cards = flashcards.len();
        Ok(FlashcardSet {
            title: generate_title(source).to_string(),
            source: source.to_string(),
            flashcards,
            total_cards,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Create a set of 5-10 high-quality flashcards from the following text. \n\
Each flashcard should:\n\
- Have a clear, specific question\n\
- Include a concise but comprehensive answer\n\
- Be categorized with an appropriate topic\n\
- Cover key concepts, definitions, and applications\n\
\n\
Text to process:\n\
{text}\n\
\n\
Format each flashcard as:\n\
Q: [Question]\n\
A: [Answer]\n\
T: [Topic]\n\
"
    )
}

/// Parses the model's free-form response into flashcards.
///
/// Blocks are delimited by blank lines; a block survives only if it contains
/// both `Q:` and `A:` somewhere. Within a block, lines are matched by prefix
/// with last-write-wins, so only one question/answer/topic is kept per block.
/// Blocks missing a question or answer after trimming are dropped silently.
pub fn parse_flashcards(raw: &str) -> Vec<Flashcard> {
    let mut flashcards = Vec::new();

    for block in raw.split("\n\n") {
        if !block.contains("Q:") || !block.contains("A:") {
            continue;
        }

        let mut question = "";
        let mut answer = "";
        let mut topic = "";

        for line in block.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("Q:") {
                question = rest.trim();
            } else if let Some(rest) = line.strip_prefix("A:") {
                answer = rest.trim();
            } else if let Some(rest) = line.strip_prefix("T:") {
                topic = rest.trim();
            }
        }

        if question.is_empty() || answer.is_empty() {
            continue;
        }

        flashcards.push(Flashcard {
            question: question.to_string(),
            answer: answer.to_string(),
            topic: if topic.is_empty() {
                DEFAULT_TOPIC.to_string()
            } else {
                topic.to_string()
            },
        });
    }

    flashcards
}

/// Two-way classification: anything http-prefixed was a PDF URL source.
pub fn generate_title(source: &str) -> &'static str {
    if source.starts_with("http") {
        "Flashcards from PDF"
    } else {
        "Study Flashcards"
    }
}

/// Renders a flashcard set as human-readable text, the inverse of
/// [`parse_flashcards`] for well-formed cards.
pub fn format_as_text(set: &FlashcardSet) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# {}\n", set.title);
    let _ = writeln!(out, "Generated {} flashcards from: {}\n", set.total_cards, set.source);

    for (i, card) in set.flashcards.iter().enumerate() {
        let _ = write!(out, "**Card {}**", i + 1);
        if !card.topic.is_empty() {
            let _ = write!(out, " ({})", card.topic);
        }
        out.push('\n');
        let _ = writeln!(out, "Q: {}", card.question);
        let _ = writeln!(out, "A: {}\n", card.answer);
    }

    out
}

/// Scans whitespace-delimited tokens for the first PDF URL: a token that,
/// after stripping trailing `.`/`,`/`;`, starts with `http` and contains
/// `.pdf` case-insensitively. No further well-formedness checks.
pub fn extract_pdf_url(text: &str) -> Option<String> {
    for word in text.split_whitespace() {
        let cleaned = word.trim_end_matches(['.', ',', ';']);
        if cleaned.starts_with("http") && cleaned.to_lowercase().contains(".pdf") {
            return Some(cleaned.to_string());
        }
    }
    None
}
