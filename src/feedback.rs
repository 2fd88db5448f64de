//! Turning a user's "that answer was wrong" message into correction fields.
//!
//! The generation service is asked for a JSON object with the
//! [`ExtractedFields`] keys. Replies wrapped in markdown code fences are
//! accepted. When the call fails or the reply does not parse, the raw inputs
//! are used as-is so a submission is never lost.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::generation::GenerationService;
use crate::models::ExtractedFields;

const FALLBACK_ANSWER_CHARS: usize = 200;
const FALLBACK_CONFIDENCE: f64 = 0.5;

pub struct FeedbackAnalyzer {
    service: Arc<dyn GenerationService>,
}

impl FeedbackAnalyzer {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    pub async fn analyze(&self, question: &str, answer: &str, feedback: &str) -> ExtractedFields {
        let prompt = analysis_prompt(question, answer, feedback);

        let raw = match self.service.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "feedback analysis unavailable, keeping raw feedback");
                return fallback(question, answer, feedback);
            }
        };

        match serde_json::from_str::<ExtractedFields>(strip_code_fence(&raw)) {
            Ok(mut fields) => {
                fields.confidence = clamp_confidence(fields.confidence);
                debug!(confidence = fields.confidence, "feedback analyzed");
                fields
            }
            Err(e) => {
                warn!(error = %e, "feedback analysis returned malformed JSON, keeping raw feedback");
                fallback(question, answer, feedback)
            }
        }
    }
}

fn analysis_prompt(question: &str, answer: &str, feedback: &str) -> String {
    format!(
        "A user says the assistant answered a question about internal regulations incorrectly.\n\
         \n\
         Original question: {question}\n\
         Assistant answer: {answer}\n\
         User feedback: {feedback}\n\
         \n\
         Reply with one JSON object and nothing else, using exactly these keys:\n\
         {{\n\
           \"original_question\": the question the user asked, restated,\n\
           \"ai_wrong_answer\": a summary of what the assistant got wrong,\n\
           \"user_correction\": the correct information the user supplied,\n\
           \"extracted_fact\": the corrected fact as one clear sentence,\n\
           \"confidence\": a number from 0.0 to 1.0, higher when the feedback is unambiguous\n\
         }}"
    )
}

/// Body of a ```` ```json ```` (or bare ```` ``` ````) block, else the trimmed text.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let body = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };
    body.split("```").next().unwrap_or(body).trim()
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        FALLBACK_CONFIDENCE
    } else {
        c.clamp(0.0, 1.0)
    }
}

fn fallback(question: &str, answer: &str, feedback: &str) -> ExtractedFields {
    ExtractedFields {
        original_question: question.to_string(),
        ai_wrong_answer: answer.chars().take(FALLBACK_ANSWER_CHARS).collect(),
        user_correction: feedback.to_string(),
        extracted_fact: feedback.to_string(),
        confidence: FALLBACK_CONFIDENCE,
    }
}

/// The fact document ingested into the correction corpus on approval.
///
/// Phrased as a question/answer pair so retrieval matches it against the
/// same kind of question that produced the wrong answer.
pub fn render_correction_text(fields: &ExtractedFields) -> String {
    format!(
        "[교정 데이터]\n\
         질문: {}\n\
         정답: {}\n\
         참고: 이전 답변 \"{}\"은(는) 부정확합니다.\n\
         교정 내용: {}\n\
         신뢰도: {:.2}\n",
        fields.original_question,
        fields.extracted_fact,
        fields.ai_wrong_answer,
        fields.user_correction,
        fields.confidence
    )
}
