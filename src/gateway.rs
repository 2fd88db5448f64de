//! Question answering over the primary and correction corpora.
//!
//! The gateway does no retrieval of its own. It decides which corpora the
//! generation service searches and attaches the instruction that makes
//! approved corrections outrank conflicting primary documents. Only approved
//! corrections are ever ingested into the correction corpus, so pending and
//! rejected ones cannot surface here.

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::CorporaConfig;
use crate::corpus::CorpusStore;
use crate::error::{GatewayError, GatewayResult};
use crate::generation::{Answer, AnswerRequest, GenerationError, GenerationService};
use crate::messages;

const NO_ANSWER: &str = "답변을 생성할 수 없습니다.";

const PRECEDENCE_INSTRUCTION: &str = "\
You are an assistant that answers questions about the company's internal regulations.

Rules:
1. Answer only from the supplied documents and cite the document name and article.
2. Documents from the correction corpus contain verified fixes to earlier wrong answers. \
When a correction conflicts with a regulation document, the correction is the authoritative answer.
3. Several versions of one regulation may exist, with dates in their file names \
(YYYYMMDD, YYYY-MM-DD, YYYY.MM.DD). Treat the most recently dated version as authoritative \
and mention how the rule changed from earlier versions when relevant.
4. A dated document takes precedence over an undated one.
5. If the documents do not contain the answer, say so plainly.
6. Answer in Korean.";

/// Corpora to search, in precedence order, plus the instruction to use.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub corpora: Vec<String>,
    pub system_instruction: String,
}

pub struct KnowledgeGateway {
    pool: SqlitePool,
    store: Arc<dyn CorpusStore>,
    generation: Arc<dyn GenerationService>,
    corpora: CorporaConfig,
}

impl KnowledgeGateway {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn CorpusStore>,
        generation: Arc<dyn GenerationService>,
        corpora: CorporaConfig,
    ) -> Self {
        Self {
            pool,
            store,
            generation,
            corpora,
        }
    }

    pub async fn plan(&self, include_corrections: bool) -> GatewayResult<QueryPlan> {
        let mut corpora = vec![
            self.store
                .ensure_corpus(&self.corpora.primary_display_name)
                .await?,
        ];
        if include_corrections {
            corpora.push(
                self.store
                    .ensure_corpus(&self.corpora.correction_display_name)
                    .await?,
            );
        }
        Ok(QueryPlan {
            corpora,
            system_instruction: PRECEDENCE_INSTRUCTION.to_string(),
        })
    }

    /// Answer `message`. With a session id, prior turns are sent as history
    /// and the new exchange is appended to the transcript.
    pub async fn ask(
        &self,
        message: &str,
        session_id: Option<&str>,
        include_corrections: bool,
    ) -> GatewayResult<Answer> {
        if message.trim().is_empty() {
            return Err(GatewayError::Validation("question must not be empty".into()));
        }

        let plan = self.plan(include_corrections).await?;
        let history = match session_id {
            Some(session) => messages::load(&self.pool, session).await?,
            None => Vec::new(),
        };
        debug!(corpora = ?plan.corpora, turns = history.len(), "asking");

        let request = AnswerRequest {
            corpora: plan.corpora,
            system_instruction: plan.system_instruction,
            history,
            message: message.to_string(),
        };
        let mut answer = self.generation.answer(&request).await.map_err(|e| match e {
            GenerationError::ResourceExhausted { .. } => {
                GatewayError::ExternalService("generation service rate limited".into())
            }
            GenerationError::Other(msg) => GatewayError::ExternalService(msg),
        })?;
        if answer.text.trim().is_empty() {
            answer.text = NO_ANSWER.to_string();
        }

        if let Some(session) = session_id {
            messages::append_exchange(&self.pool, session, message, &answer.text).await?;
        }
        info!(citations = answer.citations.len(), model = %answer.model, "answered");
        Ok(answer)
    }
}
