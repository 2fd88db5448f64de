//! Chat transcript storage.
//!
//! Turns are kept per session in insertion order. The gateway appends to a
//! transcript; the correction workflow reads one back to find the answer a
//! user is disputing.

use sqlx::{Row, SqlitePool};

use crate::error::{GatewayError, GatewayResult};
use crate::generation::ChatTurn;

pub async fn load(pool: &SqlitePool, session_id: &str) -> GatewayResult<Vec<ChatTurn>> {
    let rows = sqlx::query("SELECT role, content FROM messages WHERE session_id = ? ORDER BY id")
        .bind(session_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| ChatTurn {
            role: row.get("role"),
            content: row.get("content"),
        })
        .collect())
}

/// Append a user question and the assistant's reply in one transaction.
pub async fn append_exchange(
    pool: &SqlitePool,
    session_id: &str,
    question: &str,
    answer: &str,
) -> GatewayResult<()> {
    if session_id.trim().is_empty() {
        return Err(GatewayError::Validation("session id must not be empty".into()));
    }
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    for (role, content) in [("user", question), ("assistant", answer)] {
        sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// The assistant turn at `index` and the closest user turn before it.
///
/// The question is empty when no user turn precedes the answer.
pub fn disputed_exchange(turns: &[ChatTurn], index: usize) -> GatewayResult<(String, String)> {
    let answer = turns.get(index).ok_or_else(|| {
        GatewayError::Validation(format!(
            "message index {} is out of range ({} messages)",
            index,
            turns.len()
        ))
    })?;
    if answer.role != "assistant" {
        return Err(GatewayError::Validation(format!(
            "message {} is a {} message, not an assistant answer",
            index, answer.role
        )));
    }
    let question = turns[..index]
        .iter()
        .rev()
        .find(|t| t.role == "user")
        .map(|t| t.content.clone())
        .unwrap_or_default();
    Ok((question, answer.content.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> ChatTurn {
        ChatTurn {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_disputed_exchange_finds_preceding_question() {
        let turns = vec![
            turn("user", "연차는 며칠?"),
            turn("assistant", "15일입니다."),
            turn("user", "병가는?"),
            turn("assistant", "60일입니다."),
        ];
        let (q, a) = disputed_exchange(&turns, 3).unwrap();
        assert_eq!(q, "병가는?");
        assert_eq!(a, "60일입니다.");
    }

    #[test]
    fn test_disputed_exchange_rejects_bad_index() {
        let turns = vec![turn("user", "q"), turn("assistant", "a")];
        assert_eq!(disputed_exchange(&turns, 2).unwrap_err().code(), "validation_error");
        assert_eq!(disputed_exchange(&turns, 0).unwrap_err().code(), "validation_error");
    }

    #[test]
    fn test_disputed_exchange_without_question() {
        let turns = vec![turn("assistant", "greeting")];
        let (q, _) = disputed_exchange(&turns, 0).unwrap();
        assert_eq!(q, "");
    }
}
