use crate::{ScoredChunk, Turn};

/// Turns of conversation folded into the context: the last two exchanges.
pub const HISTORY_WINDOW_TURNS: usize = 4;

pub const HISTORY_HEADER: &str = "Previous conversation:";

/// The trailing [`HISTORY_WINDOW_TURNS`] turns of `history`.
pub fn history_window(history: &[Turn]) -> &[Turn] {
    let start = history.len().saturating_sub(HISTORY_WINDOW_TURNS);
    &history[start..]
}

/// Joins the reranked chunk texts in rank order with blank lines and appends
/// the history block when `window` is not empty. No length limit is applied.
pub fn assemble_context(reranked: &[ScoredChunk], window: &[Turn]) -> String {
    let mut context = reranked
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    if !window.is_empty() {
        context.push_str("\n\n");
        context.push_str(HISTORY_HEADER);
        context.push('\n');
        for turn in window {
            context.push_str(&format!("{}: {}\n", turn.role, turn.text));
        }
    }

    context
}
