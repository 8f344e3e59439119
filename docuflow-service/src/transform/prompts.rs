//! User prompts for transform operations. Mode-specific instructions are
//! added by the gateway.

use crate::gateway::NO_ANSWER_SENTINEL;

pub fn question_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}")
}

pub fn combine_summaries_prompt(summaries: &[String]) -> String {
    format!(
        "The following are summaries of consecutive parts of one document. \
         Combine them into a single coherent summary of the whole document.\n\n{}",
        summaries.join("\n\n")
    )
}

/// Whether a QnA reply means the context held no answer
pub fn is_no_answer(reply: &str) -> bool {
    let reply = reply.trim();
    reply.is_empty()
        || reply
            .get(..NO_ANSWER_SENTINEL.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(NO_ANSWER_SENTINEL))
}
