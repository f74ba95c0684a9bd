//! Echo producer behaviour
//!
//! Answers a dispatched task by streaming the prompt back word by word.

use crate::relay::{PeerMessage, TaskDispatch};

/// Output fragments for a task; the last one carries `done`
pub fn echo_fragments(task: &TaskDispatch) -> Vec<PeerMessage> {
    let words: Vec<&str> = task.user_prompt.split_inclusive(' ').collect();
    if words.is_empty() {
        return vec![PeerMessage::LlmResponse {
            client_id: task.client_id.clone(),
            text: String::new(),
            done: true,
        }];
    }

    let last = words.len() - 1;
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| PeerMessage::LlmResponse {
            client_id: task.client_id.clone(),
            text: word.to_string(),
            done: i == last,
        })
        .collect()
}
