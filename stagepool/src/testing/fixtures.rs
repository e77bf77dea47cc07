//! Helpers for driving a stage in tests.

use std::fmt::Debug;
use std::time::Duration;

use crate::core::StageMessage;
use crate::errors::StageError;
use crate::stage::Stage;

/// Drains a stage's output until the sentinel arrives.
///
/// Each poll waits at most `poll_timeout`; gives up with the timeout error
/// after `max_polls` empty polls in a row.
pub async fn drain_until_sentinel<W, R>(
    stage: &Stage<W, R>,
    poll_timeout: Duration,
    max_polls: usize,
) -> Result<Vec<StageMessage<W, R>>, StageError>
where
    W: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
{
    let mut messages = Vec::new();
    let mut empty_polls = 0;

    loop {
        match stage.get_result(poll_timeout).await {
            Ok(message) => {
                empty_polls = 0;
                let done = message.is_sentinel();
                messages.push(message);
                if done {
                    return Ok(messages);
                }
            }
            Err(err) if err.is_timeout() => {
                empty_polls += 1;
                if empty_polls >= max_polls {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Drains whatever is on a stage's output right now, without waiting.
pub async fn drain_available<W, R>(stage: &Stage<W, R>) -> Vec<StageMessage<W, R>>
where
    W: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
{
    let mut messages = Vec::new();
    while let Ok(message) = stage.get_result(Duration::ZERO).await {
        messages.push(message);
    }
    messages
}
