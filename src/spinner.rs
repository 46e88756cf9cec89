use std::{future::Future, time::Duration};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// How often the spinner redraws
pub(crate) const SPINNER_INTERVAL: Duration = Duration::from_millis(250);

/// Await `task`, showing `message` next to a spinner on stderr until it completes
///
/// The spinner only draws when stderr is a terminal, and never affects the result of `task`.
pub(crate) async fn with_spinner<F, T>(message: impl Into<String>, task: F) -> T
where
    F: Future<Output = T>,
{
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} ({elapsed})") {
        bar.set_style(style);
    }
    bar.set_message(message.into());

    let mut interval = tokio::time::interval(SPINNER_INTERVAL);
    tokio::pin!(task);
    let output = loop {
        tokio::select! {
            biased;
            output = &mut task => break output,
            _ = interval.tick() => bar.tick(),
        }
    };

    bar.finish_and_clear();
    output
}
