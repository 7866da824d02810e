use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProgressThrottle;
use crate::format::{
    clamp_percentage, escape_html, format_duration, human_bytes, progress_bar, shorten_title,
};
use crate::messenger::{Button, MessageRef, Messenger};
use crate::transfer::{ProgressSample, Stage, TransferId};

const PANEL_TITLE_CHARS: usize = 60;

/// Renders progress into a transfer's status message.
///
/// Edits are best effort: a deleted message, an unchanged text or a flood
/// wait skips the render and never reaches the pipeline.
pub struct StatusReporter {
    messenger: Arc<dyn Messenger>,
    status: MessageRef,
    title: String,
    cancel_data: String,
    started: Instant,
    throttle: ProgressThrottle,
    last_rendered: Option<ProgressSample>,
}

impl StatusReporter {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        status: MessageRef,
        title: &str,
        id: &TransferId,
        started: Instant,
        min_interval: Duration,
    ) -> Self {
        Self {
            messenger,
            status,
            title: escape_html(&shorten_title(title, PANEL_TITLE_CHARS)),
            cancel_data: format!("cancel_dl_{id}"),
            started,
            throttle: ProgressThrottle::new(min_interval),
            last_rendered: None,
        }
    }

    /// Renders `sample` unless a render happened within the throttle window.
    /// Final samples always render.
    pub async fn report(&mut self, sample: ProgressSample) {
        if !self.throttle.should_emit_or(sample.is_final()) {
            return;
        }

        let text = render_panel(&sample, &self.title, self.started.elapsed());
        let keyboard = vec![vec![Button::new("✖️ Cancel", self.cancel_data.clone())]];

        match self.messenger.edit_text(self.status, &text, Some(keyboard)).await {
            Ok(()) => {}
            Err(error) if error.is_benign() => debug!("Skipped status render: {error}"),
            Err(error) => warn!("Status update failed: {error}"),
        }
        self.last_rendered = Some(sample);
    }

    /// Follows `progress` until `stop` fires or every sender is gone.
    ///
    /// Only the latest sample is ever rendered; older ones are overwritten in
    /// the channel. A final sample that arrived last is rendered before
    /// returning.
    pub async fn follow(
        mut self,
        mut progress: watch::Receiver<ProgressSample>,
        stop: CancellationToken,
    ) -> Self {
        loop {
            tokio::select! {
                biased;

                () = stop.cancelled() => break,

                changed = progress.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let sample = *progress.borrow_and_update();
                    self.report(sample).await;
                }
            }
        }

        let latest = *progress.borrow();
        if latest.is_final() && self.last_rendered != Some(latest) {
            self.report(latest).await;
        }

        self
    }

    /// Lets the first sample of the next stage render immediately.
    pub const fn reset_throttle(&mut self) {
        self.throttle.reset();
    }
}

pub fn render_panel(sample: &ProgressSample, title: &str, elapsed: Duration) -> String {
    let percentage = if sample.total > 0 {
        clamp_percentage(sample.current as f64 / sample.total as f64 * 100.0)
    } else {
        0.0
    };

    let elapsed_secs = elapsed.as_secs_f64();
    let speed = if elapsed_secs > 0.0 {
        sample.current as f64 / elapsed_secs
    } else {
        0.0
    };
    let eta = if speed > 0.0 {
        sample.total.saturating_sub(sample.current) as f64 / speed
    } else {
        0.0
    };

    let header = match sample.stage {
        Stage::Downloading => "📥 <b>Downloading...</b>",
        Stage::Uploading => "☁️ <b>Uploading...</b>",
    };

    format!(
        "{header}\n\n<b>🏷️</b> <code>{title}</code>\n\n\
         <b>Progress:</b> <code>{} {percentage:.1}%</code>\n\
         <b>Status:</b> <code>{}</code> of <code>{}</code>\n\
         <b>Speed:</b> <code>{}/s</code>\n\
         <b>ETA:</b> <code>{}</code>",
        progress_bar(percentage),
        human_bytes(sample.current as f64),
        human_bytes(sample.total as f64),
        human_bytes(speed),
        format_duration(eta as u64),
    )
}
