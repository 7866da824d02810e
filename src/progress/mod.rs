//! Progress throttling and the status panel.
//!
//! Backends publish [`ProgressSample`](crate::transfer::ProgressSample)s
//! into a `watch` channel; [`StatusReporter`] follows the channel, drops
//! renders inside the throttle window and edits the status message.

mod reporter;
mod throttle;

pub use reporter::{StatusReporter, render_panel};
pub use throttle::ProgressThrottle;
