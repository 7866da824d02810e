use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    sync::watch,
    time::{Duration, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BackendError, MediaBackend, MediaInfo};
use crate::transfer::{ProgressSample, Stage};

const PROGRESS_MARKER: &str = "vidrelay-progress";
const THUMBNAIL_TIMEOUT_SECONDS: u64 = 15;

#[derive(Debug, Clone)]
pub struct YtDlpOptions {
    pub binary: String,
    /// `-f` selector used for downloads.
    pub format: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct YtDlp {
    options: YtDlpOptions,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
}

enum StreamEnd {
    Finished(std::io::Result<()>),
    Cancelled,
    TimedOut,
}

impl YtDlp {
    pub fn new(options: YtDlpOptions) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(THUMBNAIL_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| BackendError::Failed(format!("could not build HTTP client: {error}")))?;

        Ok(Self { options, http })
    }

    fn spawn_error(&self, error: std::io::Error) -> BackendError {
        if error.kind() == ErrorKind::NotFound {
            BackendError::Missing(self.options.binary.clone())
        } else {
            BackendError::Io(error)
        }
    }

    async fn run_capture(&self, args: Vec<String>) -> Result<std::process::Output, BackendError> {
        let command_future = Command::new(&self.options.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.options.timeout, command_future)
            .await
            .map_err(|_| BackendError::TimedOut(self.options.timeout.as_secs()))?
            .map_err(|error| self.spawn_error(error))?;

        if !output.status.success() {
            return Err(BackendError::Failed(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaBackend for YtDlp {
    async fn resolve(&self, url: &str) -> Result<MediaInfo, BackendError> {
        let output = self
            .run_capture(vec![
                "-J".to_string(),
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                url.to_string(),
            ])
            .await?;

        parse_video_info(&output.stdout)
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: watch::Sender<ProgressSample>,
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        let mut child = Command::new(&self.options.binary)
            .args(download_args(url, dest, &self.options.format))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| self.spawn_error(error))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Failed("yt-dlp stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Failed("yt-dlp stderr unavailable".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Err(error) = stderr.read_to_end(&mut buffer).await {
                debug!("Could not read yt-dlp stderr: {error}");
            }
            buffer
        });

        let end = tokio::select! {
            biased;

            () = cancel.cancelled() => StreamEnd::Cancelled,

            result = timeout(self.options.timeout, pump_progress(stdout, &progress)) => {
                match result {
                    Ok(finished) => StreamEnd::Finished(finished),
                    Err(_) => StreamEnd::TimedOut,
                }
            }
        };

        match end {
            StreamEnd::Finished(Ok(())) => {}
            StreamEnd::Finished(Err(error)) => {
                stop_child(&mut child).await;
                return Err(BackendError::Io(error));
            }
            StreamEnd::Cancelled => {
                debug!("Stopping yt-dlp for {url}: cancellation requested");
                stop_child(&mut child).await;
                return Err(BackendError::Interrupted);
            }
            StreamEnd::TimedOut => {
                warn!("yt-dlp exceeded {}s for {url}", self.options.timeout.as_secs());
                stop_child(&mut child).await;
                return Err(BackendError::TimedOut(self.options.timeout.as_secs()));
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(BackendError::Failed(run_error_message(&stderr)))
        }
    }

    async fn fetch_thumbnail(&self, url: &str, dest: &Path) -> bool {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!("Thumbnail request failed: {}", error.without_url());
                return false;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!("Thumbnail request returned {}", response.status());
            return false;
        }

        match response.bytes().await {
            Ok(bytes) => match tokio::fs::write(dest, &bytes).await {
                Ok(()) => true,
                Err(error) => {
                    warn!("Could not store thumbnail {:?}: {error}", dest);
                    false
                }
            },
            Err(error) => {
                debug!("Thumbnail body unreadable: {}", error.without_url());
                false
            }
        }
    }
}

async fn stop_child(child: &mut Child) {
    if let Err(error) = child.kill().await {
        debug!("Could not kill yt-dlp: {error}");
    }
}

async fn pump_progress(
    stdout: ChildStdout,
    progress: &watch::Sender<ProgressSample>,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some((downloaded, total)) = parse_progress_line(&line) {
            progress.send_replace(ProgressSample::new(Stage::Downloading, downloaded, total));
        }
    }
    Ok(())
}

fn download_args(url: &str, dest: &Path, format: &str) -> Vec<String> {
    // `-o` is a template; a literal `%` in the path must be doubled.
    let output_template = dest.to_string_lossy().replace('%', "%%");

    vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--no-check-certificates".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{PROGRESS_MARKER} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s"
        ),
        "-f".to_string(),
        format.to_string(),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "-o".to_string(),
        output_template,
        url.to_string(),
    ]
}

/// Parses our progress template into `(downloaded, total)`.
///
/// yt-dlp prints `NA` for unknown fields and floats for estimates. The exact
/// total wins over the estimate; an unknown total is reported as 0.
fn parse_progress_line(line: &str) -> Option<(u64, u64)> {
    let mut fields = line.trim().split_whitespace();
    if fields.next()? != PROGRESS_MARKER {
        return None;
    }

    let downloaded = parse_byte_field(fields.next()?)?;
    let exact = fields.next().and_then(parse_byte_field);
    let estimate = fields.next().and_then(parse_byte_field);

    Some((downloaded, exact.or(estimate).unwrap_or(0)))
}

fn parse_byte_field(raw: &str) -> Option<u64> {
    let value = raw.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

fn parse_video_info(stdout: &[u8]) -> Result<MediaInfo, BackendError> {
    let info: YtDlpVideoInfo = serde_json::from_slice(stdout)
        .map_err(|error| BackendError::Failed(format!("unreadable metadata: {error}")))?;

    Ok(MediaInfo {
        title: info
            .title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "N/A".to_string()),
        duration_secs: info
            .duration
            .filter(|value| value.is_finite() && *value > 0.0)
            .map_or(0, |value| value.round() as u64),
        thumbnail_url: info.thumbnail.filter(|value| !value.trim().is_empty()),
    })
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        "Unsupported or invalid URL.".to_string()
    } else {
        message
    }
}
