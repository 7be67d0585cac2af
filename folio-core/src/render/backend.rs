use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::BackendError;

const INPUT_FILE: &str = "document.html";
const OUTPUT_FILE: &str = "document.pdf";
const STDERR_TAIL: usize = 2048;

/// Physical page the backend formats to, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageConfig {
    pub width_mm: u32,
    pub height_mm: u32,
    pub margin_mm: u32,
}

impl PageConfig {
    pub const fn a4() -> Self {
        Self {
            width_mm: 210,
            height_mm: 297,
            margin_mm: 10,
        }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self::a4()
    }
}

/// Turns assembled markup into the final document bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(
        &self,
        markup: &str,
        page: &PageConfig,
    ) -> Result<Vec<u8>, BackendError>;
}

/// Runs an external converter (headless Chromium by default).
///
/// Arguments may contain `{input}`, `{output}`, `{page_width_mm}`,
/// `{page_height_mm}` and `{margin_mm}`. The child is killed if the render
/// future is dropped, so an outer timeout frees the slot.
#[derive(Clone)]
pub struct CommandRenderBackend {
    program: String,
    args: Vec<String>,
}

impl fmt::Debug for CommandRenderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRenderBackend")
            .field("program", &self.program)
            .field("args", &self.args.join(" "))
            .finish()
    }
}

impl CommandRenderBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn chromium() -> Self {
        Self::new("chromium", Self::default_args())
    }

    pub fn default_args() -> Vec<String> {
        [
            "--headless",
            "--disable-gpu",
            "--no-sandbox",
            "--no-pdf-header-footer",
            "--print-to-pdf={output}",
            "file://{input}",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn expand_args(
        &self,
        input: &str,
        output: &str,
        page: &PageConfig,
    ) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", input)
                    .replace("{output}", output)
                    .replace("{page_width_mm}", &page.width_mm.to_string())
                    .replace("{page_height_mm}", &page.height_mm.to_string())
                    .replace("{margin_mm}", &page.margin_mm.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl RenderBackend for CommandRenderBackend {
    async fn render(
        &self,
        markup: &str,
        page: &PageConfig,
    ) -> Result<Vec<u8>, BackendError> {
        let scratch = tempfile::Builder::new().prefix("folio-render-").tempdir()?;
        let input = scratch.path().join(INPUT_FILE);
        let output = scratch.path().join(OUTPUT_FILE);
        tokio::fs::write(&input, markup).await?;

        let args = self.expand_args(
            &input.to_string_lossy(),
            &output.to_string_lossy(),
            page,
        );
        debug!(program = %self.program, "launching renderer");

        let out = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr
                .get(tail_start..)
                .unwrap_or(stderr.as_ref())
                .trim()
                .to_string();
            return Err(BackendError::Exited {
                status: out.status.to_string(),
                stderr: tail,
            });
        }

        let bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackendError::EmptyOutput);
            }
            Err(err) => return Err(err.into()),
        };
        if bytes.is_empty() {
            return Err(BackendError::EmptyOutput);
        }
        Ok(bytes)
    }
}
