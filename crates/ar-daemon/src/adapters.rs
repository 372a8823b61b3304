//! Device adapter seams. The scheduler and orchestrator only ever see
//! these traits; adapter internals (capture libraries, TTS engines, PTY
//! handling) stay outside the daemon core.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::llm_local::LocalLlm;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unsupported on this host: {0}")]
    Unsupported(&'static str),
    #[error("device error: {0}")]
    Device(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutput {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

#[async_trait]
pub trait TerminalAdapter: Send + Sync {
    /// Run a shell command with a deadline. `elevated` requests
    /// sudo/UAC-style elevation where the host supports it.
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        elevated: bool,
    ) -> Result<TerminalOutput, AdapterError>;
}

/// Terminal adapter backed by the system shell via `tokio::process`.
pub struct ProcessTerminal;

#[async_trait]
impl TerminalAdapter for ProcessTerminal {
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        elevated: bool,
    ) -> Result<TerminalOutput, AdapterError> {
        debug!(command, elevated, "executing shell command");

        let mut cmd = if cfg!(windows) {
            let mut c = tokio::process::Command::new("powershell");
            c.arg("-NoProfile").arg("-Command").arg(command);
            c
        } else if elevated {
            let mut c = tokio::process::Command::new("sudo");
            c.arg("sh").arg("-c").arg(command);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| AdapterError::Timeout(timeout))??;

        Ok(TerminalOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            return_code: output.status.code().unwrap_or(-1),
        })
    }
}

// ---------------------------------------------------------------------------
// Vision
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VisionAdapter: Send + Sync {
    /// Capture the screen as base64 PNG.
    async fn capture_screenshot(&self, save: bool) -> Result<String, AdapterError>;

    /// Capture a camera frame as base64 PNG.
    async fn capture_camera(&self, index: u32, save: bool) -> Result<String, AdapterError>;

    /// Capture + local analysis in one step: (text, tokens, cost).
    async fn see_screen(&self) -> Result<(String, u64, f64), AdapterError>;

    async fn see_camera(&self) -> Result<(String, u64, f64), AdapterError>;

    async fn analyze_image(
        &self,
        image_base64: &str,
        prompt: &str,
    ) -> Result<(String, u64, f64), AdapterError>;
}

/// Headless hosts have no capture devices; every call reports that.
pub struct NoopVision;

#[async_trait]
impl VisionAdapter for NoopVision {
    async fn capture_screenshot(&self, _save: bool) -> Result<String, AdapterError> {
        Err(AdapterError::Unsupported("screen capture"))
    }

    async fn capture_camera(&self, _index: u32, _save: bool) -> Result<String, AdapterError> {
        Err(AdapterError::Unsupported("camera capture"))
    }

    async fn see_screen(&self) -> Result<(String, u64, f64), AdapterError> {
        Err(AdapterError::Unsupported("screen capture"))
    }

    async fn see_camera(&self) -> Result<(String, u64, f64), AdapterError> {
        Err(AdapterError::Unsupported("camera capture"))
    }

    async fn analyze_image(
        &self,
        _image_base64: &str,
        _prompt: &str,
    ) -> Result<(String, u64, f64), AdapterError> {
        Err(AdapterError::Unsupported("image analysis"))
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AudioAdapter: Send + Sync {
    /// Listen on the microphone; `None` when nothing was captured.
    async fn capture_microphone_audio(
        &self,
        timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<Option<Vec<u8>>, AdapterError>;

    /// Normalize captured audio into an uploadable WAV byte buffer.
    fn extract_audio_bytes(&self, raw: &[u8]) -> Result<Vec<u8>, AdapterError>;

    /// Text-to-speech; `wait` blocks until playback finishes.
    async fn speak(&self, text: &str, wait: bool) -> Result<(), AdapterError>;
}

pub struct NoopAudio;

#[async_trait]
impl AudioAdapter for NoopAudio {
    async fn capture_microphone_audio(
        &self,
        _timeout: Duration,
        _phrase_limit: Duration,
    ) -> Result<Option<Vec<u8>>, AdapterError> {
        Err(AdapterError::Unsupported("microphone"))
    }

    fn extract_audio_bytes(&self, raw: &[u8]) -> Result<Vec<u8>, AdapterError> {
        Ok(raw.to_vec())
    }

    async fn speak(&self, _text: &str, _wait: bool) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("tts"))
    }
}

// ---------------------------------------------------------------------------
// Operator console
// ---------------------------------------------------------------------------

/// Operator-facing rendering and confirmation input. The TUI proper is
/// out of scope; this seam is all the core ever touches.
#[async_trait]
pub trait OperatorConsole: Send + Sync {
    fn print(&self, line: &str);

    /// Streaming output without a trailing newline.
    fn print_chunk(&self, chunk: &str);

    /// y/N confirmation. Implementations must fail closed when the input
    /// is not interactive.
    async fn confirm(&self, prompt: &str) -> bool;

    fn is_interactive(&self) -> bool;
}

/// Stdin/stdout console for the REPL binary.
pub struct StdConsole;

#[async_trait]
impl OperatorConsole for StdConsole {
    fn print(&self, line: &str) {
        println!("{line}");
    }

    fn print_chunk(&self, chunk: &str) {
        use std::io::Write;
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    }

    async fn confirm(&self, prompt: &str) -> bool {
        if !self.is_interactive() {
            return false;
        }
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            print!("{prompt} [y/N]: ");
            let _ = std::io::stdout().flush();
            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }

    fn is_interactive(&self) -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Everything the orchestrator needs injected at construction.
pub struct Adapters {
    pub llm: Arc<dyn LocalLlm>,
    pub terminal: Arc<dyn TerminalAdapter>,
    pub vision: Arc<dyn VisionAdapter>,
    pub audio: Arc<dyn AudioAdapter>,
    pub console: Arc<dyn OperatorConsole>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
