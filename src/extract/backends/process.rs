//! Subprocess landmark extractor.
//!
//! Runs an external program once per frame. The encoded frame is written to the
//! program's stdin; the program prints a single JSON object on stdout:
//!
//! ```json
//! {"success": true, "landmarks": [[x0, y0, z0, ...63 values...]], "error": null}
//! ```
//!
//! A non-zero exit status is reported as a failed extraction carrying stderr.
//! The program is killed when it exceeds the configured timeout.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::extract::backend::{Extraction, LandmarkExtractor};
use crate::frame::Frame;
use crate::FeatureVector;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const MAX_STDERR_CHARS: usize = 512;

#[derive(Clone, Debug)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["realtime_landmarks.py".to_string()],
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProcessOutput {
    success: bool,
    #[serde(default)]
    landmarks: Vec<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

pub struct ProcessExtractor {
    config: ProcessConfig,
}

impl ProcessExtractor {
    pub fn new(config: ProcessConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(anyhow!("extractor command must not be empty"));
        }
        if config.timeout.is_zero() {
            return Err(anyhow!("extractor timeout must be greater than zero"));
        }
        Ok(Self { config })
    }

    fn run(&self, input: &[u8]) -> Result<(bool, Vec<u8>, Vec<u8>)> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn extractor '{}'", self.config.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("extractor stdin unavailable"))?;
        let input = input.to_vec();
        let writer = std::thread::spawn(move || {
            // A program that exits without reading stdin yields a broken pipe; ignore it.
            let _ = stdin.write_all(&input);
        });
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = wait_with_deadline(&mut child, self.config.timeout)?;
        let _ = writer.join();
        let stdout = stdout
            .join()
            .map_err(|_| anyhow!("extractor stdout reader panicked"))?;
        let stderr = stderr
            .join()
            .map_err(|_| anyhow!("extractor stderr reader panicked"))?;
        Ok((status, stdout, stderr))
    }
}

impl LandmarkExtractor for ProcessExtractor {
    fn name(&self) -> &'static str {
        "process"
    }

    fn extract(&self, frame: &Frame) -> Result<Extraction> {
        let (exited_ok, stdout, stderr) = self.run(frame.bytes())?;
        if !exited_ok {
            let message = String::from_utf8_lossy(&stderr);
            let message = message.trim();
            let message = if message.is_empty() {
                "landmark extraction failed".to_string()
            } else {
                message.chars().take(MAX_STDERR_CHARS).collect()
            };
            return Ok(Extraction::failed(message));
        }
        let output: ProcessOutput = serde_json::from_slice(&stdout)
            .map_err(|e| anyhow!("failed to parse extractor output: {}", e))?;
        if !output.success {
            return Ok(Extraction::failed(
                output.error.unwrap_or_else(|| "landmark extraction failed".to_string()),
            ));
        }
        let vectors = output
            .landmarks
            .into_iter()
            .enumerate()
            .map(|(hand, values)| {
                FeatureVector::new(values)
                    .map_err(|e| anyhow!("extractor returned malformed hand {}: {}", hand, e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Extraction::hands(vectors))
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut out = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut out);
        }
        out
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.success());
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!(
                "extractor timed out after {} ms",
                timeout.as_millis()
            ));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
