//! whisper.cpp CLI engine.

use super::backend::{Device, LoadedModel, TranscriptionEngine};
use super::model_download::{canonical_model_name, download_model_with_progress, resolve_model_path};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

/// Lines of stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

pub struct WhisperCliEngine {
    binary: String,
    models_dir: PathBuf,
}

impl WhisperCliEngine {
    pub fn new(binary: impl Into<String>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            models_dir: models_dir.into(),
        }
    }

    /// Absolute/relative path as given, otherwise a PATH lookup.
    fn resolve_binary(&self) -> Result<PathBuf, String> {
        let given = Path::new(&self.binary);
        if given.components().count() > 1 {
            return if given.exists() {
                Ok(given.to_path_buf())
            } else {
                Err(format!("Whisper binary not found: {}", self.binary))
            };
        }
        which::which(&self.binary)
            .map_err(|e| format!("Whisper binary '{}' not found on PATH: {}", self.binary, e))
    }

    fn ensure_model(&self, model_id: &str) -> Result<PathBuf, String> {
        if let Some(path) = resolve_model_path(&self.models_dir, model_id) {
            return Ok(path);
        }
        let mut last_decile = 0;
        let on_progress = move |done: u64, total: Option<u64>| {
            if let Some(total) = total.filter(|t| *t > 0) {
                let decile = done * 10 / total;
                if decile > last_decile {
                    last_decile = decile;
                    info!("[models] {}: {}%", model_id, decile * 10);
                }
            }
        };
        let download = download_model_with_progress(&self.models_dir, model_id, on_progress);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(download),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| e.to_string())?
                .block_on(download),
        }
    }
}

impl TranscriptionEngine for WhisperCliEngine {
    fn id(&self) -> &'static str {
        "whisper-cli"
    }

    fn load_model(&self, name: &str, device: Device) -> Result<Arc<dyn LoadedModel>, String> {
        let model_id = canonical_model_name(name).ok_or_else(|| format!("Unknown model: {}", name))?;
        if device == Device::Cuda && which::which("nvidia-smi").is_err() {
            return Err("CUDA is not available on this machine (nvidia-smi not found)".to_string());
        }
        let binary = self.resolve_binary()?;
        let started = Instant::now();
        let model_path = self.ensure_model(model_id)?;
        info!(
            "[whisper-cli] {} ready on {} ({:.2}s)",
            model_id,
            device,
            started.elapsed().as_secs_f64()
        );
        Ok(Arc::new(WhisperCliModel {
            name: model_id.to_string(),
            device,
            binary,
            model_path,
        }))
    }
}

pub struct WhisperCliModel {
    name: String,
    device: Device,
    binary: PathBuf,
    model_path: PathBuf,
}

impl LoadedModel for WhisperCliModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
        fp16: bool,
        progress: &mut dyn Write,
    ) -> Result<String, String> {
        let work_dir = std::env::temp_dir().join(format!("whisper-transcriber-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&work_dir).map_err(|e| e.to_string())?;
        let result = self.run(audio_path, language, fp16, &work_dir, progress);
        let _ = std::fs::remove_dir_all(&work_dir);
        result
    }
}

impl WhisperCliModel {
    fn run(
        &self,
        audio_path: &Path,
        language: &str,
        fp16: bool,
        work_dir: &Path,
        progress: &mut dyn Write,
    ) -> Result<String, String> {
        let stem = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("transcript");
        let of_base = work_dir.join(stem);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(audio_path)
            .arg("-l")
            .arg(language)
            .args(["-pp", "-nt", "-otxt", "-of"])
            .arg(&of_base);
        if self.device == Device::Cpu {
            cmd.arg("-ng");
        }
        if fp16 {
            // whisper.cpp takes its weight precision from the ggml file
            debug!("[whisper-cli] float16 requested, using model file precision");
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

        debug!("[whisper-cli] running {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| format!("Failed to run whisper: {}", e))?;
        let mut stderr = child.stderr.take().ok_or("Whisper stderr was not captured")?;

        let mut tail = StderrTail::default();
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = progress.write_all(&chunk[..n]);
                    tail.push(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[whisper-cli] stderr read failed: {}", e);
                    break;
                }
            }
        }

        let status = child.wait().map_err(|e| format!("Failed to wait for whisper: {}", e))?;
        if !status.success() {
            return Err(format!(
                "Whisper failed (exit code {}): {}",
                status.code().unwrap_or(-1),
                tail.render()
            ));
        }

        let txt_path = of_base.with_extension("txt");
        let raw = std::fs::read_to_string(&txt_path)
            .map_err(|e| format!("Whisper produced no transcript at {}: {}", txt_path.display(), e))?;
        Ok(clean_transcript(&raw))
    }
}

/// Drop blank lines and `[00:00.000 --> 00:02.000]` prefixes.
fn clean_transcript(raw: &str) -> String {
    raw.lines()
        .filter_map(|line| {
            let t = line.trim();
            if t.is_empty() {
                None
            } else if t.starts_with('[') && t.contains("-->") {
                t.find(']')
                    .map(|i| t[i + 1..].trim().to_string())
                    .filter(|s| !s.is_empty())
            } else {
                Some(t.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Default)]
struct StderrTail {
    lines: VecDeque<String>,
    partial: String,
}

impl StderrTail {
    fn push(&mut self, bytes: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.partial.find(['\n', '\r']) {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                if self.lines.len() == STDERR_TAIL_LINES {
                    self.lines.pop_front();
                }
                self.lines.push_back(line.to_string());
            }
        }
    }

    fn render(&self) -> String {
        let mut out: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        if !self.partial.trim().is_empty() {
            out.push(self.partial.trim());
        }
        if out.is_empty() {
            "no stderr".to_string()
        } else {
            out.join("\n")
        }
    }
}
