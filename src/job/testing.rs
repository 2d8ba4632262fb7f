//! Scripted engine for exercising the job machinery without whisper.

use crate::transcription::{Device, LoadedModel, TranscriptionEngine};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub enum Outcome {
    Text(String),
    Fail(String),
    Panic,
}

/// One transcribe call: optional silence, a tqdm-style line per percentage,
/// then the outcome.
pub struct ScriptedRun {
    percents: Vec<u8>,
    step: Duration,
    initial_delay: Duration,
    outcome: Outcome,
}

impl ScriptedRun {
    pub fn progress(percents: &[u8], step: Duration, outcome: Outcome) -> Self {
        Self {
            percents: percents.to_vec(),
            step,
            initial_delay: Duration::ZERO,
            outcome,
        }
    }

    pub fn quick(text: &str) -> Self {
        Self::progress(&[100], Duration::from_millis(1), Outcome::Text(text.to_string()))
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

pub struct ScriptedEngine {
    runs: Arc<Mutex<VecDeque<ScriptedRun>>>,
    failing: Vec<Device>,
    loads: Mutex<Vec<Device>>,
    load_delay: Duration,
}

impl ScriptedEngine {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Arc::new(Mutex::new(runs.into())),
            failing: Vec::new(),
            loads: Mutex::new(Vec::new()),
            load_delay: Duration::ZERO,
        }
    }

    pub fn failing_on(mut self, device: Device) -> Self {
        self.failing.push(device);
        self
    }

    /// Every load blocks for `delay` before succeeding or failing.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn load_calls(&self) -> Vec<Device> {
        self.loads.lock().unwrap().clone()
    }
}

impl TranscriptionEngine for ScriptedEngine {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn load_model(&self, name: &str, device: Device) -> Result<Arc<dyn LoadedModel>, String> {
        self.loads.lock().unwrap().push(device);
        std::thread::sleep(self.load_delay);
        if self.failing.contains(&device) {
            return Err(format!("{} unavailable", device));
        }
        Ok(Arc::new(ScriptedModel {
            name: name.to_string(),
            device,
            runs: self.runs.clone(),
        }))
    }
}

struct ScriptedModel {
    name: String,
    device: Device,
    runs: Arc<Mutex<VecDeque<ScriptedRun>>>,
}

impl LoadedModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn transcribe(
        &self,
        _audio_path: &Path,
        _language: &str,
        _fp16: bool,
        progress: &mut dyn Write,
    ) -> Result<String, String> {
        let run = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or("no scripted run left")?;
        std::thread::sleep(run.initial_delay);
        for percent in &run.percents {
            let bar = "#".repeat(usize::from(*percent / 10));
            write!(progress, "{:3}%|{:<10}| {}/100\r", percent, bar, percent).unwrap();
            std::thread::sleep(run.step);
        }
        match run.outcome {
            Outcome::Text(text) => Ok(text),
            Outcome::Fail(reason) => Err(reason),
            Outcome::Panic => panic!("scripted engine panic"),
        }
    }
}
