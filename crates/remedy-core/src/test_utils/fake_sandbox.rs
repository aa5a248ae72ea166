use crate::errors::SandboxError;
use crate::sandbox::{RawOutput, SandboxBackend, SandboxJob, SandboxLimits};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
    Broken(String),
}

impl FakeOutcome {
    pub fn ok() -> Self {
        Self::exit(0, "")
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        FakeOutcome::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// A recorded invocation: entry point, its code at the time and the
/// dependencies passed along.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub entry_point: String,
    pub code: String,
    pub dependencies: Vec<String>,
}

/// Returns queued outcomes per entry point. The last queued outcome for a
/// path repeats; paths with nothing queued succeed.
pub struct ScriptedSandbox {
    outcomes: Mutex<HashMap<String, VecDeque<FakeOutcome>>>,
    calls: Mutex<Vec<FakeCall>>,
    unavailable: Option<String>,
    delay: Duration,
    probes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unavailable: None,
            delay: Duration::ZERO,
            probes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, path: &str, outcome: FakeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, path: &str) -> FakeOutcome {
        let mut outcomes = self.outcomes.lock().unwrap();
        match outcomes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(FakeOutcome::ok),
            None => FakeOutcome::ok(),
        }
    }
}

#[async_trait]
impl SandboxBackend for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match &self.unavailable {
            Some(reason) => Err(SandboxError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    async fn run(&self, job: &SandboxJob<'_>, _limits: &SandboxLimits) -> Result<RawOutput, SandboxError> {
        self.calls.lock().unwrap().push(FakeCall {
            entry_point: job.entry_point.to_string(),
            code: job.files.get(job.entry_point).unwrap_or_default().to_string(),
            dependencies: job.dependencies.to_vec(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_outcome(job.entry_point) {
            FakeOutcome::Exit { code, stdout, stderr } => Ok(RawOutput {
                exit_code: code,
                stdout,
                stderr,
            }),
            FakeOutcome::Timeout => Err(SandboxError::Timeout),
            FakeOutcome::Broken(message) => Err(SandboxError::WorkspaceError(message)),
        }
    }
}
