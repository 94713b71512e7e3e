//! Test doubles for the command and clock seams
//!
//! `FakeRunner` records every invocation as a flat `"program arg arg"`
//! string, serves canned stdout per program, and can be told to fail
//! specific programs or refuse spawns. `FakeClock` advances instantly so
//! the lifecycle's waits cost nothing in tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::command::{CmdOutput, CommandRunner, RunnerError, TunnelProcess};

#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    outputs: Mutex<HashMap<String, String>>,
    refuse_spawn: AtomicBool,
    stubborn_tunnels: AtomicBool,
    next_pid: AtomicU32,
    tunnels: Mutex<Vec<Arc<FakeTunnelState>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    /// Make every invocation of `program` report failure.
    pub fn fail_program(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_string());
    }

    /// Serve `stdout` for every invocation of `program`.
    pub fn set_stdout(&self, program: &str, stdout: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(program.to_string(), stdout.to_string());
    }

    /// Make `spawn` return an error instead of a handle.
    pub fn refuse_spawn(&self) {
        self.refuse_spawn.store(true, Ordering::SeqCst);
    }

    /// Spawned tunnels will ignore `terminate` and only die on `kill`.
    pub fn spawn_stubborn_tunnels(&self) {
        self.stubborn_tunnels.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls_with(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn spawn_count(&self) -> usize {
        self.count_calls_with("spawn:")
    }

    /// Handles created so far, in spawn order.
    pub fn tunnels(&self) -> Vec<Arc<FakeTunnelState>> {
        self.tunnels.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn render(program: &str, args: &[&str]) -> String {
        if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput, RunnerError> {
        self.record(Self::render(program, args));

        let success = !self.failing.lock().unwrap().contains(program);
        let stdout = self
            .outputs
            .lock()
            .unwrap()
            .get(program)
            .cloned()
            .unwrap_or_default();

        Ok(CmdOutput {
            success,
            stdout,
            stderr: if success {
                String::new()
            } else {
                "forced failure".to_string()
            },
        })
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn TunnelProcess>, RunnerError> {
        self.record(format!("spawn: {}", Self::render(program, args)));

        if self.refuse_spawn.load(Ordering::SeqCst) {
            return Err(RunnerError::Launch {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "spawn refused"),
            });
        }

        let state = Arc::new(FakeTunnelState::default());
        state.stubborn.store(
            self.stubborn_tunnels.load(Ordering::SeqCst),
            Ordering::SeqCst,
        );
        self.tunnels.lock().unwrap().push(state.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTunnel { state, pid }))
    }
}

#[derive(Default)]
pub struct FakeTunnelState {
    pub terminated: AtomicBool,
    pub killed: AtomicBool,
    stubborn: AtomicBool,
}

impl FakeTunnelState {
    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

pub struct FakeTunnel {
    state: Arc<FakeTunnelState>,
    pid: u32,
}

impl TunnelProcess for FakeTunnel {
    fn id(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        if self.state.stubborn.load(Ordering::SeqCst) {
            return self.state.was_killed();
        }
        self.state.was_terminated() || self.state.was_killed()
    }

    fn terminate(&mut self) {
        self.state.terminated.store(true, Ordering::SeqCst);
    }

    fn kill(&mut self) {
        self.state.killed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    slept: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
        self.slept.lock().unwrap().push(duration);
    }
}
