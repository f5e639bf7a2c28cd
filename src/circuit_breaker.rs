//! Per-target circuit breaker
//!
//! Targets are grouped by origin (`host[:port]` of the URL), so every item
//! pointing at the same site shares one circuit. The breaker is an injected
//! service shared by all tasks of an orchestrator; tests build isolated
//! instances.
//!
//! State machine per key:
//! - `Closed`: calls allowed; consecutive failures are counted and reaching the
//!   threshold opens the circuit.
//! - `Open`: calls rejected until the cooldown has elapsed since it opened.
//! - `HalfOpen`: after the cooldown, exactly one trial call is let through.
//!   Its success closes the circuit, its failure reopens it.

use crate::config::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use utoipa::ToSchema;

/// State of one target's circuit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected
    Open,
    /// A single trial call decides the next state
    HalfOpen,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl Circuit {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            trial_started_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_started_at = None;
    }
}

/// Thread-safe registry of circuits keyed by target origin
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreaker {
    /// Create a breaker with every circuit closed
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Circuit key of a target: the URL's `host[:port]`, or the raw string if it is not a URL
    pub fn key_for(target: &str) -> String {
        match url::Url::parse(target) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => target.to_string(),
            },
            Err(_) => target.to_string(),
        }
    }

    /// Whether a call to `target` may proceed
    ///
    /// An open circuit whose cooldown has elapsed turns half-open and admits one
    /// trial. While that trial is outstanding further calls are rejected, unless
    /// the trial itself has been outstanding for a whole cooldown, in which case
    /// another one is admitted.
    pub fn allow(&self, target: &str) -> bool {
        let key = Self::key_for(target);
        let now = Instant::now();
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(&key) else {
            return true;
        };

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = circuit
                    .opened_at
                    .is_none_or(|opened| now.duration_since(opened) >= self.config.cooldown);
                if cooled_down {
                    tracing::info!(target_key = %key, "Circuit half-open, allowing trial call");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_started_at = Some(now);
                }
                cooled_down
            }
            CircuitState::HalfOpen => {
                let stale_trial = circuit
                    .trial_started_at
                    .is_none_or(|started| now.duration_since(started) >= self.config.cooldown);
                if stale_trial {
                    circuit.trial_started_at = Some(now);
                }
                stale_trial
            }
        }
    }

    /// Record a successful call: resets the failure count and closes a half-open circuit
    ///
    /// An open circuit stays open until its cooldown has elapsed, even when a
    /// call that started before it opened comes back successful.
    pub fn record_success(&self, target: &str) {
        let key = Self::key_for(target);
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(&key) else {
            return;
        };
        match circuit.state {
            CircuitState::Open => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                tracing::info!(target_key = %key, "Trial call succeeded, circuit closed");
                *circuit = Circuit::closed();
            }
            CircuitState::Closed => *circuit = Circuit::closed(),
        }
    }

    /// Record a failed call
    ///
    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&self, target: &str) -> bool {
        let key = Self::key_for(target);
        let now = Instant::now();
        let mut circuits = self.lock();
        let circuit = circuits.entry(key.clone()).or_insert_with(Circuit::closed);
        circuit.failure_count = circuit.failure_count.saturating_add(1);

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.open(now);
                tracing::warn!(target_key = %key, "Trial call failed, circuit reopened");
                true
            }
            CircuitState::Closed if circuit.failure_count >= self.config.failure_threshold => {
                circuit.open(now);
                tracing::warn!(
                    target_key = %key,
                    failures = circuit.failure_count,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "Circuit opened"
                );
                true
            }
            _ => false,
        }
    }

    /// Current state of a target's circuit, without side effects
    ///
    /// An open circuit whose cooldown has elapsed is reported as `HalfOpen`.
    pub fn state(&self, target: &str) -> CircuitState {
        let key = Self::key_for(target);
        let circuits = self.lock();
        circuits
            .get(&key)
            .map(|circuit| self.effective_state(circuit, Instant::now()))
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failures recorded for a target
    pub fn failure_count(&self, target: &str) -> u32 {
        let key = Self::key_for(target);
        self.lock()
            .get(&key)
            .map(|circuit| circuit.failure_count)
            .unwrap_or(0)
    }

    /// Keys whose circuit is not closed, sorted
    pub fn open_circuits(&self) -> Vec<String> {
        let now = Instant::now();
        let circuits = self.lock();
        let mut keys: Vec<String> = circuits
            .iter()
            .filter(|(_, circuit)| self.effective_state(circuit, now) != CircuitState::Closed)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn effective_state(&self, circuit: &Circuit, now: Instant) -> CircuitState {
        match (circuit.state, circuit.opened_at) {
            (CircuitState::Open, Some(opened))
                if now.duration_since(opened) >= self.config.cooldown =>
            {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    // A panic while holding the lock leaves the map consistent, so recover it.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
