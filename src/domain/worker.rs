//! Periodic trigger evaluation worker.
//!
//! A cycle loads active rules, compiles any it has not seen at the current
//! version, evaluates each against the data source, and records firings
//! through the sink. One rule failing never stops the rest of the cycle.
//!
//! The async runner ticks on a fixed interval; a cycle still running when
//! the next tick arrives causes that tick to be skipped rather than queued,
//! and a stop request takes effect at the next tick boundary so an
//! in-flight cycle always completes.

use crate::domain::compiler::{compile, CompileContext, CompiledTrigger};
use crate::domain::error::VigilError;
use crate::domain::evaluator::{evaluate, HysteresisPolicy, NoHysteresis};
use crate::domain::parser::parse;
use crate::ports::data_port::DataPort;
use crate::ports::registry_port::RuleRegistryPort;
use crate::ports::sink_port::{ActivationEvent, FiringRecord, FiringSinkPort};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Counters from one evaluation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub fired: usize,
    /// Firings suppressed by the sink's `(rule_id, fingerprint)` idempotence.
    pub duplicates: usize,
    pub errors: usize,
}

/// Synchronous evaluation core. The async runner drives this on a timer;
/// tests drive it directly with a chosen clock.
pub struct TriggerWorker {
    registry: Arc<dyn RuleRegistryPort>,
    data: Arc<dyn DataPort>,
    sink: Arc<dyn FiringSinkPort>,
    hysteresis: Arc<dyn HysteresisPolicy + Send + Sync>,
    context: CompileContext,
    /// Compiled triggers keyed by `(rule_id, version)`. A version bump
    /// recompiles; entries for rules no longer active are dropped.
    cache: HashMap<(String, u32), CompiledTrigger>,
    /// Activations whose firing was recorded but whose emit failed, keyed
    /// by `(rule_id, fingerprint)`. The recorded firing blocks the normal
    /// re-fire path, so these are re-emitted directly each cycle until the
    /// sink accepts them.
    pending_activations: HashMap<(String, String), ActivationEvent>,
}

impl TriggerWorker {
    pub fn new(
        registry: Arc<dyn RuleRegistryPort>,
        data: Arc<dyn DataPort>,
        sink: Arc<dyn FiringSinkPort>,
        context: CompileContext,
    ) -> Self {
        Self {
            registry,
            data,
            sink,
            hysteresis: Arc::new(NoHysteresis),
            context,
            cache: HashMap::new(),
            pending_activations: HashMap::new(),
        }
    }

    pub fn with_hysteresis(mut self, policy: Arc<dyn HysteresisPolicy + Send + Sync>) -> Self {
        self.hysteresis = policy;
        self
    }

    /// Run one full evaluation cycle at `now`.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        self.retry_pending_activations(&mut report);

        let rules = match self.registry.active_rules(now) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(error = %err, "failed to load active rules, skipping cycle");
                report.errors += 1;
                return report;
            }
        };
        debug!(count = rules.len(), "evaluating active rules");

        let mut live = HashSet::new();
        for rule in &rules {
            live.insert((rule.id.clone(), rule.version));
            if let Err(err) = self.evaluate_rule(&rule.id, rule.version, &rule.dsl, now, &mut report)
            {
                warn!(rule_id = %rule.id, error = %err, "rule evaluation failed");
                report.errors += 1;
            }
        }
        self.cache.retain(|key, _| live.contains(key));

        info!(
            evaluated = report.evaluated,
            fired = report.fired,
            duplicates = report.duplicates,
            errors = report.errors,
            "cycle complete"
        );
        report
    }

    fn evaluate_rule(
        &mut self,
        rule_id: &str,
        version: u32,
        dsl: &str,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), VigilError> {
        let key = (rule_id.to_string(), version);
        if !self.cache.contains_key(&key) {
            let ast = parse(dsl)?;
            let compiled = compile(ast, &self.context)?;
            self.cache.insert(key.clone(), compiled);
        }
        let compiled = &self.cache[&key];

        let result = evaluate(compiled, now, self.data.as_ref(), self.hysteresis.as_ref());
        report.evaluated += 1;
        if !result.should_fire {
            return Ok(());
        }

        let firing = FiringRecord {
            rule_id: rule_id.to_string(),
            fired_at: now,
            fingerprint: result.dedupe_fingerprint.clone(),
            evidence: result.evidence.clone(),
            action: compiled.ast.action.clone(),
        };
        match self.sink.record_firing(&firing)? {
            Some(firing_id) => {
                info!(rule_id, firing_id = %firing_id, "trigger fired");
                let event = ActivationEvent {
                    rule_id: rule_id.to_string(),
                    firing_id,
                    action: compiled.ast.action.clone(),
                    evidence: result.evidence,
                    auto_generated: true,
                };
                if let Err(err) = self.sink.emit_activation(&event) {
                    // The firing is already durable, so the next cycle's
                    // evaluation would dedupe it away. Keep the event and
                    // re-emit it directly.
                    self.pending_activations
                        .insert((rule_id.to_string(), firing.fingerprint.clone()), event);
                    return Err(err);
                }
                report.fired += 1;
            }
            None => {
                debug!(rule_id, "firing already recorded for this fingerprint");
                report.duplicates += 1;
            }
        }
        Ok(())
    }

    fn retry_pending_activations(&mut self, report: &mut CycleReport) {
        if self.pending_activations.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_activations);
        for (key, event) in pending {
            match self.sink.emit_activation(&event) {
                Ok(()) => {
                    info!(rule_id = %event.rule_id, firing_id = %event.firing_id,
                        "pending activation emitted");
                    report.fired += 1;
                }
                Err(err) => {
                    warn!(rule_id = %event.rule_id, error = %err,
                        "pending activation still rejected");
                    report.errors += 1;
                    self.pending_activations.insert(key, event);
                }
            }
        }
    }
}

/// Handle for a running worker loop. Dropping it does not stop the loop;
/// call [`WorkerHandle::stop`].
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<TriggerWorker>,
}

impl WorkerHandle {
    /// Request a stop and wait for the loop to exit. The in-flight cycle,
    /// if any, completes first.
    pub async fn stop(self) -> TriggerWorker {
        let _ = self.stop_tx.send(true);
        // The loop only exits on the stop signal, so join cannot panic
        // unless a cycle itself panicked.
        self.join.await.expect("worker task panicked")
    }
}

/// Spawn the periodic evaluation loop.
pub fn spawn(mut worker: TriggerWorker, interval: Duration) -> WorkerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "trigger worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => {
                    info!("trigger worker stopping");
                    break;
                }
            }
            // Evaluation is synchronous port I/O; keep it off the async
            // executor threads.
            worker = tokio::task::spawn_blocking(move || {
                let now = Utc::now();
                worker.run_cycle(now);
                worker
            })
            .await
            .expect("evaluation cycle panicked");
        }
        worker
    });
    WorkerHandle { stop_tx, join }
}
