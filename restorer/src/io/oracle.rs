//! Clients for the two external oracles: the severity judge and the plan
//! scheduler.
//!
//! Both are subprocesses that take a JSON request on stdin and answer with a
//! JSON document on stdout. Responses are validated against bundled JSON
//! Schemas (Draft 2020-12) before use. Transient call failures (spawn, exit
//! status, timeout) are retried with backoff; well-formed calls that return
//! schema-violating output get plain format retries.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::types::{Degradation, Preference, Severity, Subtask};
use crate::io::backoff::{BackoffPolicy, retry_with_backoff};
use crate::io::config::OracleConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::PromptEngine;

const ASSESS_SCHEMA: &str = include_str!("../../schemas/assess_response.schema.json");
const COMPARE_SCHEMA: &str = include_str!("../../schemas/compare_response.schema.json");
const ORDER_SCHEMA: &str = include_str!("../../schemas/order_response.schema.json");
const INSIGHT_SCHEMA: &str = include_str!("../../schemas/insight_response.schema.json");

static ASSESS_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(ASSESS_SCHEMA));
static COMPARE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(COMPARE_SCHEMA));
static ORDER_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(ORDER_SCHEMA));
static INSIGHT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(INSIGHT_SCHEMA));

fn compile_schema(schema: &str) -> Validator {
    let value: Value = serde_json::from_str(schema).expect("bundled schema should parse");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&value)
        .expect("bundled schema should compile")
}

/// Judges image quality: per-degradation severity and pairwise preference.
pub trait Judge {
    /// Severity of every judgeable degradation kind in the image.
    fn assess(&mut self, image: &Path) -> Result<BTreeMap<Degradation, Severity>>;

    /// Severity of one targeted degradation kind in the image.
    fn evaluate(&mut self, image: &Path, degradation: Degradation) -> Result<Severity>;

    /// Which of two restorations of the same scene looks better.
    fn compare(&mut self, former: &Path, latter: &Path) -> Result<Preference>;
}

/// Orders an unordered set of subtasks into an execution plan.
pub trait Scheduler {
    /// Return a permutation of `agenda`.
    ///
    /// `experience` carries distilled cross-run scheduling experience when the
    /// engine runs in retrieval mode; without it the oracle is asked to reason
    /// from scratch in two steps. `avoid_first` lists subtasks that already
    /// failed at the head of a plan and should not be scheduled first again.
    fn order(
        &mut self,
        agenda: &[Subtask],
        experience: Option<&str>,
        avoid_first: &[Subtask],
    ) -> Result<Vec<Subtask>>;
}

/// Shared request/retry plumbing for one oracle subprocess.
struct OracleCommand {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    max_format_retries: u32,
    backoff: BackoffPolicy,
}

impl OracleCommand {
    fn from_config(command: &[String], cfg: &OracleConfig) -> Self {
        Self {
            command: command.to_vec(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            max_format_retries: cfg.max_format_retries,
            backoff: BackoffPolicy {
                max_retries: cfg.max_transient_retries,
                initial_delay: Duration::from_millis(cfg.initial_backoff_ms),
                ..BackoffPolicy::default()
            },
        }
    }

    /// Issue `request` and convert the response with `parse`.
    ///
    /// `parse` failures count as format errors and re-issue the whole call up
    /// to `max_format_retries` extra times.
    fn call<T>(
        &self,
        rng: &mut StdRng,
        label: &str,
        request: &Value,
        parse: impl Fn(&Value) -> Result<T>,
    ) -> Result<T> {
        let body = serde_json::to_vec(request).context("serialize oracle request")?;
        let mut last_err = None;
        for attempt in 0..=self.max_format_retries {
            let raw = retry_with_backoff(&self.backoff, rng, label, || self.invoke(&body))?;
            let text = String::from_utf8_lossy(&raw);
            match parse_json(&text).and_then(|value| parse(&value)) {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    warn!(%label, attempt, err = %err, "malformed oracle response");
                    last_err = Some(err);
                }
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow!("no attempt was made"));
        Err(err.context(format!(
            "{label} kept answering malformed responses after {} retries",
            self.max_format_retries
        )))
    }

    fn invoke(&self, stdin: &[u8]) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        debug!(command = %self.command.join(" "), "calling oracle");
        let output =
            run_command_with_timeout(cmd, Some(stdin), self.timeout, self.output_limit_bytes)?;
        if output.timed_out {
            bail!("oracle timed out after {}s", self.timeout.as_secs());
        }
        if !output.status.success() {
            bail!(
                "oracle exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

static FENCE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("fence regex")
});

/// Parse a JSON response body, tolerating a markdown code fence around it.
fn parse_json(text: &str) -> Result<Value> {
    let body = FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| text.trim());
    serde_json::from_str(body).with_context(|| format!("parse oracle response: {body:.200}"))
}

fn validate_response(validator: &Validator, value: &Value) -> Result<()> {
    let messages: Vec<String> = validator.iter_errors(value).map(|err| err.to_string()).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("response violates schema: {}", messages.join("; ")))
    }
}

#[derive(Debug, Deserialize)]
struct AssessResponse {
    evaluation: Vec<AssessEntry>,
}

#[derive(Debug, Deserialize)]
struct AssessEntry {
    degradation: Degradation,
    severity: Severity,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    choice: Preference,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: Vec<Subtask>,
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    insight: String,
}

/// [`Judge`] backed by a configured subprocess command.
pub struct CommandJudge {
    oracle: OracleCommand,
    rng: StdRng,
}

impl CommandJudge {
    pub fn new(cfg: &OracleConfig, seed: u64) -> Self {
        Self {
            oracle: OracleCommand::from_config(&cfg.judge_command, cfg),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Judge for CommandJudge {
    fn assess(&mut self, image: &Path) -> Result<BTreeMap<Degradation, Severity>> {
        let request = json!({ "task": "assess", "image": image });
        self.oracle.call(&mut self.rng, "assess", &request, |value| {
            validate_response(&ASSESS_VALIDATOR, value)?;
            let response: AssessResponse =
                serde_json::from_value(value.clone()).context("decode assess response")?;
            let mut report = BTreeMap::new();
            for entry in response.evaluation {
                if report.insert(entry.degradation, entry.severity).is_some() {
                    bail!("degradation '{}' judged twice", entry.degradation);
                }
            }
            for kind in Degradation::JUDGEABLE {
                if !report.contains_key(&kind) {
                    bail!("judge did not cover degradation '{kind}'");
                }
            }
            Ok(report)
        })
    }

    fn evaluate(&mut self, image: &Path, degradation: Degradation) -> Result<Severity> {
        let request = json!({ "task": "assess", "image": image, "degradation": degradation });
        self.oracle.call(&mut self.rng, "assess", &request, |value| {
            validate_response(&ASSESS_VALIDATOR, value)?;
            let response: AssessResponse =
                serde_json::from_value(value.clone()).context("decode assess response")?;
            response
                .evaluation
                .iter()
                .find(|entry| entry.degradation == degradation)
                .map(|entry| entry.severity)
                .ok_or_else(|| anyhow!("judge did not cover degradation '{degradation}'"))
        })
    }

    fn compare(&mut self, former: &Path, latter: &Path) -> Result<Preference> {
        let request = json!({ "task": "compare", "images": [former, latter] });
        self.oracle.call(&mut self.rng, "compare", &request, |value| {
            validate_response(&COMPARE_VALIDATOR, value)?;
            let response: CompareResponse =
                serde_json::from_value(value.clone()).context("decode compare response")?;
            Ok(response.choice)
        })
    }
}

/// [`Scheduler`] backed by a configured subprocess command.
pub struct CommandScheduler {
    oracle: OracleCommand,
    prompts: PromptEngine,
    rng: StdRng,
}

impl CommandScheduler {
    pub fn new(cfg: &OracleConfig, seed: u64) -> Self {
        Self {
            oracle: OracleCommand::from_config(&cfg.scheduler_command, cfg),
            prompts: PromptEngine::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn order_with_prompt(&mut self, agenda: &[Subtask], prompt: &str) -> Result<Vec<Subtask>> {
        let request = json!({ "task": "order", "prompt": prompt });
        self.oracle.call(&mut self.rng, "order", &request, |value| {
            validate_response(&ORDER_VALIDATOR, value)?;
            let response: OrderResponse =
                serde_json::from_value(value.clone()).context("decode order response")?;
            let mut expected = agenda.to_vec();
            expected.sort();
            let mut got = response.order.clone();
            got.sort();
            if got != expected {
                bail!(
                    "order [{}] is not a permutation of the agenda",
                    response
                        .order
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            Ok(response.order)
        })
    }

    fn insight(&mut self, agenda: &[Subtask]) -> Result<String> {
        let prompt = self.prompts.render_order_insight(agenda)?;
        let request = json!({ "task": "insight", "prompt": prompt });
        self.oracle.call(&mut self.rng, "insight", &request, |value| {
            validate_response(&INSIGHT_VALIDATOR, value)?;
            let response: InsightResponse =
                serde_json::from_value(value.clone()).context("decode insight response")?;
            Ok(response.insight)
        })
    }
}

impl Scheduler for CommandScheduler {
    fn order(
        &mut self,
        agenda: &[Subtask],
        experience: Option<&str>,
        avoid_first: &[Subtask],
    ) -> Result<Vec<Subtask>> {
        let prompt = match experience {
            Some(experience) => {
                self.prompts.render_order_retrieval(agenda, experience, avoid_first)?
            }
            None => {
                let insight = self.insight(agenda)?;
                self.prompts.render_order_final(agenda, &insight, avoid_first)?
            }
        };
        self.order_with_prompt(agenda, &prompt)
    }
}
