//! [`Agent`] backed by an [`Executor`] (by default `codex exec`).
//!
//! Each call renders a prompt, materializes the output schema, and gets its
//! own numbered directory under the state dir holding the agent's output
//! and transcript.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use anyhow::Result;
use minijinja::context;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::agents::{
    Agent, DeltaRequest, ExploreRequest, FixRequest, ImplementRequest, Implementation,
    ReportRequest,
};
use crate::backlog::Backlog;
use crate::core::types::{DeltaAnalysis, TestResults};
use crate::io::executor::{ExecRequest, Executor, execute_and_load_json};
use crate::io::process::RunLimits;
use crate::io::prompt::{PromptEngine, PromptTemplate};
use crate::io::schema::{SchemaKind, materialize};

#[derive(Debug, Deserialize)]
struct Findings {
    findings: String,
}

pub struct CodexAgent<E: Executor> {
    executor: E,
    workdir: PathBuf,
    state_dir: PathBuf,
    prompts: PromptEngine,
    limits: RunLimits,
    calls: Cell<u32>,
}

impl<E: Executor> CodexAgent<E> {
    /// `workdir` is where the agent edits code; `state_dir` holds prompts'
    /// outputs, schemas, and logs.
    pub fn new(
        executor: E,
        workdir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        limits: RunLimits,
        prompt_budget_bytes: usize,
    ) -> Result<Self> {
        Ok(Self {
            executor,
            workdir: workdir.into(),
            state_dir: state_dir.into(),
            prompts: PromptEngine::new(prompt_budget_bytes)?,
            limits,
            calls: Cell::new(0),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[instrument(skip(self, prompt), fields(template = template.name()))]
    fn call<T: DeserializeOwned>(
        &self,
        template: PromptTemplate,
        schema: SchemaKind,
        prompt: String,
    ) -> Result<T> {
        let seq = self.calls.get() + 1;
        self.calls.set(seq);
        let call_dir = self
            .state_dir
            .join("calls")
            .join(format!("{seq:04}_{}", template.name()));
        let request = ExecRequest {
            workdir: self.workdir.clone(),
            prompt,
            output_schema_path: materialize(schema, &self.state_dir.join("schemas"))?,
            output_path: call_dir.join("output.json"),
            log_path: call_dir.join("executor.log"),
            limits: self.limits,
        };
        debug!(call_dir = %call_dir.display(), "dispatching agent call");
        execute_and_load_json(&self.executor, &request, schema)
    }
}

impl<E: Executor> Agent for CodexAgent<E> {
    fn decompose(&self, requirements: &str) -> Result<Backlog> {
        let prompt = self.prompts.render(
            PromptTemplate::Architect,
            context! { requirements => requirements.trim() },
        )?;
        self.call(PromptTemplate::Architect, SchemaKind::Backlog, prompt)
    }

    fn implement(&self, request: &ImplementRequest<'_>) -> Result<Implementation> {
        let prompt = self.prompts.render(
            PromptTemplate::Coder,
            context! {
                subtask => request.subtask,
                dependencies => request.completed_dependencies,
            },
        )?;
        self.call(PromptTemplate::Coder, SchemaKind::Implementation, prompt)
    }

    fn fix(&self, request: &FixRequest<'_>) -> Result<Implementation> {
        let prompt = self.prompts.render(
            PromptTemplate::Fixer,
            context! {
                subtask => request.subtask,
                attempt => request.attempt,
                failures => request.failures,
            },
        )?;
        self.call(PromptTemplate::Fixer, SchemaKind::Implementation, prompt)
    }

    fn analyze_delta(&self, request: &DeltaRequest<'_>) -> Result<DeltaAnalysis> {
        let prompt = self.prompts.render(
            PromptTemplate::Delta,
            context! {
                old_requirements => request.old_requirements.trim(),
                new_requirements => request.new_requirements.trim(),
                completed_ids => request.completed_ids,
                item_ids => request.item_ids,
            },
        )?;
        self.call(PromptTemplate::Delta, SchemaKind::DeltaAnalysis, prompt)
    }

    fn explore(&self, request: &ExploreRequest<'_>) -> Result<String> {
        let prompt = self.prompts.render(
            PromptTemplate::Explore,
            context! {
                stage => request.stage.as_str(),
                requirements => request.requirements.trim(),
                previous => request.previous,
            },
        )?;
        let out: Findings = self.call(PromptTemplate::Explore, SchemaKind::Findings, prompt)?;
        Ok(out.findings)
    }

    fn report(&self, request: &ReportRequest<'_>) -> Result<TestResults> {
        let prompt = self.prompts.render(
            PromptTemplate::Report,
            context! {
                requirements => request.requirements.trim(),
                findings => request.findings,
            },
        )?;
        self.call(PromptTemplate::Report, SchemaKind::TestResults, prompt)
    }
}
