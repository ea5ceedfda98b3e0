//! End-to-end pipeline runs with a scripted agent.
//!
//! Each test drives `PipelineController::run` against a temp plan dir and
//! inspects both the structured result and the session files left on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pipeline::backlog::Status;
use pipeline::bug_hunt::BUGFIX_DIR_NAME;
use pipeline::core::types::{
    ChangeType, DeltaAnalysis, PipelinePhase, RequirementChange, Severity,
};
use pipeline::io::config::PipelineConfig;
use pipeline::io::process::RunLimits;
use pipeline::io::report::report_path;
use pipeline::io::session::{SessionStore, latest_session_dir, load_session};
use pipeline::pipeline::{PipelineController, PipelineOptions, PipelineResult};
use pipeline::shutdown::ShutdownController;
use pipeline::test_support::{
    RecordingSleeper, ScriptedAgent, ScriptedGateRunner, ScriptedRunner, implementation, phase,
    sample_backlog, subtask, test_results,
};
use pipeline::validation::{ImplementationRunner, RetryPolicy, ValidationGateExecutor};

fn write_prd(root: &Path, text: &str) -> PathBuf {
    let path = root.join("PRD.md");
    fs::write(&path, text).expect("write prd");
    path
}

fn options(root: &Path, skip_qa: bool) -> PipelineOptions {
    PipelineOptions {
        plan_dir: root.join("plan"),
        requirements_path: root.join("PRD.md"),
        skip_qa,
    }
}

fn limits() -> RunLimits {
    RunLimits {
        timeout: Duration::from_secs(5),
        output_limit_bytes: 10_000,
    }
}

/// Full run through an `ImplementationRunner` whose subtasks declare no gates.
fn run_with_agent(root: &Path, agent: &ScriptedAgent, config: &PipelineConfig) -> PipelineResult {
    let runner = ImplementationRunner::new(
        agent,
        ValidationGateExecutor::new(ScriptedGateRunner::new(vec![]), limits()),
        RecordingSleeper::default(),
        RetryPolicy::default(),
        root,
    );
    PipelineController::new(
        agent,
        &runner,
        config,
        options(root, false),
        ShutdownController::new().subscribe(),
    )
    .run()
}

#[test]
fn blocking_bugs_are_fixed_in_a_bugfix_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\nBuild the thing.\n");
    let agent = ScriptedAgent::default().with_default_implementation(implementation(vec![]));
    agent.push_decomposition(sample_backlog());
    agent.push_report(test_results(&[Severity::Critical, Severity::Minor]));
    agent.push_report(test_results(&[Severity::Minor]));

    let result = run_with_agent(temp.path(), &agent, &PipelineConfig::default());

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.phase, PipelinePhase::ShutdownComplete);
    assert_eq!((result.total_items, result.completed_items), (3, 3));
    let qa = result.bug_hunt.expect("bug hunt summary");
    assert_eq!(qa.iterations, 1);
    assert!(qa.complete);
    assert_eq!(qa.blocking_bug_count, 0);
    assert_eq!(agent.explore_calls().len(), 6);

    let session_path = result.session_path.expect("session path");
    let parent_id = result.session_id.expect("session id");
    assert!(report_path(&session_path).exists());

    let bugfix_dir = latest_session_dir(&session_path.join(BUGFIX_DIR_NAME))
        .expect("list bugfix sessions")
        .expect("bugfix session");
    let bugfix = load_session(&bugfix_dir).expect("load bugfix session");
    assert_eq!(qa.bugfix_session_id.as_deref(), Some(bugfix.metadata.id.as_str()));
    assert_eq!(bugfix.metadata.parent_session_id.as_deref(), Some(parent_id.as_str()));
    let fixed: Vec<(&str, Status)> = bugfix
        .backlog
        .subtasks()
        .map(|s| (s.id.as_str(), s.status))
        .collect();
    assert_eq!(
        fixed,
        vec![
            ("PFIX.M1.T001.S1", Status::Complete),
            ("PFIX.M1.T002.S1", Status::Complete)
        ]
    );
    assert!(!report_path(&bugfix_dir).exists());
}

#[test]
fn fix_cycle_stops_after_max_iterations() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\n");
    let agent = ScriptedAgent::default().with_default_implementation(implementation(vec![]));
    agent.push_decomposition(sample_backlog());
    for _ in 0..4 {
        agent.push_report(test_results(&[Severity::Major]));
    }

    let result = run_with_agent(temp.path(), &agent, &PipelineConfig::default());

    assert_eq!(result.error, None);
    let qa = result.bug_hunt.expect("bug hunt summary");
    assert_eq!(qa.iterations, 3);
    assert!(!qa.complete);
    assert_eq!(qa.blocking_bug_count, 1);
    let report = qa.report_path.expect("remaining report");
    assert!(report.exists());
    assert!(report.components().any(|c| c.as_os_str() == BUGFIX_DIR_NAME));
    assert_eq!(agent.explore_calls().len(), 12);
}

#[test]
fn minor_bugs_complete_qa_without_a_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\n");
    let agent = ScriptedAgent::default().with_default_implementation(implementation(vec![]));
    agent.push_decomposition(sample_backlog());
    agent.push_report(test_results(&[Severity::Minor, Severity::Cosmetic]));

    let result = run_with_agent(temp.path(), &agent, &PipelineConfig::default());

    assert!(result.success);
    let qa = result.bug_hunt.expect("bug hunt summary");
    assert_eq!((qa.iterations, qa.bug_count), (0, 2));
    assert!(qa.complete);
    assert_eq!(qa.bugfix_session_id, None);
    let session_path = result.session_path.expect("session path");
    assert!(!report_path(&session_path).exists());
    assert!(!session_path.join(BUGFIX_DIR_NAME).exists());
}

#[test]
fn disabled_qa_is_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\n");
    let agent = ScriptedAgent::default().with_default_implementation(implementation(vec![]));
    agent.push_decomposition(sample_backlog());
    let mut config = PipelineConfig::default();
    config.bug_hunt.enabled = false;

    let result = run_with_agent(temp.path(), &agent, &config);
    assert!(result.success);
    assert!(result.bug_hunt.is_none());
    assert!(agent.explore_calls().is_empty());
}

/// Interrupt after the first subtask, then resume where the run stopped.
#[test]
fn interrupted_run_persists_and_resumes() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\n");
    let agent = ScriptedAgent::default();
    agent.push_decomposition(sample_backlog());
    let config = PipelineConfig::default();
    let shutdown = ShutdownController::new();
    let runner = ScriptedRunner::succeeding().requesting_shutdown(shutdown.clone());

    let first = PipelineController::new(
        &agent,
        &runner,
        &config,
        options(temp.path(), true),
        shutdown.subscribe(),
    )
    .run();

    assert!(!first.success);
    assert!(first.shutdown_interrupted);
    assert_eq!(first.shutdown_reason.as_deref(), Some("SIGINT"));
    assert_eq!(first.phase, PipelinePhase::ShutdownInterrupted);
    assert_eq!(first.completed_items, 1);
    assert_eq!(first.error, None);

    let on_disk = load_session(&first.session_path.clone().expect("session path"))
        .expect("load session");
    assert_eq!(on_disk.backlog.status_of("P1.M1.T1.S1"), Some(Status::Complete));
    assert_eq!(on_disk.backlog.status_of("P1.M1.T1.S2"), Some(Status::Planned));

    let resumed_runner = ScriptedRunner::succeeding();
    let second = PipelineController::new(
        &agent,
        &resumed_runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();

    assert!(second.success, "{:?}", second.error);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(resumed_runner.executed(), vec!["P1.M1.T1.S2", "P1.M1.T2.S1"]);
}

#[test]
fn changed_requirements_replan_only_affected_work() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD v1\n");
    let agent = ScriptedAgent::default();
    agent.push_decomposition(sample_backlog());
    let config = PipelineConfig::default();

    let first_runner = ScriptedRunner::succeeding();
    let first = PipelineController::new(
        &agent,
        &first_runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();
    assert!(first.success);

    write_prd(temp.path(), "# PRD v2\nOutput is now JSON.\n");
    agent.push_delta(DeltaAnalysis {
        changes: vec![RequirementChange {
            item_id: "P1.M1.T2".to_string(),
            change_type: ChangeType::Modified,
            description: "JSON output".to_string(),
            impact: "T2 must be redone".to_string(),
        }],
        patch_instructions: "Re-run T2.".to_string(),
        task_ids: vec!["P1.M1.T2".to_string()],
        additions: Vec::new(),
    });
    let second_runner = ScriptedRunner::succeeding();
    let second = PipelineController::new(
        &agent,
        &second_runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();

    assert!(second.success, "{:?}", second.error);
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(second_runner.executed(), vec!["P1.M1.T2.S1"]);
    assert_eq!(agent.delta_completed_ids()[0].len(), 5);

    let mut store = SessionStore::new(temp.path().join("plan"));
    let state = store.initialize("# PRD v2\nOutput is now JSON.\n").expect("reload");
    assert_eq!(state.metadata.parent_session_id, first.session_id);
}

/// An added requirement produces new subtasks that run on the next pass.
#[test]
fn added_requirements_extend_the_backlog() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD v1\n");
    let agent = ScriptedAgent::default();
    agent.push_decomposition(sample_backlog());
    let config = PipelineConfig::default();
    let first = PipelineController::new(
        &agent,
        &ScriptedRunner::succeeding(),
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();
    assert!(first.success);

    write_prd(temp.path(), "# PRD v2\nAlso export CSV.\n");
    agent.push_delta(DeltaAnalysis {
        changes: vec![RequirementChange {
            item_id: "P1.M1.T3".to_string(),
            change_type: ChangeType::Added,
            description: "CSV export".to_string(),
            impact: "new task".to_string(),
        }],
        patch_instructions: "Add T3.".to_string(),
        task_ids: Vec::new(),
        additions: vec![phase(
            "P1",
            vec![(
                "P1.M1",
                vec![("P1.M1.T3", vec![subtask("P1.M1.T3.S1", &["P1.M1.T2"])])],
            )],
        )],
    });
    let runner = ScriptedRunner::succeeding();
    let second = PipelineController::new(
        &agent,
        &runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();

    assert!(second.success, "{:?}", second.error);
    assert_eq!(runner.executed(), vec!["P1.M1.T3.S1"]);
    assert_eq!((second.total_items, second.completed_items), (4, 4));
}

/// Dependents of a removed requirement still run, and QA is not skipped.
#[test]
fn removed_dependency_unblocks_dependents() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD v1\n");
    let agent = ScriptedAgent::default();
    agent.push_decomposition(sample_backlog());
    let config = PipelineConfig::default();
    let first_runner = ScriptedRunner::succeeding().failing("P1.M1.T1.S1");
    let first = PipelineController::new(
        &agent,
        &first_runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();
    assert_eq!(first.failed_items, 1);
    assert_eq!(first_runner.executed(), vec!["P1.M1.T1.S1"]);

    write_prd(temp.path(), "# PRD v2\nT1 is no longer needed.\n");
    agent.push_delta(DeltaAnalysis {
        changes: vec![RequirementChange {
            item_id: "P1.M1.T1".to_string(),
            change_type: ChangeType::Removed,
            description: "drop T1".to_string(),
            impact: "T1 is obsolete".to_string(),
        }],
        patch_instructions: String::new(),
        task_ids: Vec::new(),
        additions: Vec::new(),
    });
    agent.push_report(test_results(&[]));
    let runner = ScriptedRunner::succeeding();
    let second = PipelineController::new(
        &agent,
        &runner,
        &config,
        options(temp.path(), false),
        ShutdownController::new().subscribe(),
    )
    .run();

    assert!(second.success, "{:?}", second.error);
    assert_eq!(runner.executed(), vec!["P1.M1.T2.S1"]);
    assert_eq!((second.total_items, second.failed_items), (1, 0));
    assert_eq!(second.phase, PipelinePhase::ShutdownComplete);
    assert!(second.bug_hunt.expect("qa ran").complete);
}

#[test]
fn execution_error_is_captured_in_the_result() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\n");
    let agent = ScriptedAgent::default();
    agent.push_decomposition(sample_backlog());
    let runner = ScriptedRunner::succeeding().erroring("P1.M1.T1.S2");
    let config = PipelineConfig::default();

    let result = PipelineController::new(
        &agent,
        &runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();

    assert!(!result.success);
    assert_eq!(result.phase, PipelinePhase::PrdDecomposed);
    assert!(result.error.expect("error").contains("execute P1.M1.T1.S2"));
    assert_eq!((result.completed_items, result.failed_items), (1, 1));
}

#[test]
fn safety_cap_is_a_coded_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_prd(temp.path(), "# PRD\n");
    let agent = ScriptedAgent::default();
    agent.push_decomposition(sample_backlog());
    let runner = ScriptedRunner::succeeding();
    let mut config = PipelineConfig::default();
    config.orchestrator.max_iterations = 1;

    let result = PipelineController::new(
        &agent,
        &runner,
        &config,
        options(temp.path(), true),
        ShutdownController::new().subscribe(),
    )
    .run();

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("SAFETY_CAP_EXCEEDED"));
    assert_eq!(runner.executed().len(), 1);
}
