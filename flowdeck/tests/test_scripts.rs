//! Script repository and executor integration tests

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use common::{RecordingRunner, TestApp, COMMIT_HASH};
use flowdeck::deploy::orchestrator::DeployOptions;
use flowdeck::errors::EngineError;
use flowdeck::models::deployment::DeploymentStatus;
use flowdeck::models::project::Project;
use flowdeck::models::script::{Hook, HookClass, HookSet, NewScript, RetryPolicy, ScriptType};
use flowdeck::scripts::context::ExecutionContext;
use flowdeck::scripts::executor::ScriptExecutor;
use flowdeck::scripts::language::ScriptLanguage;
use flowdeck::scripts::materialize::SCRIPT_FILE_PREFIX;
use flowdeck::scripts::repository::ScriptRepository;
use flowdeck::utils::BackoffOptions;

fn script(name: &str, content: &str) -> NewScript {
    NewScript {
        name: name.to_string(),
        description: None,
        script_type: ScriptType::Custom,
        language: ScriptLanguage::Bash,
        content: content.to_string(),
        variables: BTreeMap::new(),
        hooks: HookSet::default(),
        timeout_secs: 60,
        retry: RetryPolicy::default(),
        enabled: true,
    }
}

fn context(app: &TestApp, project: &Project) -> ExecutionContext {
    ExecutionContext::new(project.clone(), None, app.projects_root())
}

fn leftover_scripts(app: &TestApp) -> usize {
    std::fs::read_dir(app.scratch_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(SCRIPT_FILE_PREFIX))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_rendering_substitutes_known_tokens_only() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;

    let mut new = script("greet", "echo {{PROJECT_SLUG}} {{GREETING}} {{NOT_A_VARIABLE}}");
    new.variables.insert("GREETING".to_string(), "hello".to_string());
    let stored = app.state.scripts.create(new).await.unwrap();

    let run = app
        .state
        .executor
        .execute(&stored, &context(&app, &project))
        .await
        .unwrap();

    assert!(run.success());
    assert_eq!(run.unresolved, vec!["NOT_A_VARIABLE".to_string()]);
    let executed = app.runner.executed_scripts();
    assert_eq!(executed.len(), 1);
    assert!(executed[0]
        .content
        .contains("echo shop hello {{NOT_A_VARIABLE}}"));
    assert!(executed[0].content.starts_with("#!"));
    assert!(executed[0].line.starts_with("bash "));
}

#[tokio::test]
async fn test_runtime_variables_take_precedence() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;

    let mut new = script("target", "deploy --to {{TARGET}}");
    new.variables.insert("TARGET".to_string(), "staging".to_string());
    let stored = app.state.scripts.create(new).await.unwrap();

    let mut runtime = BTreeMap::new();
    runtime.insert("TARGET".to_string(), "production".to_string());
    let ctx = context(&app, &project).with_runtime_vars(runtime);
    app.state.executor.execute(&stored, &ctx).await.unwrap();

    assert!(app.runner.executed_scripts()[0]
        .content
        .contains("deploy --to production"));
}

#[tokio::test]
async fn test_materialized_files_are_removed_on_every_path() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;
    let ok = app.state.scripts.create(script("ok", "true")).await.unwrap();
    let broken = app
        .state
        .scripts
        .create(script("broken", "exit 3"))
        .await
        .unwrap();

    let ctx = context(&app, &project);
    app.state.executor.execute(&ok, &ctx).await.unwrap();
    app.runner.fail_on(SCRIPT_FILE_PREFIX, 3);
    let run = app.state.executor.execute(&broken, &ctx).await.unwrap();
    assert!(!run.success());

    let executed = app.runner.executed_scripts();
    assert_eq!(executed.len(), 2);
    for captured in &executed {
        assert!(!captured.path.exists(), "{} left behind", captured.path.display());
    }
    assert_eq!(leftover_scripts(&app), 0);
}

#[tokio::test]
async fn test_hooks_run_in_order_and_failures_are_recorded() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;

    let mut new = script("main", "echo main");
    new.hooks = HookSet {
        pre: vec![
            Hook::Inline("echo one".to_string()),
            Hook::Inline("broken-hook".to_string()),
            Hook::Inline("echo two".to_string()),
        ],
        post: vec![Hook::Inline("echo post".to_string())],
        error: vec![Hook::Inline("echo error".to_string())],
    };
    let stored = app.state.scripts.create(new).await.unwrap();
    app.runner.reset();
    app.runner.fail_on("broken-hook", 1);

    let run = app
        .state
        .executor
        .execute(&stored, &context(&app, &project))
        .await
        .unwrap();
    assert!(run.success());

    let lines = app.runner.lines();
    assert_eq!(lines[..3], ["echo one", "broken-hook", "echo two"]);
    assert!(lines[3].starts_with("bash "));
    assert_eq!(lines[4], "echo post");
    assert_eq!(lines.len(), 5);

    let classes: Vec<HookClass> = run.hooks.iter().map(|h| h.class).collect();
    assert_eq!(
        classes,
        [HookClass::Pre, HookClass::Pre, HookClass::Pre, HookClass::Post]
    );
    assert!(!run.hooks[1].success);
    assert_eq!(run.hooks[1].exit_code, Some(1));
    assert!(run.log_text().contains("[pre hook] broken-hook: failed"));
}

#[tokio::test]
async fn test_error_hooks_follow_a_failed_script() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;

    let mut new = script("main", "exit 1");
    new.hooks.post = vec![Hook::Inline("echo post".to_string())];
    new.hooks.error = vec![Hook::Inline("echo error".to_string())];
    let stored = app.state.scripts.create(new).await.unwrap();
    app.runner.fail_on(SCRIPT_FILE_PREFIX, 1);

    let run = app
        .state
        .executor
        .execute(&stored, &context(&app, &project))
        .await
        .unwrap();

    assert!(!run.success());
    assert_eq!(app.runner.count("echo error"), 1);
    assert_eq!(app.runner.count("echo post"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_script_retry_policy() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;

    let mut new = script("flaky", "curl -f https://example.com");
    new.retry = RetryPolicy::attempts(2);
    let stored = app.state.scripts.create(new).await.unwrap();
    app.runner.fail_on(SCRIPT_FILE_PREFIX, 22);

    let run = app
        .state
        .executor
        .execute(&stored, &context(&app, &project))
        .await
        .unwrap();

    assert_eq!(run.result.attempts, 2);
    assert!(run.result.retry_exhausted);
    assert_eq!(app.runner.executed_scripts().len(), 2);
}

#[tokio::test]
async fn test_repository_rejects_hook_cycles() {
    let app = TestApp::new().await;
    let scripts = &app.state.scripts;

    let a = scripts.create(script("a", "echo a")).await.unwrap();
    let mut b = script("b", "echo b");
    b.hooks.pre = vec![Hook::Script { script_id: a.id }];
    let b = scripts.create(b).await.unwrap();

    let mut a_update = script("a", "echo a");
    a_update.hooks.post = vec![Hook::Script { script_id: b.id }];
    let err = scripts.update(a.id, a_update).await.unwrap_err();
    assert!(matches!(err, EngineError::HookCycle(_)), "{err}");

    let mut self_ref = script("a", "echo a");
    self_ref.hooks.error = vec![Hook::Script { script_id: a.id }];
    assert!(matches!(
        scripts.update(a.id, self_ref).await,
        Err(EngineError::HookCycle(_))
    ));

    let mut dangling = script("c", "echo c");
    dangling.hooks.pre = vec![Hook::Script {
        script_id: Uuid::new_v4(),
    }];
    assert!(matches!(
        scripts.create(dangling).await,
        Err(EngineError::ValidationError(_))
    ));

    // The stored graph is unchanged
    assert!(scripts.require(a.id).unwrap().hooks.is_empty());
}

#[tokio::test]
async fn test_executor_refuses_cycles_in_stored_scripts() {
    let app = TestApp::new().await;
    let project = app.add_project("shop").await;

    // Written straight to disk, bypassing repository validation
    let id = Uuid::new_v4();
    let now = chrono::Utc::now().to_rfc3339();
    let rows = serde_json::json!([{
        "id": id,
        "name": "loop",
        "content": "echo loop",
        "hooks": { "pre": [{ "script_id": id }] },
        "created_at": now,
        "updated_at": now,
    }]);
    app.options.layout.scripts_file().write_json(&rows).await.unwrap();

    let repository = Arc::new(
        ScriptRepository::open(&app.options.layout, app.runner.clone())
            .await
            .unwrap(),
    );
    let executor = ScriptExecutor::new(
        app.runner.clone(),
        repository,
        Duration::from_secs(5),
        BackoffOptions::default(),
    );

    let run = executor
        .execute_by_id(id, &context(&app, &project))
        .await
        .unwrap();
    assert!(run.success());
    assert_eq!(run.hooks.len(), 1);
    assert!(!run.hooks[0].success);
    let error = run.hooks[0].error.clone().unwrap_or_default();
    assert!(error.contains(&format!("{} -> {}", id, id)), "{error}");
    assert_eq!(app.runner.executed_scripts().len(), 1);
}

#[tokio::test]
async fn test_syntax_errors_are_rejected_on_create() {
    let app = TestApp::new().await;
    app.runner.fail_on("bash -n", 2);

    let err = app
        .state
        .scripts
        .create(script("bad", "if then fi"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ScriptSyntaxError { .. }));
    assert_eq!(err.exit_code(), 4);
    assert!(app.state.scripts.list().is_empty());
    assert_eq!(leftover_scripts(&app), 0);
}

#[tokio::test]
async fn test_custom_deployment_script_replaces_the_builtin_flow() {
    let app = TestApp::new().await;
    let template = app.add_project("shop").await;
    let generated = app
        .state
        .scripts
        .generate_from_template("node_deployment", &template)
        .await
        .unwrap();
    assert!(generated.name.contains("shop"));

    let mut project = template;
    project.deployment_script_id = Some(generated.id);
    let project = app.save_project(project).await;
    app.runner.reset();

    let deployment = app
        .state
        .orchestrator
        .deploy(&project, DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(app.runner.count("docker build"), 0);
    let executed = app.runner.executed_scripts();
    assert_eq!(executed.len(), 1);
    assert!(!executed[0].content.contains("{{PROJECT_SLUG}}"));
}

#[tokio::test]
async fn test_custom_deployment_script_sees_the_new_commit() {
    let app = TestApp::new().await;
    let mut project = app.add_project("shop").await;
    project.current_commit_hash = Some("0000000000000000000000000000000000000000".to_string());
    let stored = app
        .state
        .scripts
        .create(script("deploy", "echo COMMIT={{COMMIT_HASH}}"))
        .await
        .unwrap();
    project.deployment_script_id = Some(stored.id);
    let project = app.save_project(project).await;
    app.runner.reset();

    let deployment = app
        .state
        .orchestrator
        .deploy(&project, DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(deployment.commit_hash.as_deref(), Some(COMMIT_HASH));

    let executed = app.runner.executed_scripts();
    assert_eq!(executed.len(), 1);
    assert!(
        executed[0].content.contains(&format!("echo COMMIT={}", COMMIT_HASH)),
        "{}",
        executed[0].content
    );
}

#[tokio::test]
async fn test_concurrent_updates_cannot_store_a_cycle() {
    let app = TestApp::with_runner(RecordingRunner::with_delay(Duration::from_millis(20))).await;
    let scripts = &app.state.scripts;
    let a = scripts.create(script("a", "echo a")).await.unwrap();
    let b = scripts.create(script("b", "echo b")).await.unwrap();

    let mut a_to_b = script("a", "echo a");
    a_to_b.hooks.pre = vec![Hook::Script { script_id: b.id }];
    let mut b_to_a = script("b", "echo b");
    b_to_a.hooks.pre = vec![Hook::Script { script_id: a.id }];

    let (first, second) = tokio::join!(scripts.update(a.id, a_to_b), scripts.update(b.id, b_to_a));
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(EngineError::HookCycle(_)))));

    let linked = [a.id, b.id]
        .iter()
        .filter(|id| !scripts.require(**id).unwrap().hooks.is_empty())
        .count();
    assert_eq!(linked, 1);
}
