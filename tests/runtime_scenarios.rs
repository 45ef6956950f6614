//! 整体运行场景：脚本化角色 + 记录型 sink 驱动完整运行

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use hive::config::AppConfig;
use hive::core::{
    FailureRecord, InvalidResumeError, ResumeDecision, ResumeOutcome, ResumeToken, RoleError,
    RunHandle, RunId, RunSnapshot, Runtime, RuntimeBuilder, Step, StepStatus, TaskState,
    TaskStatus,
};
use hive::memory::{
    ContextSnapshot, EntryKind, MemoryAck, MemoryError, MemoryRecord, MemoryStore, MemoryTier,
    TieredMemory,
};
use hive::roles::{
    Architect, Executor, KnowledgeExtractor, OutcomeExtractor, RoleKind, Roles, Verdict, Verifier,
};
use hive::stream::{AgentStream, RecordingSink};
use hive::tools::{capability, Tool, ToolCall, ToolExecutor};

// ---------- 脚本化角色 ----------

#[derive(Default)]
struct ScriptedArchitect {
    plans: Mutex<VecDeque<Vec<String>>>,
    seen_failures: Mutex<Vec<Vec<FailureRecord>>>,
    seen_contexts: Mutex<Vec<ContextSnapshot>>,
}

impl ScriptedArchitect {
    fn new(plans: &[&[&str]]) -> Self {
        let plans = plans
            .iter()
            .map(|p| p.iter().map(|s| s.to_string()).collect())
            .collect();
        Self {
            plans: Mutex::new(plans),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Architect for ScriptedArchitect {
    async fn plan(
        &self,
        _task: &str,
        context: &ContextSnapshot,
        failures: &[FailureRecord],
        stream: &AgentStream,
    ) -> Result<Vec<String>, RoleError> {
        self.seen_failures.lock().unwrap().push(failures.to_vec());
        self.seen_contexts.lock().unwrap().push(context.clone());
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RoleError::new(RoleKind::Architect, "no plan scripted"))?;
        stream.delta("planning");
        stream.finish(format!(" {} steps", plan.len()));
        Ok(plan)
    }
}

/// "shell: <cmd>" 调用 shell 工具，"slow: <x>" 调用慢工具，其余调用 echo
struct ScriptedExecutor;

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn propose(
        &self,
        step: &Step,
        _context: &ContextSnapshot,
        _tools: &ToolExecutor,
        stream: &AgentStream,
    ) -> Result<ToolCall, RoleError> {
        stream.finish(format!("step #{}", step.id));
        if let Some(cmd) = step.description.strip_prefix("shell: ") {
            return Ok(ToolCall::new("shell", json!({ "cmd": cmd })));
        }
        if let Some(job) = step.description.strip_prefix("slow: ") {
            return Ok(ToolCall::new("slow", json!({ "job": job })));
        }
        if let Some(cmd) = step.description.strip_prefix("osascript: ") {
            return Ok(ToolCall::new("osascript", json!({ "script": cmd })));
        }
        Ok(ToolCall::new("echo", json!({ "text": step.description })))
    }
}

/// 按顺序给出结论，用完后一律 SUCCESS
struct ScriptedVerifier {
    verdicts: Mutex<VecDeque<Verdict>>,
}

impl ScriptedVerifier {
    fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
        }
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(
        &self,
        _step: &Step,
        _result: &hive::core::StepResult,
        _context: &ContextSnapshot,
        stream: &AgentStream,
    ) -> Result<Verdict, RoleError> {
        let verdict = self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Verdict::Success);
        stream.finish(format!("{:?}", verdict));
        Ok(verdict)
    }
}

/// 计数并保存收到的记录；设置 hold 时等到通知才返回
#[derive(Default)]
struct CountingExtractor {
    calls: AtomicUsize,
    last: Mutex<Option<TaskState>>,
    hold: Option<Arc<Notify>>,
}

#[async_trait]
impl KnowledgeExtractor for CountingExtractor {
    async fn extract(&self, state: &TaskState) -> Result<Vec<MemoryRecord>, RoleError> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(state.clone());
        OutcomeExtractor.extract(state).await
    }
}

// ---------- 测试工具 ----------

struct CapTool {
    name: &'static str,
    caps: &'static [&'static str],
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CapTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool with capability tags"
    }

    fn capabilities(&self) -> BTreeSet<String> {
        self.caps.iter().map(|c| c.to_string()).collect()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ran: {}", args))
    }
}

/// 开始时计数，睡眠后再计数，用来观察调用是否被中途打断
struct SlowTool {
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "sleeps before answering"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(format!("slept: {}", args["job"]))
    }
}

struct Harness {
    runtime: Runtime,
    architect: Arc<ScriptedArchitect>,
    extractor: Arc<CountingExtractor>,
    sink: Arc<RecordingSink>,
    shell_runs: Arc<AtomicUsize>,
    slow_started: Arc<AtomicUsize>,
    slow_finished: Arc<AtomicUsize>,
    memory: Arc<TieredMemory>,
}

fn harness(config: AppConfig, plans: &[&[&str]], verdicts: Vec<Verdict>) -> Harness {
    harness_with(config, plans, verdicts, CountingExtractor::default())
}

fn harness_with(
    config: AppConfig,
    plans: &[&[&str]],
    verdicts: Vec<Verdict>,
    extractor: CountingExtractor,
) -> Harness {
    let architect = Arc::new(ScriptedArchitect::new(plans));
    let extractor = Arc::new(extractor);
    let shell_runs = Arc::new(AtomicUsize::new(0));
    let slow_started = Arc::new(AtomicUsize::new(0));
    let slow_finished = Arc::new(AtomicUsize::new(0));
    let memory = Arc::new(TieredMemory::new(100));
    let roles = Roles {
        architect: architect.clone(),
        executor: Arc::new(ScriptedExecutor),
        verifier: Arc::new(ScriptedVerifier::new(verdicts)),
        extractor: extractor.clone(),
    };
    let runtime = RuntimeBuilder::new(config)
        .with_roles(roles)
        .with_memory(memory.clone())
        .with_tool(SlowTool {
            started: slow_started.clone(),
            finished: slow_finished.clone(),
        })
        .with_tool(CapTool {
            name: "shell",
            caps: &[capability::SHELL_EXECUTION],
            invocations: shell_runs.clone(),
        })
        .with_tool(CapTool {
            name: "osascript",
            caps: &[capability::NATIVE_SCRIPTING],
            invocations: Arc::new(AtomicUsize::new(0)),
        })
        .build()
        .unwrap();
    Harness {
        runtime,
        architect,
        extractor,
        sink: Arc::new(RecordingSink::new()),
        shell_runs,
        slow_started,
        slow_finished,
        memory,
    }
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.llm.provider = "mock".into();
    cfg
}

async fn wait_status(handle: &RunHandle, status: TaskStatus) -> RunSnapshot {
    let mut rx = handle.snapshots();
    let snap = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == status))
        .await
        .expect("timed out waiting for status")
        .expect("run ended before reaching status")
        .clone();
    snap
}

async fn run_to_end(h: &Harness, task: &str) -> TaskState {
    let handle = h.runtime.start(task, h.sink.clone());
    tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("run did not finish")
        .unwrap()
}

fn assert_sequences_monotonic(sink: &RecordingSink) {
    let mut last: HashMap<String, u64> = HashMap::new();
    for e in sink.events() {
        if let Some(prev) = last.get(&e.agent_name) {
            assert!(e.sequence_index > *prev, "sequence went backwards for {}", e.agent_name);
        }
        last.insert(e.agent_name.clone(), e.sequence_index);
    }
}

// ---------- 场景 ----------

#[tokio::test]
async fn test_all_steps_done_with_task_complete() {
    let h = harness(
        config(),
        &[&["collect logs", "compress logs", "upload archive"]],
        vec![Verdict::Success, Verdict::Success, Verdict::TaskComplete],
    );
    let state = run_to_end(&h, "archive yesterday's logs").await;

    assert_eq!(state.status, TaskStatus::Done);
    assert!(!state.final_response.clone().unwrap().is_empty());
    assert!(state.failure_reason.is_none());
    assert!(state.steps.iter().all(|s| s.status == StepStatus::Done));
    assert_eq!(state.plans_accepted(), 1);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert!(h.memory.len(MemoryTier::Episodic).await >= 1);
    assert_eq!(h.memory.len(MemoryTier::Working).await, 0);
    assert!(h.sink.text_of("orchestrator").contains("Completed"));
    assert_sequences_monotonic(&h.sink);
}

#[tokio::test]
async fn test_repeated_failure_forces_single_replan() {
    let mut cfg = config();
    cfg.runtime.max_replans = 2;
    let h = harness(
        cfg,
        &[&["fetch page", "parse table", "save csv"], &["parse table with fallback", "save csv"]],
        vec![
            Verdict::Success,
            Verdict::Failure("no table found".into()),
            Verdict::Failure("still no table".into()),
            Verdict::Success,
            Verdict::TaskComplete,
        ],
    );
    let state = run_to_end(&h, "scrape prices").await;

    assert_eq!(state.status, TaskStatus::Done);
    assert_eq!(state.replan_count, 1);
    assert_eq!(
        state.count_transitions(TaskStatus::Verifying, TaskStatus::Replanning),
        1
    );
    assert_eq!(state.plans_accepted(), 1 + state.replan_count as usize);
    assert_eq!(state.fail_count, 0);
    // 步骤 id 不复用
    let ids: Vec<u64> = state.steps.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(state.step(2).unwrap().retry_count, 2);

    let failures = h.architect.seen_failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 2);
    assert!(failures[0].is_empty());
    let reasons: Vec<&str> = failures[1].iter().map(|f| f.reason.as_str()).collect();
    assert_eq!(reasons, vec!["no table found", "still no table"]);
    assert!(failures[1].last().unwrap().strategy_shift);
}

#[tokio::test]
async fn test_replan_cap_exceeded_fails() {
    let mut cfg = config();
    cfg.runtime.max_replans = 1;
    cfg.runtime.max_replan_cycles = 1;
    let h = harness(
        cfg,
        &[&["step"], &["step again"]],
        vec![Verdict::Failure("bad".into()), Verdict::Failure("bad again".into())],
    );
    let state = run_to_end(&h, "do the thing").await;
    assert_eq!(state.status, TaskStatus::Failed);
    assert_eq!(state.replan_count, 1);
    assert!(state.failure_reason.unwrap().contains("replanning cap"));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shell_blocked_then_confirmed() {
    let h = harness(
        config(),
        &[&["shell: ls /tmp", "report"]],
        vec![Verdict::Success, Verdict::TaskComplete],
    );
    let handle = h.runtime.start("list temp files", h.sink.clone());
    let paused = wait_status(&handle, TaskStatus::Paused).await;
    let pause = paused.pause.clone().unwrap();
    assert_eq!(pause.tool_name, "shell");
    assert!(pause.reason.contains("shell"));
    assert!(pause.confirmable);
    assert_eq!(h.shell_runs.load(Ordering::SeqCst), 0);

    let outcome = h
        .runtime
        .resume(handle.run_id, pause.resume_token, ResumeDecision::Confirm)
        .unwrap();
    assert_eq!(outcome, ResumeOutcome::Applied);
    let replay = h
        .runtime
        .resume(handle.run_id, pause.resume_token, ResumeDecision::Deny)
        .unwrap();
    assert_eq!(replay, ResumeOutcome::AlreadyApplied);

    let run_id = handle.run_id;
    let state = handle.join().await.unwrap();
    assert_eq!(state.status, TaskStatus::Done);
    assert_eq!(h.shell_runs.load(Ordering::SeqCst), 1);
    // 确认后重试的是同一个步骤
    let step = state.step(1).unwrap();
    assert_eq!(step.status, StepStatus::Done);
    assert!(step.description.starts_with("shell:"));
    assert_eq!(state.steps.len(), 2);
    assert_eq!(state.count_transitions(TaskStatus::Paused, TaskStatus::Executing), 1);
    assert!(h.sink.text_of("orchestrator").contains(&pause.reason));

    // 结束的运行已注销
    assert_eq!(
        h.runtime
            .resume(run_id, pause.resume_token, ResumeDecision::Confirm),
        Err(InvalidResumeError::UnknownRun)
    );
    assert_eq!(h.runtime.active_runs(), 0);
}

#[tokio::test]
async fn test_deny_fails_run_with_reason() {
    let h = harness(config(), &[&["shell: rm -rf build"]], vec![]);
    let handle = h.runtime.start("clean build dir", h.sink.clone());
    let paused = wait_status(&handle, TaskStatus::Paused).await;
    let token = paused.pause.unwrap().resume_token;

    assert_eq!(
        h.runtime
            .resume(handle.run_id, ResumeToken::new(), ResumeDecision::Deny),
        Err(InvalidResumeError::StaleToken)
    );
    h.runtime
        .resume(handle.run_id, token, ResumeDecision::Deny)
        .unwrap();

    let state = handle.join().await.unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
    assert!(state.failure_reason.unwrap().contains("denied"));
    assert!(state.final_response.is_none());
    assert_eq!(h.shell_runs.load(Ordering::SeqCst), 0);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_confirmation_timeout_is_deny() {
    let mut cfg = config();
    cfg.runtime.confirmation_timeout_seconds = 1;
    let h = harness(cfg, &[&["shell: reboot"]], vec![]);
    let state = tokio::time::timeout(Duration::from_secs(10), async {
        h.runtime.start("restart", h.sink.clone()).join().await
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
    assert!(state.failure_reason.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_irrevocable_block_cannot_be_confirmed() {
    let mut cfg = config();
    cfg.runtime.unsafe_mode = true;
    cfg.runtime
        .irrevocable_capability_tags
        .insert(capability::NATIVE_SCRIPTING.to_string());
    let h = harness(cfg, &[&["osascript: quit app"]], vec![]);
    let handle = h.runtime.start("close the app", h.sink.clone());
    let paused = wait_status(&handle, TaskStatus::Paused).await;
    let pause = paused.pause.unwrap();
    assert!(!pause.confirmable);

    assert_eq!(
        h.runtime
            .resume(handle.run_id, pause.resume_token, ResumeDecision::Confirm),
        Err(InvalidResumeError::NotConfirmable)
    );
    assert_eq!(
        h.runtime.snapshot(handle.run_id).unwrap().status,
        TaskStatus::Paused
    );
    h.runtime
        .resume(handle.run_id, pause.resume_token, ResumeDecision::Deny)
        .unwrap();
    let state = handle.join().await.unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_unsafe_mode_allows_denied_tag() {
    let mut cfg = config();
    cfg.runtime.unsafe_mode = true;
    let h = harness(cfg, &[&["shell: uptime"]], vec![Verdict::TaskComplete]);
    let state = run_to_end(&h, "check uptime").await;
    assert_eq!(state.status, TaskStatus::Done);
    assert_eq!(h.shell_runs.load(Ordering::SeqCst), 1);
    assert!(state.pause_info.is_none());
}

#[tokio::test]
async fn test_cancel_while_executing_lets_step_finish() {
    let h = harness(
        config(),
        &[&["prepare", "slow: reindex", "publish"]],
        vec![Verdict::Success],
    );
    let handle = h.runtime.start("rebuild index", h.sink.clone());
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.slow_started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slow tool never started");

    h.runtime.cancel(handle.run_id).unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();

    // 取消在下一个转移边界生效，进行中的工具调用跑完并记录
    assert_eq!(h.slow_finished.load(Ordering::SeqCst), 1);
    assert_eq!(state.status, TaskStatus::Failed);
    assert_eq!(state.failure_reason.as_deref(), Some("cancelled"));
    let step = state.step(2).unwrap();
    assert_eq!(
        step.result,
        Some(hive::core::StepResult::Output("slept: \"reindex\"".into()))
    );
    assert_eq!(
        state.count_transitions(TaskStatus::Executing, TaskStatus::Verifying),
        2
    );
    assert_eq!(state.step(3).unwrap().status, StepStatus::Pending);

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    let partial = h.extractor.last.lock().unwrap().clone().unwrap();
    assert_eq!(partial.status, TaskStatus::Failed);
    assert_eq!(partial.step(1).unwrap().status, StepStatus::Done);
    assert!(partial.step(2).unwrap().result.is_some());
    assert_eq!(h.memory.len(MemoryTier::Working).await, 0);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let hold = Arc::new(Notify::new());
    let h = harness_with(
        config(),
        &[&["shell: du -sh /var"]],
        vec![],
        CountingExtractor {
            hold: Some(hold.clone()),
            ..Default::default()
        },
    );
    let handle = h.runtime.start("measure disk usage", h.sink.clone());
    let pause = wait_status(&handle, TaskStatus::Paused).await.pause.unwrap();

    h.runtime.cancel(handle.run_id).unwrap();
    let failed = wait_status(&handle, TaskStatus::Failed).await;
    assert_eq!(failed.failure_reason.as_deref(), Some("cancelled"));
    // 收尾尚未完成，运行仍在注册表中，但等待已撤销
    assert_eq!(
        h.runtime
            .resume(handle.run_id, pause.resume_token, ResumeDecision::Confirm),
        Err(InvalidResumeError::NotPaused)
    );

    hold.notify_one();
    let run_id = handle.run_id;
    let state = handle.join().await.unwrap();
    assert_eq!(state.status, TaskStatus::Failed);
    assert!(state.pause_info.is_none());
    assert_eq!(h.shell_runs.load(Ordering::SeqCst), 0);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.runtime
            .resume(run_id, pause.resume_token, ResumeDecision::Deny),
        Err(InvalidResumeError::UnknownRun)
    );
}

#[tokio::test]
async fn test_shutdown_cancels_every_run() {
    let h = harness(config(), &[&["shell: ls"], &["shell: pwd"]], vec![]);
    let first = h.runtime.start("one", h.sink.clone());
    wait_status(&first, TaskStatus::Paused).await;
    let second = h.runtime.start("two", h.sink.clone());
    wait_status(&second, TaskStatus::Paused).await;
    assert_eq!(h.runtime.active_runs(), 2);

    h.runtime.shutdown();
    for handle in [first, second] {
        let state = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.failure_reason.as_deref(), Some("cancelled"));
    }
    assert_eq!(h.runtime.active_runs(), 0);
}

#[tokio::test]
async fn test_finished_runs_leave_registry() {
    let h = harness(
        config(),
        &[&["a"], &["b"], &["c"]],
        vec![Verdict::TaskComplete, Verdict::TaskComplete, Verdict::TaskComplete],
    );
    let mut ids = Vec::new();
    for task in ["first", "second", "third"] {
        let handle = h.runtime.start(task, h.sink.clone());
        ids.push(handle.run_id);
        let state = handle.join().await.unwrap();
        assert_eq!(state.status, TaskStatus::Done);
    }
    assert_eq!(h.runtime.active_runs(), 0);
    for id in ids {
        assert!(h.runtime.snapshot(id).is_none());
        assert_eq!(
            h.runtime.resume(id, ResumeToken::new(), ResumeDecision::Confirm),
            Err(InvalidResumeError::UnknownRun)
        );
    }
}

#[tokio::test]
async fn test_architect_error_is_fatal() {
    let h = harness(config(), &[], vec![]);
    let state = run_to_end(&h, "anything").await;
    assert_eq!(state.status, TaskStatus::Failed);
    let reason = state.failure_reason.unwrap();
    assert!(reason.contains("architect"));
    assert!(reason.contains("no plan scripted"));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_premature_task_complete_continues() {
    let h = harness(
        config(),
        &[&["first", "second"]],
        vec![Verdict::TaskComplete, Verdict::TaskComplete],
    );
    let state = run_to_end(&h, "two things").await;
    assert_eq!(state.status, TaskStatus::Done);
    assert_eq!(state.verifier_violations, 1);
    assert!(state.steps.iter().all(|s| s.status == StepStatus::Done));
}

#[tokio::test]
async fn test_retrieved_memory_seeds_first_plan() {
    let h = harness(config(), &[&["rotate"]], vec![Verdict::TaskComplete]);
    let past = MemoryRecord::episodic(
        "rotate nginx logs with logrotate -f",
        0.9,
        hive::core::RunId::new(),
    );
    h.memory.write(past).await.unwrap();

    let state = run_to_end(&h, "rotate nginx logs").await;
    assert_eq!(state.status, TaskStatus::Done);
    let contexts = h.architect.seen_contexts.lock().unwrap().clone();
    assert!(contexts[0]
        .entries
        .iter()
        .any(|e| e.kind == EntryKind::Retrieved && e.content.contains("logrotate")));
}

#[tokio::test]
async fn test_unknown_run_is_rejected() {
    let h = harness(config(), &[], vec![]);
    let unknown = hive::core::RunId::new();
    assert_eq!(
        h.runtime
            .resume(unknown, ResumeToken::new(), ResumeDecision::Confirm),
        Err(InvalidResumeError::UnknownRun)
    );
    assert_eq!(h.runtime.cancel(unknown), Err(InvalidResumeError::UnknownRun));
}

/// 外部记忆后端：检索返回固定经验，写入按层记录
#[derive(Default)]
struct RecordingStore {
    records: Mutex<Vec<MemoryRecord>>,
    working_writes: AtomicUsize,
}

#[async_trait]
impl MemoryStore for RecordingStore {
    async fn query_similar(&self, _text: &str, k: usize) -> Vec<MemoryRecord> {
        let canned = MemoryRecord::episodic("purge the cdn cache before deploy", 0.8, RunId::new());
        std::iter::once(canned).take(k).collect()
    }

    async fn write(&self, record: MemoryRecord) -> Result<MemoryAck, MemoryError> {
        if record.tier == MemoryTier::Working {
            self.working_writes.fetch_add(1, Ordering::SeqCst);
        }
        let ack = MemoryAck {
            id: record.id,
            tier: record.tier,
        };
        self.records.lock().unwrap().push(record);
        Ok(ack)
    }

    async fn discard_working(&self, run: RunId) -> usize {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| !(r.tier == MemoryTier::Working && r.source_task_id == run));
        before - records.len()
    }
}

#[tokio::test]
async fn test_custom_memory_store_backs_the_run() {
    let store = Arc::new(RecordingStore::default());
    let architect = Arc::new(ScriptedArchitect::new(&[&["build site", "deploy site"]]));
    let roles = Roles {
        architect: architect.clone(),
        executor: Arc::new(ScriptedExecutor),
        verifier: Arc::new(ScriptedVerifier::new(vec![Verdict::Success, Verdict::TaskComplete])),
        extractor: Arc::new(CountingExtractor::default()),
    };
    let runtime = RuntimeBuilder::new(config())
        .with_roles(roles)
        .with_memory(store.clone())
        .build()
        .unwrap();

    let handle = runtime.start("deploy the site", Arc::new(RecordingSink::new()));
    let state = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, TaskStatus::Done);

    let contexts = architect.seen_contexts.lock().unwrap().clone();
    assert!(contexts[0]
        .entries
        .iter()
        .any(|e| e.kind == EntryKind::Retrieved && e.content.contains("cdn cache")));

    assert_eq!(store.working_writes.load(Ordering::SeqCst), 2);
    let records = store.records.lock().unwrap().clone();
    assert!(records.iter().all(|r| r.tier != MemoryTier::Working));
    assert!(records.iter().any(|r| r.tier == MemoryTier::Episodic));
    assert!(records.iter().any(|r| r.tier == MemoryTier::Semantic));
    assert!(records.iter().all(|r| r.source_task_id == state.run_id));
}
