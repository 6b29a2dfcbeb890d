//! The Ralph loop: render → execute → state-update → re-render until fixed
//! point.
//!
//! Each frame renders the element tree with the current state snapshot,
//! restores hash-gated execution records, runs side effects before agents
//! (files, then worktrees), gates on stop and human nodes, dispatches
//! pending agents sequentially or in parallel by subagent grouping, and
//! terminates when a frame leaves no state change, no pending work, and no
//! unapproved human gates.

use futures::future::join_all;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::effects::{create_worktree_node, write_file_node, HumanGate};
use crate::engine::controller::ControllerStatus;
use crate::engine::events::{DebugCollector, DebugEventKind};
use crate::engine::options::{EngineError, ExecuteOptions, PlanPromptInfo, TerminationReason};
use crate::engine::result::{ExecutionResult, FrameResult};
use crate::engine::store::{has_failed_worktree_ancestor, is_executable, ApprovalSet, ExecutionStore};
use crate::exec::{
    build_prompt, execute_agent_node, AgentNodeConfig, AgentOutcome, BuiltPrompt, ExecuteContext,
    ExecutionError, ExecutorDeps,
};
use crate::provider::{ProviderHandle, ProviderRegistry};
use crate::render::{render, Element, RenderScope};
use crate::tools::{
    prepare_tools, PlanNodeRunner, RenderNodeOutcome, ToolDef, ToolServerManager,
};
use crate::tree::{
    content_hash, node_path, resolve_path, serialize, ExecutionState, ExecutionStatus, NodeId,
    NodeKind, Tree,
};

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drive `element` to a fixed point under `options`.
pub async fn execute_plan(
    element: Element,
    options: ExecuteOptions,
) -> Result<ExecutionResult, EngineError> {
    let mut engine = Engine::new(options);
    for server in engine.options.tool_servers.clone() {
        engine.manager.register(server).await;
    }
    let outcome = engine.run(&element).await;
    engine.manager.disconnect_all().await;
    match outcome {
        Ok(()) => Ok(engine.into_result().await),
        Err(err) => {
            error!("run failed: {err}");
            Err(err)
        }
    }
}

struct Engine {
    options: ExecuteOptions,
    mock: bool,
    tree: Tree,
    store: ExecutionStore,
    approvals: ApprovalSet,
    collector: Arc<DebugCollector>,
    manager: Arc<ToolServerManager>,
    providers: ProviderRegistry,
    deps: ExecutorDeps,
    state_changed: Arc<AtomicBool>,
    final_output: Arc<StdMutex<Option<serde_json::Value>>>,
    history: Vec<FrameResult>,
    reported_outputs: HashSet<String>,
    frame: u32,
    run_started: Instant,
}

/// Everything needed to dispatch one agent node without touching the tree.
struct PreparedAgent {
    node: NodeId,
    path: String,
    hash: String,
    label: String,
    config: AgentNodeConfig,
    built: BuiltPrompt,
    tools: Vec<ToolDef>,
    ctx: ExecuteContext,
    provider: Option<Arc<ProviderHandle>>,
}

enum PreDispatch {
    Proceed,
    Skipped,
}

impl Engine {
    fn new(options: ExecuteOptions) -> Self {
        let mock = options.resolve_mock();
        let collector = Arc::new(DebugCollector::new(options.debug.clone()));
        let deps = ExecutorDeps {
            backend: options.backend.clone(),
            api_client: options.api_client.clone(),
            retry: options.retry.clone(),
        };
        Self {
            options,
            mock,
            tree: Tree::new(),
            store: ExecutionStore::new(),
            approvals: ApprovalSet::new(),
            collector,
            manager: Arc::new(ToolServerManager::new()),
            providers: ProviderRegistry::new(),
            deps,
            state_changed: Arc::new(AtomicBool::new(false)),
            final_output: Arc::new(StdMutex::new(None)),
            history: Vec::new(),
            reported_outputs: HashSet::new(),
            frame: 0,
            run_started: Instant::now(),
        }
    }

    fn emit(&self, kind: DebugEventKind, data: serde_json::Value) {
        self.collector.emit(self.frame, kind, data);
    }

    fn terminate(&self, reason: TerminationReason) {
        self.emit(
            DebugEventKind::LoopTerminated,
            serde_json::json!({"reason": reason.label()}),
        );
    }

    async fn run(&mut self, element: &Element) -> Result<(), EngineError> {
        self.run_started = Instant::now();
        loop {
            self.frame += 1;
            if self.frame > self.options.max_frames {
                self.terminate(TerminationReason::MaxFrames);
                return Err(EngineError::MaxFramesReached(self.options.max_frames));
            }
            // 1. Wall-clock bound, checked once per frame.
            if let Some(timeout) = self.options.timeout
                && self.run_started.elapsed() >= timeout
            {
                self.terminate(TerminationReason::Timeout);
                return Err(EngineError::Timeout(timeout));
            }

            let frame_started = Instant::now();
            let version_before = self.options.state.version();
            self.state_changed.store(false, Ordering::SeqCst);
            self.emit(DebugEventKind::FrameStart, serde_json::json!({}));
            if self.options.verbose {
                info!("frame {} start", self.frame);
            }

            // 2. Render with the current state snapshot; the frame number in
            // the scope forces reconciliation of retained components.
            let scope = RenderScope {
                frame: self.frame,
                state: self.options.state.snapshot(),
            };
            render(&mut self.tree, element, &scope);
            let snapshot = self
                .collector
                .capture_tree()
                .then(|| serialize(&self.tree, self.tree.root()));
            self.collector.emit_with_snapshot(
                self.frame,
                DebugEventKind::FrameRender,
                serde_json::json!({}),
                snapshot,
            );
            if let Some(on_frame_update) = &self.options.on_frame_update {
                on_frame_update(&self.tree, self.frame);
            }

            let plan_xml = serialize(&self.tree, self.tree.root());
            if let Some(on_plan) = &self.options.on_plan {
                on_plan(&plan_xml, self.frame);
            }

            self.providers.sync_from_tree(&self.tree).await;
            self.publish_output_values();
            self.sync_controller_view();
            self.frame_checkpoint().await?;

            // 3. Hash-gated restore of prior execution state.
            self.store.restore(&mut self.tree);

            let mut executed: Vec<String> = Vec::new();

            // 4. File nodes run before any agent discovery.
            self.run_file_nodes(&mut executed).await?;

            // 5. A stop node terminates cleanly.
            if let Some(stop) = self.tree.find_first(self.tree.root(), NodeKind::Stop) {
                let reason = self
                    .tree
                    .get(stop)
                    .props
                    .str_prop("reason")
                    .unwrap_or("stop node rendered")
                    .to_string();
                self.emit(DebugEventKind::ControlStop, serde_json::json!({"reason": reason}));
                self.terminate(TerminationReason::StopNode);
                self.finish_frame(plan_xml, executed, frame_started, version_before).await;
                return Ok(());
            }

            // 6. The first unapproved human gate decides the frame.
            if let Some(gate_node) = self.first_unapproved_human() {
                self.handle_human_gate(gate_node).await?;
                self.finish_frame(plan_xml, executed, frame_started, version_before).await;
                continue;
            }

            // 7–9. Discover pending work; worktrees run first, then their
            // failures fail descendants closed before any agent dispatch.
            self.run_worktree_nodes(&mut executed).await;
            let pending_agents = self.discover_pending_agents();

            // 10. Partition by the nearest subagent ancestor.
            let (sequential, parallel) = self.partition(&pending_agents);

            // 11. Sequential pass: the first callback breaks the frame so
            // state lands before the next render.
            let mut callback_break = false;
            for node in sequential {
                match self.pre_dispatch(node).await? {
                    PreDispatch::Skipped => continue,
                    PreDispatch::Proceed => {}
                }
                let Some(prepared) = self.prepare_agent(node).await? else {
                    continue;
                };
                self.mark_running(&prepared);
                let started = Instant::now();
                let result = self.dispatch_agent(&prepared).await;
                let fired = self.apply_agent_result(prepared, result, started, &mut executed)?;
                if fired {
                    self.options.state.flush_pending_updates().await;
                    callback_break = true;
                    break;
                }
            }

            // 12. Parallel pass, only when no sequential callback fired.
            if !callback_break && !parallel.is_empty() {
                let mut prepared_batch: Vec<PreparedAgent> = Vec::new();
                for node in parallel {
                    match self.pre_dispatch(node).await? {
                        PreDispatch::Skipped => continue,
                        PreDispatch::Proceed => {}
                    }
                    if let Some(prepared) = self.prepare_agent(node).await? {
                        self.mark_running(&prepared);
                        prepared_batch.push(prepared);
                    }
                }
                let engine_ref: &Engine = self;
                let results: Vec<(Result<AgentOutcome, ExecutionError>, Instant)> = join_all(
                    prepared_batch.iter().map(|prepared| async move {
                        let started = Instant::now();
                        (engine_ref.dispatch_agent(prepared).await, started)
                    }),
                )
                .await;
                let mut any_fired = false;
                for (prepared, (result, started)) in
                    prepared_batch.into_iter().zip(results.into_iter())
                {
                    any_fired |=
                        self.apply_agent_result(prepared, result, started, &mut executed)?;
                }
                if any_fired {
                    self.options.state.flush_pending_updates().await;
                }
            }

            // 13–14. Close the frame, persist, and test for the fixed point.
            let state_changed =
                self.finish_frame(plan_xml, executed, frame_started, version_before).await;
            if !state_changed && !self.has_pending_work() && self.first_unapproved_human().is_none()
            {
                self.terminate(TerminationReason::NoPendingNodes);
                return Ok(());
            }
        }
    }

    /// Emit `frame:end`, record history, persist the execution store, and
    /// report whether state changed during the frame.
    async fn finish_frame(
        &mut self,
        plan: String,
        executed: Vec<String>,
        frame_started: Instant,
        version_before: u64,
    ) -> bool {
        self.options.state.flush_pending_updates().await;
        let version_after = self.options.state.version();
        let state_changes = version_after.saturating_sub(version_before);
        let state_changed =
            state_changes > 0 || self.state_changed.load(Ordering::SeqCst);
        let duration = frame_started.elapsed();

        self.emit(
            DebugEventKind::FrameEnd,
            serde_json::json!({
                "durationMs": duration.as_millis() as u64,
                "stateChanged": state_changed,
                "executedNodes": executed,
            }),
        );
        if self.options.verbose {
            info!(
                "frame {} end: executed {:?}, state_changed={}",
                self.frame, executed, state_changed
            );
        }

        self.store.persist(&self.tree);
        let frame_result = FrameResult {
            frame: self.frame,
            plan,
            executed_nodes: executed,
            state_changes,
            duration,
        };
        if let Some(on_frame) = &self.options.on_frame {
            on_frame(&frame_result);
        }
        self.history.push(frame_result);
        state_changed
    }

    async fn into_result(self) -> ExecutionResult {
        let output = self.final_output.lock().expect("output lock poisoned").clone();
        ExecutionResult {
            output,
            frames: self.frame,
            total_duration: self.run_started.elapsed(),
            history: self.history,
            mcp_servers: self.manager.connected_servers().await,
            usage: self.providers.total_usage().await,
        }
    }

    // ---- per-frame phases ------------------------------------------------

    async fn run_file_nodes(&mut self, executed: &mut Vec<String>) -> Result<(), EngineError> {
        let pending: Vec<NodeId> = self
            .tree
            .find_all(self.tree.root(), NodeKind::File)
            .into_iter()
            .filter(|&n| self.is_pending(n))
            .collect();
        let mut fired = false;
        for node in pending {
            let hash = content_hash(&self.tree, node);
            let path = node_path(&self.tree, node);
            let label = self.tree.node_label(node);
            self.tree.get_mut(node).execution = Some(ExecutionState::running(hash.clone()));
            self.emit(
                DebugEventKind::NodeExecuteStart,
                serde_json::json!({"nodePath": path, "nodeType": "file"}),
            );
            match write_file_node(&self.tree, node, self.mock).await {
                Ok(outcome) => {
                    let result = serde_json::to_value(&outcome).unwrap_or_default();
                    self.tree.get_mut(node).execution =
                        Some(ExecutionState::complete(hash, result));
                    self.emit(
                        DebugEventKind::NodeExecuteEnd,
                        serde_json::json!({"nodePath": path, "status": "complete"}),
                    );
                    fired |= self.run_wrapped_callback(
                        node,
                        "onWritten",
                        &serde_json::json!(outcome.path),
                    );
                }
                Err(err) => {
                    let message = err.to_string();
                    self.tree.get_mut(node).execution =
                        Some(ExecutionState::failed(hash, message.clone()));
                    self.emit(
                        DebugEventKind::NodeExecuteEnd,
                        serde_json::json!({"nodePath": path, "status": "error", "error": message}),
                    );
                    if self.tree.get(node).props.contains("onError") {
                        fired |= self.run_wrapped_callback(
                            node,
                            "onError",
                            &serde_json::json!({"error": message}),
                        );
                    } else {
                        return Err(EngineError::File { path, source: err });
                    }
                }
            }
            executed.push(label);
        }
        if fired {
            self.options.state.flush_pending_updates().await;
        }
        Ok(())
    }

    async fn run_worktree_nodes(&mut self, executed: &mut Vec<String>) {
        let pending: Vec<NodeId> = self
            .tree
            .find_all(self.tree.root(), NodeKind::Worktree)
            .into_iter()
            .filter(|&n| self.is_pending(n))
            .collect();
        for node in pending {
            let hash = content_hash(&self.tree, node);
            let path = node_path(&self.tree, node);
            self.tree.get_mut(node).execution = Some(ExecutionState::running(hash.clone()));
            self.emit(
                DebugEventKind::NodeExecuteStart,
                serde_json::json!({"nodePath": path, "nodeType": "worktree"}),
            );
            match create_worktree_node(&self.tree, node, self.mock).await {
                Ok(worktree_path) => {
                    self.tree.get_mut(node).execution = Some(ExecutionState::complete(
                        hash,
                        serde_json::json!(worktree_path.display().to_string()),
                    ));
                    self.emit(
                        DebugEventKind::NodeExecuteEnd,
                        serde_json::json!({"nodePath": path, "status": "complete"}),
                    );
                }
                Err(err) => {
                    // Descendants fail closed; the run itself continues.
                    warn!("worktree at {path} failed: {err}");
                    self.tree.get_mut(node).execution =
                        Some(ExecutionState::failed(hash, err.to_string()));
                    self.emit(
                        DebugEventKind::NodeExecuteEnd,
                        serde_json::json!({"nodePath": path, "status": "error", "error": err.to_string()}),
                    );
                }
            }
            executed.push(self.tree.node_label(node));
        }
    }

    /// Pending agent discovery with worktree fail-closed marking.
    fn discover_pending_agents(&mut self) -> Vec<NodeId> {
        let candidates: Vec<NodeId> = self
            .tree
            .walk(self.tree.root())
            .into_iter()
            .filter(|&n| self.tree.get(n).kind.is_agent())
            .collect();
        let mut pending = Vec::new();
        for node in candidates {
            if !self.is_pending(node) {
                continue;
            }
            // Stale state from an edit: clear before re-execution.
            if self.tree.get(node).execution.is_some() {
                self.tree.get_mut(node).execution = None;
            }
            let path = node_path(&self.tree, node);
            if has_failed_worktree_ancestor(&self.tree, node) {
                let hash = content_hash(&self.tree, node);
                let worktree = self
                    .tree
                    .nearest_ancestor(node, NodeKind::Worktree)
                    .map(|w| node_path(&self.tree, w))
                    .unwrap_or_default();
                self.tree.get_mut(node).execution =
                    Some(ExecutionState::blocked_by_worktree(hash, &worktree));
                self.emit(
                    DebugEventKind::NodeExecuteEnd,
                    serde_json::json!({
                        "nodePath": path,
                        "status": "error",
                        "blockedByWorktree": true,
                    }),
                );
                continue;
            }
            self.emit(
                DebugEventKind::NodeFound,
                serde_json::json!({"nodePath": path, "nodeType": self.tree.get(node).kind.tag()}),
            );
            pending.push(node);
        }
        pending
    }

    /// Sequential vs parallel split by the nearest subagent ancestor.
    fn partition(&self, pending: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut sequential = Vec::new();
        let mut parallel = Vec::new();
        for &node in pending {
            let parallel_group = self
                .tree
                .nearest_ancestor(node, NodeKind::Subagent)
                .is_some_and(|subagent| {
                    self.tree
                        .get(subagent)
                        .props
                        .bool_prop("parallel")
                        .unwrap_or(true)
                });
            if parallel_group {
                parallel.push(node);
            } else {
                sequential.push(node);
            }
        }
        (sequential, parallel)
    }

    // ---- gates and control ----------------------------------------------

    fn first_unapproved_human(&self) -> Option<NodeId> {
        self.tree
            .find_all(self.tree.root(), NodeKind::Human)
            .into_iter()
            .find(|&h| {
                let gate = HumanGate::extract(&self.tree, h);
                !self.approvals.contains(&gate.approval_key())
            })
    }

    /// The frame continues after an approval or an `onReject`-absorbed
    /// rejection; an unhandled rejection terminates the run.
    async fn handle_human_gate(&mut self, node: NodeId) -> Result<(), EngineError> {
        let gate = HumanGate::extract(&self.tree, node);
        self.emit(
            DebugEventKind::ControlHuman,
            serde_json::json!({"message": gate.message, "nodePath": gate.node_path}),
        );
        let approved = match &self.options.on_human_prompt {
            Some(prompt) => prompt(gate.message.clone(), gate.body.clone()).await,
            None => true,
        };
        if approved {
            self.approvals.insert(gate.approval_key());
            self.emit(
                DebugEventKind::ControlHuman,
                serde_json::json!({
                    "message": gate.message,
                    "nodePath": gate.node_path,
                    "decision": "approved",
                }),
            );
            if self.run_wrapped_callback(node, "onApprove", &serde_json::json!(true)) {
                self.options.state.flush_pending_updates().await;
            }
            Ok(())
        } else if self.tree.get(node).props.contains("onReject") {
            if self.run_wrapped_callback(node, "onReject", &serde_json::json!(false)) {
                self.options.state.flush_pending_updates().await;
            }
            Ok(())
        } else {
            self.terminate(TerminationReason::HumanRejected);
            Err(EngineError::HumanRejected(gate.node_path))
        }
    }

    async fn frame_checkpoint(&mut self) -> Result<(), EngineError> {
        let Some(controller) = self.options.controller.clone() else {
            return Ok(());
        };
        self.wait_while_paused(&controller).await
    }

    /// Abort immediately, or busy-wait in 100ms sleeps while paused.
    async fn wait_while_paused(
        &self,
        controller: &crate::engine::controller::ExecutionController,
    ) -> Result<(), EngineError> {
        if controller.is_aborted() {
            return self.abort(controller);
        }
        if controller.is_paused() {
            self.emit(DebugEventKind::ControlPause, serde_json::json!({}));
            while controller.is_paused() {
                if controller.is_aborted() {
                    return self.abort(controller);
                }
                tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            }
            self.emit(DebugEventKind::ControlResume, serde_json::json!({}));
        }
        Ok(())
    }

    fn abort(&self, controller: &crate::engine::controller::ExecutionController) -> Result<(), EngineError> {
        let reason = controller
            .abort_reason()
            .unwrap_or_else(|| "aborted".to_string());
        self.emit(DebugEventKind::ControlAbort, serde_json::json!({"reason": reason}));
        self.terminate(TerminationReason::Aborted);
        Err(EngineError::Aborted(reason))
    }

    /// Skip/abort intercept immediately before a node dispatch. Injections
    /// are consumed later, inside `prepare_agent`.
    async fn pre_dispatch(&mut self, node: NodeId) -> Result<PreDispatch, EngineError> {
        let Some(controller) = self.options.controller.clone() else {
            return Ok(PreDispatch::Proceed);
        };
        self.wait_while_paused(&controller).await?;

        let path = node_path(&self.tree, node);
        let applies = match controller.peek_skip() {
            Some(None) => true,
            Some(Some(ref target)) => *target == path,
            None => false,
        };
        if applies {
            controller.next_skip();
            let hash = content_hash(&self.tree, node);
            self.tree.get_mut(node).execution = Some(ExecutionState::complete(
                hash,
                serde_json::json!("skipped"),
            ));
            self.emit(DebugEventKind::ControlSkip, serde_json::json!({"nodePath": path}));
            return Ok(PreDispatch::Skipped);
        }
        Ok(PreDispatch::Proceed)
    }

    // ---- agent dispatch --------------------------------------------------

    async fn prepare_agent(&mut self, node: NodeId) -> Result<Option<PreparedAgent>, EngineError> {
        // Injection applies to this execution only: prepend a TEXT child,
        // build the prompt, then restore the children.
        let injection = self
            .options
            .controller
            .as_ref()
            .and_then(|c| c.next_injection());
        let injected_child = injection.map(|text| {
            let child = self.tree.create_text_instance(text);
            let first = self.tree.get(node).children.first().copied();
            match first {
                Some(before) => self.tree.insert_before(node, child, before),
                None => self.tree.append_child(node, child),
            }
            child
        });

        let mut config = AgentNodeConfig::from_props(&self.tree.get(node).props);
        if config.model.is_none() {
            config.model = self.options.default_model.clone();
        }
        if config.max_tokens.is_none() {
            config.max_tokens = self.options.default_max_tokens;
        }
        let built = build_prompt(&self.tree, node, config.system.as_deref());

        if let Some(child) = injected_child {
            self.tree.remove_child(node, child);
        }

        let path = node_path(&self.tree, node);
        let hash = content_hash(&self.tree, node);
        if let Some(on_plan_with_prompt) = &self.options.on_plan_with_prompt {
            on_plan_with_prompt(&PlanPromptInfo {
                node_path: path.clone(),
                prompt: built.prompt.clone(),
                system: built.system.clone(),
                plan_xml: built.plan_xml.clone(),
            });
        }

        let plan_runner: Option<Arc<dyn PlanNodeRunner>> = built.plan_xml.is_some().then(|| {
            Arc::new(SubplanRunner {
                tree: self.tree.clone(),
                deps: self.deps.clone(),
                mock: self.mock,
            }) as Arc<dyn PlanNodeRunner>
        });
        let tools = prepare_tools(&config.tools, &config.mcp_servers, &self.manager, plan_runner)
            .await
            .map_err(|err| {
                ExecutionError::wrap(&self.tree, node, &built.prompt, err.into())
            })?;

        let ctx = ExecuteContext {
            mock: self.mock,
            cwd: self.worktree_cwd(node),
            on_stream: self.options.on_stream.clone(),
            verbose: self.options.verbose,
        };
        let provider = self.providers.handle_for(&self.tree, node).await;

        Ok(Some(PreparedAgent {
            node,
            label: self.tree.node_label(node),
            path,
            hash,
            config,
            built,
            tools,
            ctx,
            provider,
        }))
    }

    /// Working directory inherited from the nearest completed worktree
    /// ancestor.
    fn worktree_cwd(&self, node: NodeId) -> Option<PathBuf> {
        let worktree = self.tree.nearest_ancestor(node, NodeKind::Worktree)?;
        let execution = self.tree.get(worktree).execution.as_ref()?;
        if execution.status != ExecutionStatus::Complete {
            return None;
        }
        execution
            .result
            .as_ref()
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }

    fn mark_running(&mut self, prepared: &PreparedAgent) {
        self.tree.get_mut(prepared.node).execution =
            Some(ExecutionState::running(prepared.hash.clone()));
        self.emit(
            DebugEventKind::NodeExecuteStart,
            serde_json::json!({
                "nodePath": prepared.path,
                "nodeType": self.tree.get(prepared.node).kind.tag(),
            }),
        );
    }

    async fn dispatch_agent(
        &self,
        prepared: &PreparedAgent,
    ) -> Result<AgentOutcome, ExecutionError> {
        if let Some(provider) = &prepared.provider {
            let estimate = (prepared.built.user_message().len() as u64).div_ceil(4);
            provider.acquire(estimate).await.map_err(|err| {
                ExecutionError::wrap(
                    &self.tree,
                    prepared.node,
                    &prepared.built.prompt,
                    crate::exec::AgentError::Other(err.to_string()),
                )
            })?;
        }
        let outcome = execute_agent_node(
            &self.deps,
            &self.tree,
            prepared.node,
            &prepared.config,
            &prepared.built,
            &prepared.tools,
            &prepared.ctx,
        )
        .await?;
        if let (Some(provider), Some(usage)) = (&prepared.provider, outcome.usage) {
            provider.record(&outcome.model, usage).await;
        }
        Ok(outcome)
    }

    /// Record the result, emit events, run wrapped callbacks. Returns
    /// whether a callback fired.
    fn apply_agent_result(
        &mut self,
        prepared: PreparedAgent,
        result: Result<AgentOutcome, ExecutionError>,
        started: Instant,
        executed: &mut Vec<String>,
    ) -> Result<bool, EngineError> {
        let duration_ms = started.elapsed().as_millis() as u64;
        executed.push(prepared.label);
        match result {
            Ok(outcome) => {
                let output_json = outcome.output.as_json();
                self.tree.get_mut(prepared.node).execution = Some(ExecutionState::complete(
                    prepared.hash,
                    output_json.clone(),
                ));
                self.emit(
                    DebugEventKind::NodeExecuteEnd,
                    serde_json::json!({
                        "nodePath": prepared.path,
                        "status": "complete",
                        "durationMs": duration_ms,
                        "result": output_json,
                    }),
                );
                *self.final_output.lock().expect("output lock poisoned") =
                    Some(output_json.clone());
                Ok(self.run_wrapped_callback(prepared.node, "onFinished", &output_json))
            }
            Err(err) => {
                let message = err.to_string();
                self.tree.get_mut(prepared.node).execution =
                    Some(ExecutionState::failed(prepared.hash, message.clone()));
                self.emit(
                    DebugEventKind::NodeExecuteEnd,
                    serde_json::json!({
                        "nodePath": prepared.path,
                        "status": "error",
                        "durationMs": duration_ms,
                        "error": message,
                    }),
                );
                if self.tree.get(prepared.node).props.contains("onError") {
                    *self.final_output.lock().expect("output lock poisoned") =
                        Some(serde_json::json!(message));
                    Ok(self.run_wrapped_callback(
                        prepared.node,
                        "onError",
                        &serde_json::json!({"error": message}),
                    ))
                } else {
                    // No handler: the node's error is fatal for the run.
                    Err(EngineError::Execution(err))
                }
            }
        }
    }

    /// Invoke a node callback wrapped with state-change bookkeeping: mark
    /// the frame dirty, emit `callback:invoked` and `state:change`, then run
    /// the user closure (whose writes queue into the state store batch).
    fn run_wrapped_callback(
        &self,
        node: NodeId,
        name: &str,
        payload: &serde_json::Value,
    ) -> bool {
        let Some(callback) = self.tree.get(node).props.callback(name) else {
            return false;
        };
        self.state_changed.store(true, Ordering::SeqCst);
        let path = node_path(&self.tree, node);
        self.emit(
            DebugEventKind::CallbackInvoked,
            serde_json::json!({"nodePath": path, "callback": name}),
        );
        self.emit(
            DebugEventKind::StateChange,
            serde_json::json!({"source": "callback"}),
        );
        callback(payload);
        true
    }

    // ---- bookkeeping -----------------------------------------------------

    fn is_pending(&self, node: NodeId) -> bool {
        match &self.tree.get(node).execution {
            None => true,
            Some(execution) => {
                execution.status == ExecutionStatus::Pending
                    || execution.content_hash.as_deref()
                        != Some(content_hash(&self.tree, node).as_str())
            }
        }
    }

    fn has_pending_work(&self) -> bool {
        self.tree
            .walk(self.tree.root())
            .into_iter()
            .filter(|&n| is_executable(self.tree.get(n).kind))
            .any(|n| self.is_pending(n) && !has_failed_worktree_ancestor(&self.tree, n))
    }

    fn publish_output_values(&mut self) {
        let Some(on_value_set) = self.options.on_value_set.clone() else {
            return;
        };
        for output in self.tree.find_all(self.tree.root(), NodeKind::Output) {
            let key = format!(
                "{}:{}",
                node_path(&self.tree, output),
                content_hash(&self.tree, output)
            );
            if self.reported_outputs.contains(&key) {
                continue;
            }
            let name = self
                .tree
                .get(output)
                .props
                .str_prop("name")
                .unwrap_or("output")
                .to_string();
            let value = match self.tree.get(output).props.get("value") {
                Some(value) => value.to_json(),
                None => serde_json::json!(self.tree.subtree_text(output)),
            };
            debug!("workflow output '{}' set", name);
            on_value_set(&name, &value);
            self.reported_outputs.insert(key);
        }
    }

    fn sync_controller_view(&self) {
        let Some(controller) = &self.options.controller else {
            return;
        };
        let mut pending_nodes = Vec::new();
        let mut running_nodes = Vec::new();
        let mut completed = 0usize;
        for node in self.tree.walk(self.tree.root()) {
            if !is_executable(self.tree.get(node).kind) {
                continue;
            }
            match self.tree.get(node).execution.as_ref().map(|e| e.status) {
                None | Some(ExecutionStatus::Pending) => {
                    pending_nodes.push(node_path(&self.tree, node));
                }
                Some(ExecutionStatus::Running) => {
                    running_nodes.push(node_path(&self.tree, node));
                }
                Some(ExecutionStatus::Complete) => completed += 1,
                Some(ExecutionStatus::Error) => {}
            }
        }
        controller.set_status(ControllerStatus {
            frame: self.frame,
            elapsed_ms: self.run_started.elapsed().as_millis() as u64,
            paused: controller.is_paused(),
            pending: pending_nodes.len(),
            running: running_nodes.len(),
            completed,
            running_nodes,
            pending_nodes,
        });
        controller.set_tree(self.tree.clone());
    }
}

/// Executes plan subtrees on behalf of a plan-aware agent calling
/// `render_node`. Operates on a snapshot of the frame's tree; results flow
/// back to the agent, not into the execution store.
struct SubplanRunner {
    tree: Tree,
    deps: ExecutorDeps,
    mock: bool,
}

#[async_trait::async_trait]
impl PlanNodeRunner for SubplanRunner {
    async fn execute_path(&self, node_path: &str) -> RenderNodeOutcome {
        let Some(node) = resolve_path(&self.tree, self.tree.root(), node_path) else {
            return RenderNodeOutcome {
                success: false,
                result: None,
                error: Some(format!("no plan node at path {node_path}")),
                node_type: String::new(),
                node_path: node_path.to_string(),
            };
        };
        let node_type = self.tree.get(node).kind.tag().to_string();
        match self.execute_node(node).await {
            Ok(result) => RenderNodeOutcome {
                success: true,
                result: Some(result),
                error: None,
                node_type,
                node_path: node_path.to_string(),
            },
            Err(error) => RenderNodeOutcome {
                success: false,
                result: None,
                error: Some(error),
                node_type,
                node_path: node_path.to_string(),
            },
        }
    }
}

impl SubplanRunner {
    fn execute_node<'a>(
        &'a self,
        node: NodeId,
    ) -> futures::future::BoxFuture<'a, Result<serde_json::Value, String>> {
        Box::pin(async move {
            match self.tree.get(node).kind {
                NodeKind::Text => Ok(serde_json::json!(
                    self.tree.get(node).text_value().unwrap_or_default()
                )),
                NodeKind::File => write_file_node(&self.tree, node, self.mock)
                    .await
                    .map(|outcome| serde_json::to_value(outcome).unwrap_or_default())
                    .map_err(|e| e.to_string()),
                kind if kind.is_agent() => {
                    let config = AgentNodeConfig::from_props(&self.tree.get(node).props);
                    let built = build_prompt(&self.tree, node, config.system.as_deref());
                    let ctx = ExecuteContext {
                        mock: self.mock,
                        ..Default::default()
                    };
                    // Inline tools only; nested plans do not re-enter the
                    // render_node tool.
                    execute_agent_node(
                        &self.deps,
                        &self.tree,
                        node,
                        &config,
                        &built,
                        &config.tools,
                        &ctx,
                    )
                    .await
                    .map(|outcome| outcome.output.as_json())
                    .map_err(|e| e.to_string())
                }
                NodeKind::Task | NodeKind::Phase | NodeKind::Step | NodeKind::Subagent => {
                    let mut results = Vec::new();
                    for &child in &self.tree.get(node).children {
                        if self.tree.get(child).kind == NodeKind::Text {
                            continue;
                        }
                        results.push(self.execute_node(child).await?);
                    }
                    if results.is_empty() {
                        Ok(serde_json::json!(self.tree.subtree_text(node)))
                    } else {
                        Ok(serde_json::Value::Array(results))
                    }
                }
                other => Err(format!(
                    "'{}' nodes cannot be executed via render_node",
                    other.tag()
                )),
            }
        })
    }
}
