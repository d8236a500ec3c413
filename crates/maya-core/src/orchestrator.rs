//! Turn Orchestrator: one chat turn from request to persisted reply.
//!
//! ```text
//! Start → ContextBuilt → FirstInferred → [ToolsPending → ToolsResolved] → FinalInferred → Persisted → Done
//! ```
//!
//! Any failure after `ContextBuilt` ends in `Failed` with nothing written to history. The
//! user/assistant pair is persisted in a single transaction only once the final reply exists.

use crate::config::{MayaConfig, IDENTITY_KEY};
use crate::context::ContextAssembler;
use crate::error::{TurnError, TurnStage};
use crate::image::decode_image;
use crate::inference::{InferenceClient, OpenAiCompatClient};
use crate::knowledge_probe::{ProcessProbe, Probe};
use crate::store::{run_blocking, ConversationStore};
use crate::tools::{ToolDispatcher, ToolRegistry, WebSearchTool};
use crate::types::{AssistantMessage, ChatRequest, ChatResponse, Message, StepIcon, StepTrace, ToolCall};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Start,
    ContextBuilt,
    FirstInferred,
    ToolsPending,
    ToolsResolved,
    FinalInferred,
    Persisted,
    Done,
}

impl TurnState {
    fn as_str(&self) -> &'static str {
        match self {
            TurnState::Start => "start",
            TurnState::ContextBuilt => "context_built",
            TurnState::FirstInferred => "first_inferred",
            TurnState::ToolsPending => "tools_pending",
            TurnState::ToolsResolved => "tools_resolved",
            TurnState::FinalInferred => "final_inferred",
            TurnState::Persisted => "persisted",
            TurnState::Done => "done",
        }
    }
}

/// Wires probe, store, context, model bindings and tools into the per-turn pipeline.
///
/// Holds no per-turn state; concurrent turns share it freely.
pub struct TurnOrchestrator {
    probe: Arc<dyn Probe>,
    store: Arc<dyn ConversationStore>,
    assembler: ContextAssembler,
    text_model: Arc<dyn InferenceClient>,
    vision_model: Arc<dyn InferenceClient>,
    dispatcher: ToolDispatcher,
    inference_timeout: Duration,
}

impl TurnOrchestrator {
    pub fn new(
        probe: Arc<dyn Probe>,
        store: Arc<dyn ConversationStore>,
        assembler: ContextAssembler,
        text_model: Arc<dyn InferenceClient>,
        vision_model: Arc<dyn InferenceClient>,
        dispatcher: ToolDispatcher,
    ) -> Self {
        Self {
            probe,
            store,
            assembler,
            text_model,
            vision_model,
            dispatcher,
            inference_timeout: Duration::from_secs(120),
        }
    }

    /// Production wiring: process probe, web search tool, OpenAI-compatible text and vision bindings.
    pub fn from_config(cfg: &MayaConfig, store: Arc<dyn ConversationStore>) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(WebSearchTool::from_config(&cfg.search)));
        let registry = Arc::new(registry);

        let text_model =
            OpenAiCompatClient::text_from_config(&cfg.llm).with_tools(registry.specs());
        let vision_model = OpenAiCompatClient::vision_from_config(&cfg.llm);
        let dispatcher =
            ToolDispatcher::new(Arc::clone(&registry), Duration::from_secs(cfg.search.timeout_secs));
        let default_identity = cfg
            .profile_defaults
            .get(IDENTITY_KEY)
            .cloned()
            .unwrap_or_else(|| "User".to_string());

        tracing::info!(
            target: "maya::turn",
            text_model = %cfg.llm.text_model,
            vision_model = %cfg.llm.vision_model,
            tools = registry.len(),
            probe = %cfg.probe.executable,
            "Turn orchestrator configured"
        );

        Self::new(
            Arc::new(ProcessProbe::from_config(&cfg.probe)),
            store,
            ContextAssembler::new(cfg.assistant_name.clone(), default_identity),
            Arc::new(text_model),
            Arc::new(vision_model),
            dispatcher,
        )
        .with_inference_timeout(cfg.llm.timeout())
    }

    /// Deadline applied to each inference call and to the tool round.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn handle(&self, req: ChatRequest) -> Result<ChatResponse, TurnError> {
        self.handle_within(req, self.inference_timeout).await
    }

    /// Runs one turn with a caller-supplied deadline applied to each inference call and to the
    /// tool round.
    pub async fn handle_within(
        &self,
        req: ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, TurnError> {
        let turn_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let outcome = self.run(turn_id, req, timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(resp) => tracing::info!(
                target: "maya::turn",
                %turn_id,
                elapsed_ms,
                steps = resp.steps.len(),
                "Turn completed"
            ),
            Err(e) => tracing::warn!(
                target: "maya::turn",
                %turn_id,
                elapsed_ms,
                state = "failed",
                status = e.status(),
                error = %e,
                "Turn failed; nothing persisted"
            ),
        }
        outcome
    }

    async fn run(
        &self,
        turn_id: uuid::Uuid,
        req: ChatRequest,
        timeout: Duration,
    ) -> Result<ChatResponse, TurnError> {
        let transition = |state: TurnState| {
            tracing::debug!(target: "maya::turn", %turn_id, state = state.as_str(), "Turn state");
        };
        transition(TurnState::Start);

        let message = req.message.trim().to_string();
        if message.is_empty() {
            return Err(TurnError::InvalidRequest("message must not be empty".into()));
        }
        let image = match req.image.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(decode_image(raw).map_err(TurnError::InvalidRequest)?),
            None => None,
        };

        let mut steps = StepTrace::new();

        // Probe and profile read are independent.
        steps.push("Consulting local knowledge", StepIcon::Database);
        let (knowledge, profile) = tokio::join!(
            self.probe.probe(&message),
            run_blocking(&self.store, |s| s.profile()),
        );
        let profile = profile.map_err(|source| TurnError::Store {
            stage: TurnStage::Context,
            source,
        })?;
        let context = self
            .assembler
            .build_now(&profile, &knowledge, &message, image.as_ref());
        transition(TurnState::ContextBuilt);

        let (model, allow_tools) = match image {
            Some(_) => {
                steps.push("Analyzing image", StepIcon::Eye);
                (&self.vision_model, false)
            }
            None => {
                steps.push("Thinking", StepIcon::Brain);
                (&self.text_model, true)
            }
        };
        tracing::debug!(
            target: "maya::turn",
            %turn_id,
            model = model.model(),
            mood = %knowledge.mood,
            has_local_fact = !knowledge.is_fallback(),
            "Invoking model"
        );

        let mut messages = context.messages;
        let first = self
            .infer(model.as_ref(), &messages, allow_tools, TurnStage::FirstInference, timeout)
            .await?;
        transition(TurnState::FirstInferred);

        let final_message = if first.has_tool_calls() {
            transition(TurnState::ToolsPending);
            let calls = first.tool_calls.clone();
            for call in &calls {
                steps.push(tool_step_status(call), StepIcon::Globe);
            }
            messages.push(Message::Assistant(first));
            let results = tokio::time::timeout(timeout, self.dispatcher.dispatch(&calls))
                .await
                .map_err(|_| {
                    tracing::error!(target: "maya::tools", %turn_id, calls = calls.len(), "Tool round exceeded the turn deadline");
                    TurnError::Timeout {
                        stage: TurnStage::Tools,
                        secs: timeout.as_secs(),
                    }
                })?;
            messages.extend(results);
            transition(TurnState::ToolsResolved);

            steps.push("Synthesizing results", StepIcon::Sparkles);
            let second = self
                .infer(model.as_ref(), &messages, false, TurnStage::FinalInference, timeout)
                .await?;
            if second.has_tool_calls() {
                tracing::warn!(
                    target: "maya::turn",
                    %turn_id,
                    ignored = second.tool_calls.len(),
                    "Model requested tools during synthesis; ignoring"
                );
            }
            second
        } else {
            first
        };
        transition(TurnState::FinalInferred);

        steps.push("Saving to memory", StepIcon::Save);
        let reply = final_message.content;
        let (user_text, assistant_text) = (message, reply.clone());
        run_blocking(&self.store, move |s| s.append_exchange(&user_text, &assistant_text))
            .await
            .map_err(|source| TurnError::Store {
                stage: TurnStage::Persist,
                source,
            })?;
        transition(TurnState::Persisted);

        steps.push("Done", StepIcon::Check);
        transition(TurnState::Done);
        Ok(ChatResponse {
            reply,
            steps: steps.into_steps(),
        })
    }

    async fn infer(
        &self,
        model: &dyn InferenceClient,
        messages: &[Message],
        allow_tools: bool,
        stage: TurnStage,
        timeout: Duration,
    ) -> Result<AssistantMessage, TurnError> {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, model.infer(messages, allow_tools)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(msg)) => {
                tracing::debug!(
                    target: "maya::llm",
                    model = model.model(),
                    %stage,
                    elapsed_ms,
                    tool_calls = msg.tool_calls.len(),
                    "Inference returned"
                );
                Ok(msg)
            }
            Ok(Err(source)) => {
                tracing::error!(target: "maya::llm", model = model.model(), %stage, error = %source, "Inference failed");
                Err(TurnError::Inference { stage, source })
            }
            Err(_) => {
                tracing::error!(target: "maya::llm", model = model.model(), %stage, elapsed_ms, "Inference timed out");
                Err(TurnError::Timeout {
                    stage,
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}

fn tool_step_status(call: &ToolCall) -> String {
    match (call.name.as_str(), call.str_arg("query")) {
        ("search", Some(query)) => format!("Searching the web for \"{}\"", query),
        (name, _) => format!("Running tool '{}'", name),
    }
}
