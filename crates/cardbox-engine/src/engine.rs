//! The [`ContextEngine`] — strategy orchestration and request projection.
//!
//! One engine instance carries a trace, a tenant, a history level, and the
//! capabilities everything else needs (card store, file adapter, history
//! loggers). [`ContextEngine::transform`] runs strategies strictly in the
//! given order and never halts on per-card errors;
//! [`ContextEngine::to_api`] projects a box into a model request;
//! [`ContextEngine::call_model`] runs the request against a completion
//! backend and persists the response as fresh cards.

use std::sync::Arc;

use cardbox_core::{Card, CardBox, Content, TextContent, ToolCall, UriPolicy};
use cardbox_files::FileAdapter;
use cardbox_llm::{
    ApiRequest, BackendKind, Completion, CompletionBackend, CompletionOutput, CompletionRequest,
};
use cardbox_store::{
    ApiHistory, ApiLogLevel, CardBoxHistory, CardHistory, CardStore, SideTaskOp, StorageAdapter,
};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::modifier::RequestModifier;
use crate::projection::{BackendMode, SegmentCollector, project_card};
use crate::strategy::StrategyStep;

/// How much transformation history the engine records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryLevel {
    /// Card-level operation logs plus full box snapshots and API calls.
    #[default]
    Full,
    /// Card-level operation logs only.
    CardOnly,
    /// No history recording.
    Off,
}

impl HistoryLevel {
    fn logs_cards(self) -> bool {
        matches!(self, HistoryLevel::Full | HistoryLevel::CardOnly)
    }

    fn logs_boxes(self) -> bool {
        matches!(self, HistoryLevel::Full)
    }
}

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Trace identifier every history row is recorded under.
    pub trace_id: String,
    /// Tenant every storage operation is scoped to.
    pub tenant_id: String,
    /// How much history to record.
    pub history_level: HistoryLevel,
    /// Which request shape [`ContextEngine::to_api`] populates.
    pub backend_mode: BackendMode,
    /// Content-validation policy threaded into the card store.
    pub uri_policy: UriPolicy,
}

impl EngineConfig {
    /// A config with default history level, backend mode, and policy.
    pub fn new(trace_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            tenant_id: tenant_id.into(),
            history_level: HistoryLevel::default(),
            backend_mode: BackendMode::default(),
            uri_policy: UriPolicy::default(),
        }
    }

    /// Pure override merge: set fields replace, unset fields keep the base.
    pub fn overridden(self, overrides: EngineOverrides) -> Self {
        Self {
            history_level: overrides.history_level.unwrap_or(self.history_level),
            backend_mode: overrides.backend_mode.unwrap_or(self.backend_mode),
            uri_policy: overrides.uri_policy.unwrap_or(self.uri_policy),
            ..self
        }
    }
}

/// Optional overrides merged over a base [`EngineConfig`].
#[derive(Clone, Debug, Default)]
pub struct EngineOverrides {
    /// Replacement history level.
    pub history_level: Option<HistoryLevel>,
    /// Replacement backend mode.
    pub backend_mode: Option<BackendMode>,
    /// Replacement URI policy.
    pub uri_policy: Option<UriPolicy>,
}

/// Orchestrates strategy pipelines and projects boxes into model requests.
pub struct ContextEngine {
    config: EngineConfig,
    storage: Arc<dyn StorageAdapter>,
    card_store: CardStore,
    files: Arc<dyn FileAdapter>,
    card_history: CardHistory,
    api_history: ApiHistory,
    box_history: Option<CardBoxHistory>,
}

impl ContextEngine {
    /// Create an engine over a storage adapter and a file adapter.
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn StorageAdapter>,
        files: Arc<dyn FileAdapter>,
    ) -> Self {
        let card_store = CardStore::with_policy(
            Arc::clone(&storage),
            config.tenant_id.clone(),
            config.uri_policy.clone(),
        );
        let card_history = CardHistory::new(
            Arc::clone(&storage),
            config.tenant_id.clone(),
            config.trace_id.clone(),
        );
        let api_history = ApiHistory::new(
            Arc::clone(&storage),
            config.tenant_id.clone(),
            config.trace_id.clone(),
        );
        let box_history = config.history_level.logs_boxes().then(|| {
            CardBoxHistory::new(
                Arc::clone(&storage),
                config.tenant_id.clone(),
                config.trace_id.clone(),
            )
        });
        Self {
            config,
            storage,
            card_store,
            files,
            card_history,
            api_history,
            box_history,
        }
    }

    /// The engine's construction parameters.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The tenant-scoped card store the engine writes through.
    pub fn card_store(&self) -> &CardStore {
        &self.card_store
    }

    /// Run a sequence of strategies over a box, strictly in order.
    ///
    /// After each step the result box's parents are auto-filled (single
    /// hop) from the pre-step box when the strategy left them unset,
    /// superseded indexable sources get a `delete` side-task, and history
    /// is recorded per the engine's level. Per-card strategy errors are
    /// logged and the pipeline continues with the strategy's returned box.
    #[instrument(skip_all, fields(trace = %self.config.trace_id, steps = steps.len()))]
    pub async fn transform(
        &self,
        cardbox: CardBox,
        steps: &[StrategyStep],
    ) -> Result<CardBox, EngineError> {
        let mut current = cardbox;
        for (strategy, input) in steps {
            let snapshot = self.config.history_level.logs_boxes().then(|| current.clone());

            let result = strategy
                .apply(&current, &self.card_store, input.as_ref(), self.files.as_ref())
                .await?;
            let mut new_box = result.new_box;

            if new_box.parent_ids().is_none() {
                new_box.set_parent_ids(Some(current.effective_parents()));
            }

            if !result.errors.is_empty() {
                let summary = result
                    .errors
                    .iter()
                    .map(|e| format!("card '{}': {}", e.source_card_id, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(
                    strategy = strategy.name(),
                    errors = result.errors.len(),
                    %summary,
                    "strategy reported per-card errors"
                );
            }

            // Superseded indexable sources get a delete side-task; the
            // fresh index task is the derived cards' responsibility via
            // CardStore::add.
            for source_id in result.relationship_map.keys() {
                let Some(source) = self.card_store.get(source_id).await? else {
                    continue;
                };
                if source.meta_truthy("indexable") {
                    self.storage
                        .add_side_task(source_id, &self.config.tenant_id, SideTaskOp::Delete)
                        .await?;
                }
            }

            if self.config.history_level.logs_cards() {
                self.card_history
                    .log_operation(&result.relationship_map, strategy.name())
                    .await?;
            }
            if let (Some(box_history), Some(snapshot)) = (&self.box_history, snapshot) {
                box_history
                    .log_box_transformation(
                        strategy.name(),
                        input.as_ref().map(Value::to_string),
                        &snapshot,
                        &new_box,
                    )
                    .await?;
            }

            debug!(strategy = strategy.name(), cards = new_box.len(), "strategy applied");
            current = new_box;
        }
        Ok(current)
    }

    /// Project a box into a model request and the card ids it was built
    /// from.
    ///
    /// The segment-grouped `interaction_input` is populated only for the
    /// interactions backend mode with cross-request state reuse disabled.
    /// A supplied modifier runs after projection, before return.
    #[instrument(skip_all, fields(trace = %self.config.trace_id, cards = cardbox.len()))]
    pub async fn to_api(
        &self,
        cardbox: &CardBox,
        modifier: Option<&dyn RequestModifier>,
    ) -> Result<(ApiRequest, Vec<String>), EngineError> {
        let mut request = ApiRequest::default();
        let mut collector = SegmentCollector::new(self.config.backend_mode.collects_segments());
        let mut source_card_ids = Vec::with_capacity(cardbox.len());

        for card_id in cardbox.card_ids() {
            source_card_ids.push(card_id.clone());
            let Some(card) = self.card_store.get(card_id).await? else {
                continue;
            };
            let projection = project_card(&card, &collector);
            request.tools.extend(projection.tools);
            for (call_id, name) in projection.call_names {
                collector.record_call_name(call_id, name);
            }
            if let Some(message) = projection.message {
                request.messages.push(message);
            }
            if let Some(segment) = projection.segment {
                collector.register(segment);
            }
        }
        request.interaction_input = collector.finish();

        if let Some(modifier) = modifier {
            request = modifier.modify(request).await?;
        }
        Ok((request, source_card_ids))
    }

    /// Project a box, run it against a completion backend, and persist the
    /// response as fresh cards.
    ///
    /// Returns a new transient box containing exactly the created cards —
    /// never merged with the input box. A response with zero usable
    /// outputs returns an empty box rather than failing.
    #[instrument(skip_all, fields(trace = %self.config.trace_id, model = %model))]
    pub async fn call_model(
        &self,
        cardbox: &CardBox,
        backend: &dyn CompletionBackend,
        model: &str,
        options: Map<String, Value>,
    ) -> Result<CardBox, EngineError> {
        let (request, _source_card_ids) = self.to_api(cardbox, None).await?;

        let is_interactions = backend.backend_kind() == BackendKind::Interactions;
        let completion = backend
            .get_completion(CompletionRequest {
                model: model.to_string(),
                messages: request.messages.clone(),
                tools: request.tools.clone(),
                interaction_input: if is_interactions {
                    request.interaction_input.clone()
                } else {
                    None
                },
                response_schema: None,
                extra: options,
            })
            .await?;

        if self.config.history_level.logs_boxes() {
            let request_value = serde_json::to_value(&request)?;
            let _ = self
                .api_history
                .log_api_call(
                    "llm",
                    model,
                    Some(&request_value),
                    Some(serde_json::to_string(&completion)?),
                    ApiLogLevel::Full,
                )
                .await?;
        }

        let mut cards: Vec<Card> = Vec::new();
        if is_interactions && !completion.outputs.is_empty() {
            cards = self.cards_from_outputs(&completion)?;
        }
        if cards.is_empty() {
            cards = self.cards_from_choices(&completion)?;
        }

        let mut new_box = CardBox::new();
        for card in &cards {
            self.card_store.add(card).await?;
            new_box.add(card.card_id());
        }
        debug!(cards = new_box.len(), "model response persisted");
        Ok(new_box)
    }

    /// One card per typed output entry: tool-call cards for function calls,
    /// text cards for non-empty text segments, all tagged with interaction
    /// identifiers and segment positions.
    fn cards_from_outputs(&self, completion: &Completion) -> Result<Vec<Card>, EngineError> {
        let group_id = completion
            .interaction_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let mut cards = Vec::with_capacity(completion.outputs.len());
        let mut segment_index: i64 = 0;

        for output in &completion.outputs {
            match output {
                CompletionOutput::FunctionCall { name, arguments, id } => {
                    // Structured arguments go into the segment as-is but
                    // into the tool call JSON-encoded.
                    let (segment_arguments, call_arguments) = match arguments {
                        Value::Object(_) | Value::Array(_) => {
                            (arguments.clone(), Value::String(arguments.to_string()))
                        }
                        other => (other.clone(), other.clone()),
                    };
                    let call_id = id
                        .clone()
                        .unwrap_or_else(|| format!("{name}_{segment_index}"));
                    let segment = json!({
                        "type": "function_call",
                        "name": name,
                        "id": call_id,
                        "arguments": segment_arguments,
                    });

                    let mut metadata = response_metadata(completion, "tool_call");
                    let _ = metadata.insert("interaction_segment".to_string(), segment);
                    let _ = metadata
                        .insert("interaction_segment_index".to_string(), json!(segment_index));
                    let _ = metadata.insert("interaction_group_id".to_string(), json!(group_id));
                    let _ = metadata.insert("interaction_role".to_string(), json!("model"));

                    let card = Card::with_policy(
                        Content::Text(TextContent { text: String::new() }),
                        &self.config.uri_policy,
                    )?
                    .with_tool_calls(vec![ToolCall::function(call_id, name.clone(), call_arguments)])
                    .with_metadata(metadata);
                    cards.push(card);
                    segment_index += 1;
                }
                CompletionOutput::Text { text } if !text.is_empty() => {
                    let mut metadata = response_metadata(completion, "model_text");
                    let _ = metadata.insert(
                        "interaction_segment".to_string(),
                        json!({"type": "text", "text": text}),
                    );
                    let _ = metadata
                        .insert("interaction_segment_index".to_string(), json!(segment_index));
                    let _ = metadata.insert("interaction_group_id".to_string(), json!(group_id));
                    let _ = metadata.insert("interaction_role".to_string(), json!("model"));

                    let card = Card::with_policy(
                        Content::Text(TextContent { text: text.clone() }),
                        &self.config.uri_policy,
                    )?
                    .with_metadata(metadata);
                    cards.push(card);
                    segment_index += 1;
                }
                CompletionOutput::Text { .. } => {}
            }
        }
        Ok(cards)
    }

    /// Cards from the `choices[0].message` shape: one tool-call card when
    /// the message requests calls, one text card when it carries text.
    fn cards_from_choices(&self, completion: &Completion) -> Result<Vec<Card>, EngineError> {
        let Some(message) = completion.message() else {
            return Ok(Vec::new());
        };
        let mut cards = Vec::new();

        if let Some(calls) = message.tool_calls.as_ref().filter(|calls| !calls.is_empty()) {
            let card = Card::with_policy(
                Content::Text(TextContent { text: String::new() }),
                &self.config.uri_policy,
            )?
            .with_tool_calls(calls.clone())
            .with_metadata(response_metadata(completion, "tool_call"));
            cards.push(card);
        }

        let text_payload: Option<String> = match &message.content {
            Some(Value::String(text)) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Some(Value::Array(parts)) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .filter(|text| !text.is_empty())
                    .collect();
                let joined = texts.join("\n");
                let trimmed = joined.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            _ => None,
        };
        if let Some(text) = text_payload {
            let card = Card::with_policy(
                Content::Text(TextContent { text }),
                &self.config.uri_policy,
            )?
            .with_metadata(response_metadata(completion, "model_text"));
            cards.push(card);
        }
        Ok(cards)
    }
}

/// Base metadata for cards created from a completion response. Absent
/// response identifiers are simply not recorded.
fn response_metadata(completion: &Completion, stage: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    if let Some(interaction_id) = &completion.interaction_id {
        let _ = metadata.insert("interaction_id".to_string(), json!(interaction_id));
    }
    if let Some(status) = &completion.status {
        let _ = metadata.insert("interaction_status".to_string(), json!(status));
    }
    let _ = metadata.insert("role".to_string(), json!("assistant"));
    let _ = metadata.insert("stage".to_string(), json!(stage));
    metadata
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::strategy::{Strategy, TransformationResult};
    use async_trait::async_trait;
    use cardbox_core::CardUpdate;
    use cardbox_llm::{CompletionChoice, CompletionMessage, LlmError};
    use cardbox_store::{CardQuery, MemoryStorageAdapter};
    use cardbox_files::InMemoryFileAdapter;
    use tokio::sync::Mutex;

    /// Replaces every text card with an uppercased derived card; missing
    /// cards fail open.
    struct UppercaseStrategy;

    #[async_trait]
    impl Strategy for UppercaseStrategy {
        fn name(&self) -> &'static str {
            "UppercaseStrategy"
        }

        async fn apply(
            &self,
            cardbox: &CardBox,
            card_store: &CardStore,
            _input: Option<&Value>,
            _files: &dyn FileAdapter,
        ) -> Result<TransformationResult, EngineError> {
            let mut result = TransformationResult::default();
            for card_id in cardbox.card_ids() {
                let Some(card) = card_store.get(card_id).await? else {
                    result.fail_open(card_id, "card not found");
                    continue;
                };
                let derived = card.update(CardUpdate::content(Content::Text(TextContent {
                    text: card.text().to_uppercase(),
                })))?;
                card_store.add(&derived).await?;
                result.new_box.add(derived.card_id());
                result.map_to(card_id, vec![derived.card_id().to_string()]);
            }
            Ok(result)
        }
    }

    struct FixedBackend {
        kind: BackendKind,
        completion: Completion,
        seen: Mutex<Option<CompletionRequest>>,
    }

    impl FixedBackend {
        fn new(kind: BackendKind, completion: Completion) -> Self {
            Self {
                kind,
                completion,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        fn backend_kind(&self) -> BackendKind {
            self.kind
        }

        async fn get_completion(
            &self,
            request: CompletionRequest,
        ) -> Result<Completion, LlmError> {
            *self.seen.lock().await = Some(request);
            Ok(self.completion.clone())
        }
    }

    fn engine_with(
        storage: &Arc<MemoryStorageAdapter>,
        overrides: EngineOverrides,
    ) -> ContextEngine {
        let config = EngineConfig::new("trace-1", "tenant-1").overridden(overrides);
        let adapter: Arc<dyn StorageAdapter> = Arc::clone(storage) as Arc<dyn StorageAdapter>;
        ContextEngine::new(config, adapter, Arc::new(InMemoryFileAdapter::default()))
    }

    async fn seed_text(engine: &ContextEngine, text: &str) -> Card {
        let card = Card::new(Content::Text(TextContent {
            text: text.to_string(),
        }))
        .unwrap();
        engine.card_store().add(&card).await.unwrap();
        card
    }

    fn steps(strategy: impl Strategy + 'static) -> Vec<StrategyStep> {
        vec![(Arc::new(strategy), None)]
    }

    #[tokio::test]
    async fn parents_auto_fill_from_persisted_box_id() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "hello").await;

        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());
        cardbox.set_box_id("box_b1");

        let result = engine.transform(cardbox, &steps(UppercaseStrategy)).await.unwrap();
        assert_eq!(result.parent_ids(), Some(&["box_b1".to_string()][..]));
        assert_eq!(result.box_id(), None);
    }

    #[tokio::test]
    async fn parents_auto_fill_is_single_hop_for_transient_boxes() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "hello").await;

        let mut cardbox = CardBox::with_parents(["box_p1", "box_p2"]);
        cardbox.add(card.card_id());

        let result = engine.transform(cardbox, &steps(UppercaseStrategy)).await.unwrap();
        assert_eq!(
            result.parent_ids(),
            Some(&["box_p1".to_string(), "box_p2".to_string()][..])
        );
    }

    #[tokio::test]
    async fn indexable_sources_get_delete_side_tasks() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());

        let card = Card::new(Content::Text(TextContent {
            text: "indexed".to_string(),
        }))
        .unwrap()
        .with_meta("indexable", json!(true));
        engine.card_store().add(&card).await.unwrap();

        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());
        let result = engine.transform(cardbox, &steps(UppercaseStrategy)).await.unwrap();

        let tasks = storage.side_tasks().await;
        // add() enqueued an index task for the source, the transform a
        // delete for it, and add() an index task for the derived card
        // (metadata carries the flag forward).
        let derived_id = result.card_ids()[0].clone();
        assert!(tasks.iter().any(|t| {
            t.card_id == card.card_id() && t.operation == SideTaskOp::Delete
        }));
        assert!(tasks.iter().any(|t| {
            t.card_id == derived_id && t.operation == SideTaskOp::Index
        }));
    }

    #[tokio::test]
    async fn history_levels_gate_what_is_recorded() {
        for (level, expect_ops, expect_boxes) in [
            (HistoryLevel::Full, 1usize, 1usize),
            (HistoryLevel::CardOnly, 1, 0),
            (HistoryLevel::Off, 0, 0),
        ] {
            let storage = Arc::new(MemoryStorageAdapter::new());
            let engine = engine_with(
                &storage,
                EngineOverrides {
                    history_level: Some(level),
                    ..EngineOverrides::default()
                },
            );
            let card = seed_text(&engine, "hello").await;
            let mut cardbox = CardBox::new();
            cardbox.add(card.card_id());

            engine.transform(cardbox, &steps(UppercaseStrategy)).await.unwrap();

            assert_eq!(storage.operation_logs().await.len(), expect_ops, "{level:?}");
            assert_eq!(storage.box_logs().await.len(), expect_boxes, "{level:?}");
        }
    }

    #[tokio::test]
    async fn box_log_captures_strategy_input_and_snapshots() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "hello").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());

        let input = json!({"mode": "loud"});
        let steps: Vec<StrategyStep> = vec![(Arc::new(UppercaseStrategy), Some(input.clone()))];
        engine.transform(cardbox, &steps).await.unwrap();

        let logs = storage.box_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].strategy_name, "UppercaseStrategy");
        assert_eq!(logs[0].strategy_input.as_deref(), Some(input.to_string().as_str()));
        assert!(logs[0].input_box.contains(card.card_id()));
        assert!(!logs[0].output_box.contains(card.card_id()));
    }

    #[tokio::test]
    async fn pipeline_continues_past_per_card_errors() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "ok").await;

        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());
        cardbox.add("card_missing");

        let steps: Vec<StrategyStep> = vec![
            (Arc::new(UppercaseStrategy), None),
            (Arc::new(UppercaseStrategy), None),
        ];
        let result = engine.transform(cardbox, &steps).await.unwrap();

        // The missing id rides through both steps; the real card was
        // transformed twice.
        assert_eq!(result.len(), 2);
        assert!(result.card_ids().contains(&"card_missing".to_string()));
        assert_eq!(storage.operation_logs().await.len(), 2);
    }

    #[tokio::test]
    async fn call_model_choices_shape_creates_tool_call_and_text_cards() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "question").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());

        let completion = Completion {
            choices: vec![CompletionChoice {
                message: CompletionMessage {
                    content: Some(json!("  the answer  ")),
                    tool_calls: Some(vec![ToolCall::function(
                        "call_1",
                        "lookup",
                        json!("{\"q\":\"x\"}"),
                    )]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            ..Completion::default()
        };
        let backend = FixedBackend::new(BackendKind::Turns, completion);
        let new_box = engine
            .call_model(&cardbox, &backend, "model-x", Map::new())
            .await
            .unwrap();

        // Exactly the new cards, never merged with the input box.
        assert_eq!(new_box.len(), 2);
        assert!(!new_box.card_ids().contains(&card.card_id().to_string()));

        let tool_card = engine.card_store().get(&new_box.card_ids()[0]).await.unwrap().unwrap();
        assert_eq!(tool_card.tool_calls().unwrap().len(), 1);
        assert_eq!(tool_card.meta_str("stage"), Some("tool_call"));
        let text_card = engine.card_store().get(&new_box.card_ids()[1]).await.unwrap().unwrap();
        assert_eq!(text_card.text(), "the answer");
        assert_eq!(text_card.meta_str("stage"), Some("model_text"));
        assert_eq!(text_card.meta_str("role"), Some("assistant"));

        // The projected context reached the backend.
        let seen = backend.seen.lock().await.clone().unwrap();
        assert_eq!(seen.model, "model-x");
        assert_eq!(seen.messages.len(), 1);
    }

    #[tokio::test]
    async fn call_model_outputs_shape_creates_one_card_per_segment() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(
            &storage,
            EngineOverrides {
                backend_mode: Some(BackendMode::Interactions { store: false }),
                ..EngineOverrides::default()
            },
        );
        let card = seed_text(&engine, "question").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());

        let completion = Completion {
            interaction_id: Some("int_7".to_string()),
            status: Some("completed".to_string()),
            outputs: vec![
                CompletionOutput::FunctionCall {
                    name: "search".to_string(),
                    arguments: json!({"q": "rust"}),
                    id: None,
                },
                CompletionOutput::Text {
                    text: "found it".to_string(),
                },
                CompletionOutput::Text { text: String::new() },
            ],
            ..Completion::default()
        };
        let backend = FixedBackend::new(BackendKind::Interactions, completion);
        let new_box = engine
            .call_model(&cardbox, &backend, "model-y", Map::new())
            .await
            .unwrap();

        assert_eq!(new_box.len(), 2);
        let call_card = engine.card_store().get(&new_box.card_ids()[0]).await.unwrap().unwrap();
        let calls = call_card.tool_calls().unwrap();
        // A backend call without an id gets a derived one; structured
        // arguments are JSON-encoded on the tool call.
        assert_eq!(calls[0].id, "search_0");
        assert_eq!(calls[0].function.arguments, json!(r#"{"q":"rust"}"#));
        assert_eq!(call_card.meta_str("interaction_group_id"), Some("int_7"));
        assert_eq!(
            call_card.meta("interaction_segment").unwrap()["arguments"],
            json!({"q": "rust"})
        );

        let text_card = engine.card_store().get(&new_box.card_ids()[1]).await.unwrap().unwrap();
        assert_eq!(text_card.text(), "found it");
        assert_eq!(
            text_card.meta("interaction_segment_index").unwrap(),
            &json!(1)
        );
        assert_eq!(text_card.meta_str("interaction_status"), Some("completed"));
    }

    #[tokio::test]
    async fn call_model_with_no_usable_outputs_returns_empty_box() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "question").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());

        let backend = FixedBackend::new(BackendKind::Turns, Completion::default());
        let new_box = engine
            .call_model(&cardbox, &backend, "model-z", Map::new())
            .await
            .unwrap();
        assert!(new_box.is_empty());
    }

    #[tokio::test]
    async fn call_model_records_api_history_at_full_level() {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "question").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());

        let backend = FixedBackend::new(BackendKind::Turns, Completion::default());
        engine
            .call_model(&cardbox, &backend, "model-x", Map::new())
            .await
            .unwrap();

        let logs = storage.api_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].api_type, "llm");
        assert_eq!(logs[0].endpoint, "model-x");
        assert!(logs[0].request.as_ref().unwrap().contains("question"));

        // Brief levels skip the api row entirely.
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(
            &storage,
            EngineOverrides {
                history_level: Some(HistoryLevel::CardOnly),
                ..EngineOverrides::default()
            },
        );
        let card = seed_text(&engine, "question").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());
        let backend = FixedBackend::new(BackendKind::Turns, Completion::default());
        engine
            .call_model(&cardbox, &backend, "model-x", Map::new())
            .await
            .unwrap();
        assert!(storage.api_logs().await.is_empty());
    }

    #[tokio::test]
    async fn config_override_merge_is_pure() {
        let base = EngineConfig::new("t", "tenant");
        assert_eq!(base.history_level, HistoryLevel::Full);

        let merged = base.clone().overridden(EngineOverrides {
            history_level: Some(HistoryLevel::Off),
            ..EngineOverrides::default()
        });
        assert_eq!(merged.history_level, HistoryLevel::Off);
        assert_eq!(merged.backend_mode, base.backend_mode);
        assert_eq!(merged.trace_id, base.trace_id);
    }

    #[tokio::test]
    async fn transform_lists_survive_store_roundtrip() {
        // Derived cards are persisted through the validating store, so a
        // post-transform listing sees them newest-first.
        let storage = Arc::new(MemoryStorageAdapter::new());
        let engine = engine_with(&storage, EngineOverrides::default());
        let card = seed_text(&engine, "hello").await;
        let mut cardbox = CardBox::new();
        cardbox.add(card.card_id());

        let result = engine.transform(cardbox, &steps(UppercaseStrategy)).await.unwrap();
        let listed = engine.card_store().list(CardQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].card_id(), result.card_ids()[0]);
        assert_eq!(listed[0].text(), "HELLO");
    }
}
