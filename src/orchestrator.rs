//! Request-level control flow: validate, encode, route, dispatch, persist.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::FallbackSettings;
use crate::error::{OrchestratorError, ValidationError};
use crate::prompt::{EnhancedPrompt, PromptEncoder, Style, negative_prompt};
use crate::providers::{
    EditInput, FailureKind, GenerateOptions, GenerationResult, ProviderCall, ProviderFailure, ProviderSet, VideoInput,
};
use crate::queue::JobQueue;
use crate::request::GenerationRequest;
use crate::router::{ModelConfig, ModelRouter};
use crate::storage::{AssetUrlMode, ObjectStorage, StorageCategory, is_data_url};
use crate::store::{Generation, GenerationStore, GenerationUpdate, NewGeneration};
use crate::types::{GenerationStatus, GenerationType, Priority};

/// How `submit` runs the provider call once the record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Await the provider and return the finished record.
    #[default]
    Inline,
    /// Spawn the provider call and return the `processing` record immediately.
    Detached,
    /// Hand the call to the job queue for a worker cycle.
    Queued,
}

/// Everything needed to (re)play one provider invocation. This is the queued job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub generation_id: Uuid,
    pub owner: String,
    pub kind: GenerationType,
    pub prompt: EnhancedPrompt,
    pub config: ModelConfig,
    pub call: ProviderCall,
    pub resolution: Option<String>,
}

/// Result of running a plan, including any fallback that was taken.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: GenerationResult,
    pub config: ModelConfig,
    pub fallback_from: Option<String>,
    pub output_url: Option<String>,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.output_url.is_some()
    }

    pub fn error_message(&self) -> String {
        self.result
            .error_message()
            .unwrap_or("Generation failed")
            .to_string()
    }

    /// Record update for a terminal outcome.
    pub fn record_update(&self) -> GenerationUpdate {
        let mut metadata = self.result.metadata.clone();
        if let Some(original) = &self.fallback_from {
            metadata.insert("fallback_from".into(), json!(original));
        }
        let update = match &self.output_url {
            Some(url) => {
                if let Some(provider_url) = self.result.url() {
                    metadata.insert("provider_url".into(), json!(provider_url));
                }
                GenerationUpdate::completed(url.clone())
            }
            None => GenerationUpdate::failed(self.error_message()),
        };
        let update = update.with_metadata(metadata);
        match &self.fallback_from {
            Some(_) => update.with_model(self.config.provider, self.config.model.clone()),
            None => update,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    router: Arc<ModelRouter>,
    providers: ProviderSet,
    records: Arc<dyn GenerationStore>,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<JobQueue>,
    fallbacks: FallbackSettings,
    asset_urls: AssetUrlMode,
}

impl Orchestrator {
    pub fn new(
        router: Arc<ModelRouter>,
        providers: ProviderSet,
        records: Arc<dyn GenerationStore>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            router,
            providers,
            records,
            storage,
            queue,
            fallbacks: FallbackSettings::default(),
            asset_urls: AssetUrlMode::Public,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackSettings) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_asset_urls(mut self, mode: AssetUrlMode) -> Self {
        self.asset_urls = mode;
        self
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn records(&self) -> &Arc<dyn GenerationStore> {
        &self.records
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub async fn submit(&self, request: GenerationRequest, mode: DispatchMode) -> Result<Generation, OrchestratorError> {
        request.validate()?;
        let request = self.resolve_images(request).await?;

        let style = request.style.unwrap_or_else(|| Style::default_for(request.kind));
        let prompt = PromptEncoder::new(request.kind)
            .style(style)
            .quality(request.quality.unwrap_or_default())
            .aspect_ratio(request.aspect_ratio())
            .encode(&request.prompt);

        let config = self.router.route(
            request.kind,
            request.resolution.as_deref(),
            Some(request.priority),
            request.model_id.as_deref(),
        )?;
        let model = self.router.model_info(&config.model);
        if model.is_some_and(|model| model.requires_reference_images) && request.reference_images.is_empty() {
            return Err(ValidationError::ReferenceImagesRequired {
                model: config.model.clone(),
            }
            .into());
        }
        let call = build_call(&request, model.is_some_and(|model| model.supports_negative_prompt));

        let mut metadata = Map::new();
        metadata.insert("tags".into(), json!(prompt.tags));
        metadata.insert("style".into(), json!(prompt.style));
        metadata.insert("quality_score".into(), json!(prompt.quality));
        metadata.insert("estimated_time_secs".into(), json!(self.router.estimate_time(&config.model)));
        if config.resolution_relaxed {
            metadata.insert("resolution_relaxed".into(), json!(true));
        }
        if !request.reference_images.is_empty() {
            metadata.insert("reference_images".into(), json!(request.reference_images));
        }

        let status = match mode {
            DispatchMode::Queued => GenerationStatus::Pending,
            DispatchMode::Inline | DispatchMode::Detached => GenerationStatus::Processing,
        };
        let record = self
            .records
            .create(NewGeneration {
                owner: request.owner.clone(),
                kind: request.kind,
                status,
                prompt: request.prompt.clone(),
                enhanced_prompt: Some(prompt.enhanced.clone()),
                model: Some(config.model.clone()),
                provider: Some(config.provider),
                resolution: request.resolution.clone(),
                duration: (request.kind == GenerationType::Video).then(|| request.video.effective_duration()),
                cost_estimate: self.router.estimate_cost(&config.model),
                input_image_url: request.image_url.clone(),
                metadata,
            })
            .await?;
        info!(
            generation_id = %record.id,
            kind = %record.kind,
            model = %config.model,
            provider = %config.provider,
            mode = ?mode,
            "generation accepted"
        );

        let plan = GenerationPlan {
            generation_id: record.id,
            owner: request.owner,
            kind: request.kind,
            prompt,
            config,
            call,
            resolution: request.resolution,
        };

        match mode {
            DispatchMode::Inline => self.execute(plan).await,
            DispatchMode::Detached => {
                let this = self.clone();
                let span = info_span!("detached_generation", generation_id = %record.id);
                tokio::spawn(
                    async move {
                        if let Err(err) = this.execute(plan).await {
                            error!(error = %err, "detached generation could not be finalized");
                        }
                    }
                    .instrument(span),
                );
                Ok(record)
            }
            DispatchMode::Queued => {
                let job_id = self
                    .queue
                    .enqueue(plan.kind, plan.generation_id, &plan, queue_priority(request.priority))
                    .await?;
                let mut extra = Map::new();
                extra.insert("job_id".into(), json!(job_id));
                Ok(self
                    .records
                    .update(record.id, GenerationUpdate::default().with_metadata(extra))
                    .await?)
            }
        }
    }

    /// Runs a plan and writes the terminal outcome to its record.
    pub async fn execute(&self, plan: GenerationPlan) -> Result<Generation, OrchestratorError> {
        let generation_id = plan.generation_id;
        let execution = self.perform(plan).await;
        if !execution.succeeded() {
            warn!(generation_id = %generation_id, error = %execution.error_message(), "generation failed");
        }
        Ok(self.records.update(generation_id, execution.record_update()).await?)
    }

    /// Dispatches with fallbacks and relocates a successful output. Never errors.
    pub async fn perform(&self, plan: GenerationPlan) -> Execution {
        let GenerationPlan {
            generation_id,
            kind,
            prompt,
            mut config,
            call,
            ..
        } = plan;

        if config.headers.is_empty() {
            if let Err(err) = self.router.authorize(&mut config) {
                return Execution {
                    result: GenerationResult::failed(ProviderFailure::new(FailureKind::Configuration, err.to_string())),
                    config,
                    fallback_from: None,
                    output_url: None,
                };
            }
        }

        let mut result = self.providers.dispatch(&config, &prompt, &call).await;
        let mut fallback_from = None;

        if let Some(failure) = result.failure().cloned() {
            if let Some((fallback_config, fallback_call)) = self.fallback_for(kind, &config, &call, &failure) {
                warn!(
                    generation_id = %generation_id,
                    from = %config.model,
                    to = %fallback_config.model,
                    reason = ?failure.kind,
                    "retrying on fallback model"
                );
                let retry = self.providers.dispatch(&fallback_config, &prompt, &fallback_call).await;
                fallback_from = Some(config.model.clone());
                result = match retry.failure() {
                    Some(second) if kind == GenerationType::Video => {
                        GenerationResult::failed(ProviderFailure::new(
                            second.kind,
                            format!(
                                "{} Fallback to {} also failed: {}",
                                failure.message, fallback_config.model, second.message
                            ),
                        ))
                        .with_metadata(retry.metadata.clone())
                    }
                    _ => retry,
                };
                config = fallback_config;
            }
        }

        let relocated = match result.url().map(str::to_owned) {
            Some(url) => Some(self.relocate(&url, kind).await),
            None => None,
        };
        let output_url = match relocated {
            Some(Ok(stored)) => Some(stored),
            Some(Err(err)) => {
                result = GenerationResult::failed(ProviderFailure::new(
                    FailureKind::Network,
                    format!("Failed to store generated output: {err}"),
                ))
                .with_metadata(result.metadata);
                None
            }
            None => None,
        };

        Execution {
            result,
            config,
            fallback_from,
            output_url,
        }
    }

    /// Chooses the single fallback attempt for a qualifying failure.
    fn fallback_for(
        &self,
        kind: GenerationType,
        config: &ModelConfig,
        call: &ProviderCall,
        failure: &ProviderFailure,
    ) -> Option<(ModelConfig, ProviderCall)> {
        match (kind, call) {
            (GenerationType::Edit, ProviderCall::Edit(_))
                if matches!(failure.kind, FailureKind::PermissionDenied | FailureKind::Unsupported)
                    && config.model != self.fallbacks.edit_model =>
            {
                let fallback = self.fallback_config(kind, config, &self.fallbacks.edit_model)?;
                Some((fallback, call.clone()))
            }
            (GenerationType::Video, ProviderCall::Video(input))
                if matches!(failure.kind, FailureKind::Moderation | FailureKind::Unsupported)
                    && config.model != self.fallbacks.video_model
                    && self
                        .router
                        .model_info(&config.model)
                        .is_some_and(|model| model.requires_reference_images) =>
            {
                let fallback = self.fallback_config(kind, config, &self.fallbacks.video_model)?;
                let input = VideoInput {
                    image_url: input.image_url.clone(),
                    reference_images: Vec::new(),
                    options: input.options.clone(),
                };
                Some((fallback, ProviderCall::Video(input)))
            }
            _ => None,
        }
    }

    /// Routes the fallback model, letting the original call's parameters win.
    fn fallback_config(&self, kind: GenerationType, original: &ModelConfig, model_id: &str) -> Option<ModelConfig> {
        match self.router.route(kind, None, None, Some(model_id)) {
            Ok(mut fallback) => {
                for (key, value) in &original.parameters {
                    if key == "application" || key == "reference_image_param" {
                        continue;
                    }
                    fallback.parameters.insert(key.clone(), value.clone());
                }
                Some(fallback)
            }
            Err(err) => {
                warn!(model = model_id, error = %err, "fallback model unavailable");
                None
            }
        }
    }

    async fn relocate(&self, url: &str, kind: GenerationType) -> Result<String, crate::error::StorageError> {
        let category = match kind {
            GenerationType::Video => StorageCategory::Videos,
            GenerationType::Image | GenerationType::Edit => StorageCategory::Images,
        };
        let stored = self.storage.upload_from_url(url, category).await?;
        Ok(stored.url)
    }

    /// Uploads inline data URLs and checks remote image URLs before anything is dispatched.
    async fn resolve_images(&self, mut request: GenerationRequest) -> Result<GenerationRequest, OrchestratorError> {
        if let Some(image_url) = request.image_url.take() {
            request.image_url = Some(self.resolve_image(&image_url).await?);
        }
        let mut references = Vec::with_capacity(request.reference_images.len());
        for reference in &request.reference_images {
            references.push(self.resolve_image(reference).await?);
        }
        request.reference_images = references;
        Ok(request)
    }

    async fn resolve_image(&self, value: &str) -> Result<String, OrchestratorError> {
        if is_data_url(value) {
            let stored = self.storage.upload_data_url(value, StorageCategory::Images).await?;
            return Ok(self.storage.asset_url(&stored.key, self.asset_urls));
        }
        let parsed = url::Url::parse(value.trim())
            .map_err(|err| ValidationError::InvalidImage(format!("{value}: {err}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed.to_string()),
            scheme => Err(ValidationError::InvalidImage(format!("unsupported scheme `{scheme}`")).into()),
        }
    }
}

fn build_call(request: &GenerationRequest, negative: bool) -> ProviderCall {
    match request.kind {
        GenerationType::Image => ProviderCall::Generate(GenerateOptions {
            negative_prompt: negative.then(|| negative_prompt(request.kind).to_string()),
        }),
        GenerationType::Edit => ProviderCall::Edit(EditInput {
            image_url: request.image_url.clone().unwrap_or_default(),
            instructions: request.instructions.clone(),
        }),
        GenerationType::Video => ProviderCall::Video(VideoInput {
            image_url: request.image_url.clone(),
            reference_images: request.reference_images.clone(),
            options: request.video.clone(),
        }),
    }
}

/// Queue priority for a request; lower is served first.
fn queue_priority(priority: Priority) -> i64 {
    match priority {
        Priority::Speed => 0,
        Priority::Quality => 1,
        Priority::Cost => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderCredentials, ProviderEndpoints, RouterSettings};
    use crate::providers::ProviderAdapter;
    use crate::router::ModelRegistry;
    use crate::storage::LocalFileStorage;
    use crate::store::MemoryGenerationStore;
    use crate::types::ProviderId;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Adapter returning scripted results and recording each call.
    struct Scripted {
        id: ProviderId,
        results: StdMutex<Vec<GenerationResult>>,
        calls: StdMutex<Vec<(String, ProviderCall)>>,
    }

    impl Scripted {
        fn new(id: ProviderId, results: Vec<GenerationResult>) -> Arc<Self> {
            Arc::new(Self {
                id,
                results: StdMutex::new(results),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn next(&self, config: &ModelConfig, call: ProviderCall) -> GenerationResult {
            self.calls.lock().unwrap().push((config.model.clone(), call));
            self.results.lock().unwrap().remove(0)
        }

        fn calls(&self) -> Vec<(String, ProviderCall)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderAdapter for Scripted {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn generate(&self, config: &ModelConfig, _prompt: &EnhancedPrompt, options: &GenerateOptions) -> GenerationResult {
            self.next(config, ProviderCall::Generate(options.clone()))
        }

        async fn edit(&self, config: &ModelConfig, _prompt: &EnhancedPrompt, input: &EditInput) -> GenerationResult {
            self.next(config, ProviderCall::Edit(input.clone()))
        }

        async fn generate_video(&self, config: &ModelConfig, _prompt: &EnhancedPrompt, input: &VideoInput) -> GenerationResult {
            self.next(config, ProviderCall::Video(input.clone()))
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        records: Arc<MemoryGenerationStore>,
        _dir: tempfile::TempDir,
    }

    fn router() -> Arc<ModelRouter> {
        let settings = RouterSettings {
            credentials: ProviderCredentials {
                modelslabs: Some("ml".into()),
                xai: Some("xai".into()),
                higgsfield: Some("hf".into()),
            },
            endpoints: ProviderEndpoints::default(),
            higgsfield_application: Some("soul/video".into()),
            higgsfield_reference_param: None,
        };
        Arc::new(ModelRouter::new(ModelRegistry::builtin(), settings).unwrap())
    }

    fn harness(providers: ProviderSet) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFileStorage::new(
            dir.path().to_path_buf(),
            "https://studio.test/cache".into(),
        ));
        let records = Arc::new(MemoryGenerationStore::new());
        let orchestrator = Orchestrator::new(
            router(),
            providers,
            records.clone(),
            storage,
            Arc::new(JobQueue::default()),
        );
        Harness {
            orchestrator,
            records,
            _dir: dir,
        }
    }

    async fn output_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89, 0x50, 0x4E, 0x47]),
            )
            .mount(&server)
            .await;
        server
    }

    fn forbidden() -> GenerationResult {
        GenerationResult::failed(ProviderFailure::new(FailureKind::PermissionDenied, "xAI API error 403: denied"))
    }

    #[tokio::test]
    async fn validation_failure_creates_no_record() {
        let h = harness(ProviderSet::default());
        let request = GenerationRequest::new(GenerationType::Edit, "u1", "make it blue");
        let err = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(ValidationError::ImageRequired(_))));
        assert!(h.records.list_recent(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forbidden_edit_falls_back_exactly_once() {
        let server = output_server().await;
        let xai = Scripted::new(ProviderId::Xai, vec![forbidden()]);
        let modelslabs = Scripted::new(
            ProviderId::ModelsLabs,
            vec![GenerationResult::completed(format!("{}/edited.png", server.uri()))],
        );
        let h = harness(ProviderSet::default().with_adapter(xai.clone()).with_adapter(modelslabs.clone()));

        let request = GenerationRequest::new(GenerationType::Edit, "u1", "make it blue")
            .with_image("https://img.test/in.png")
            .with_model("grok-imagine-image");
        let record = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap();

        assert_eq!(xai.calls().len(), 1);
        assert_eq!(modelslabs.calls().len(), 1);
        assert_eq!(modelslabs.calls()[0].0, "nano-banana-pro");
        assert_eq!(record.status, GenerationStatus::Completed);
        assert_eq!(record.model.as_deref(), Some("nano-banana-pro"));
        assert_eq!(record.provider, Some(ProviderId::ModelsLabs));
        assert_eq!(record.metadata["fallback_from"], json!("grok-imagine-image"));
        assert!(record.output_url.unwrap().starts_with("https://studio.test/cache/images/"));
    }

    #[tokio::test]
    async fn fallback_is_not_repeated_when_fallback_also_fails() {
        let xai = Scripted::new(ProviderId::Xai, vec![forbidden()]);
        let modelslabs = Scripted::new(ProviderId::ModelsLabs, vec![forbidden()]);
        let h = harness(ProviderSet::default().with_adapter(xai.clone()).with_adapter(modelslabs.clone()));

        let request = GenerationRequest::new(GenerationType::Edit, "u1", "make it blue")
            .with_image("https://img.test/in.png")
            .with_model("grok-imagine-image");
        let record = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap();

        assert_eq!(xai.calls().len() + modelslabs.calls().len(), 2);
        assert_eq!(record.status, GenerationStatus::Failed);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn moderated_reference_video_retries_on_fallback_video_model() {
        let higgsfield = Scripted::new(
            ProviderId::Higgsfield,
            vec![GenerationResult::failed(ProviderFailure::new(
                FailureKind::Moderation,
                "Higgsfield request nsfw.",
            ))],
        );
        let xai = Scripted::new(
            ProviderId::Xai,
            vec![GenerationResult::failed(ProviderFailure::new(
                FailureKind::Moderation,
                "Video was blocked by content moderation.",
            ))],
        );
        let h = harness(ProviderSet::default().with_adapter(higgsfield.clone()).with_adapter(xai.clone()));

        let request = GenerationRequest::new(GenerationType::Video, "u1", "dance")
            .with_reference_images(vec!["https://img.test/ref.png".into()])
            .with_model("higgsfield-soul-video");
        let record = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap();

        let calls = xai.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "grok-imagine-video");
        assert!(matches!(&calls[0].1, ProviderCall::Video(input) if input.reference_images.is_empty()));
        let error = record.error.unwrap();
        assert!(error.contains("nsfw"));
        assert!(error.contains("content moderation"));
    }

    #[tokio::test]
    async fn reference_model_without_references_is_rejected_before_dispatch() {
        let higgsfield = Scripted::new(ProviderId::Higgsfield, Vec::new());
        let h = harness(ProviderSet::default().with_adapter(higgsfield.clone()));
        let request = GenerationRequest::new(GenerationType::Video, "u1", "dance").with_model("higgsfield-soul-video");

        let err = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap_err();
        assert!(err.to_string().contains("requires at least one reference image"));
        assert!(higgsfield.calls().is_empty());
    }

    #[tokio::test]
    async fn queued_submission_leaves_record_pending_with_job() {
        let h = harness(ProviderSet::default());
        let request = GenerationRequest::new(GenerationType::Image, "u1", "a red bicycle").with_resolution("1:1");
        let record = h.orchestrator.submit(request, DispatchMode::Queued).await.unwrap();

        assert_eq!(record.status, GenerationStatus::Pending);
        assert!(record.metadata.contains_key("job_id"));
        let job = h.orchestrator.queue().dequeue().await.unwrap();
        let plan: GenerationPlan = job.payload().unwrap();
        assert_eq!(plan.generation_id, record.id);
        assert!(plan.config.headers.is_empty());
        assert!(!job.payload.to_string().contains("Bearer"));
    }

    #[tokio::test]
    async fn data_url_images_are_stored_before_dispatch() {
        let server = output_server().await;
        let modelslabs = Scripted::new(
            ProviderId::ModelsLabs,
            vec![GenerationResult::completed(format!("{}/out.png", server.uri()))],
        );
        let h = harness(ProviderSet::default().with_adapter(modelslabs.clone()));
        let request = GenerationRequest::new(GenerationType::Edit, "u1", "add snow")
            .with_image("data:image/png;base64,iVBORw0KGgo=")
            .with_model("nano-banana-pro");
        let record = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap();

        let input_url = record.input_image_url.unwrap();
        assert!(input_url.starts_with("https://studio.test/cache/images/"));
        assert!(matches!(&modelslabs.calls()[0].1, ProviderCall::Edit(input) if input.image_url == input_url));
    }

    #[tokio::test]
    async fn non_http_image_urls_are_rejected() {
        let h = harness(ProviderSet::default());
        let request = GenerationRequest::new(GenerationType::Edit, "u1", "add snow").with_image("file:///etc/passwd");
        let err = h.orchestrator.submit(request, DispatchMode::Inline).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(ValidationError::InvalidImage(_))));
    }
}
