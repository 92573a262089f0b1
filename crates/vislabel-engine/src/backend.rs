use serde_json::{json, Value};
use vislabel_contracts::events::{EventPayload, EventWriter, TaskState};
use vislabel_contracts::predictions::PredictionRecord;
use vislabel_contracts::tasks::Task;

use crate::client::{error_chain_text, VisionClient, VisionRequest};
use crate::config::BackendConfig;
use crate::error::PredictError;
use crate::pipeline::ImagePipeline;

const MODEL_ERROR_MAX_CHARS: usize = 512;

/// What an annotation host needs from a prediction backend.
pub trait InferenceBackend: Send + Sync {
    /// Returns exactly one record per task, in task order. Never fails as a
    /// whole; failed tasks carry the error marker.
    fn predict(&self, tasks: &[Task]) -> Vec<PredictionRecord>;
    fn model_version(&self) -> &str;
}

pub struct VisionBackend {
    config: BackendConfig,
    pipeline: ImagePipeline,
    client: Box<dyn VisionClient>,
    events: Option<EventWriter>,
}

impl VisionBackend {
    pub fn new(config: BackendConfig, client: Box<dyn VisionClient>) -> Self {
        let pipeline = ImagePipeline::new(&config);
        Self {
            config,
            pipeline,
            client,
            events: None,
        }
    }

    /// Records every task state transition to `events`.
    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs one task to a terminal state. Errors end here.
    fn settle(&self, task: &Task) -> (PredictionRecord, TaskState) {
        let task_id = task.id.to_string();
        match self.run_task(task, &task_id) {
            Ok(text) => {
                self.record(&task_id, TaskState::Succeeded, EventPayload::new());
                (
                    PredictionRecord::text(text, &self.config.model_version),
                    TaskState::Succeeded,
                )
            }
            Err(err) => {
                log::error!("Prediction failed for task {task_id}: {err}");
                let mut payload = EventPayload::new();
                payload.insert("error_kind".to_string(), json!(err.kind()));
                payload.insert("error".to_string(), Value::String(err.to_string()));
                self.record(&task_id, TaskState::Failed, payload);
                (
                    PredictionRecord::failed(&self.config.model_version),
                    TaskState::Failed,
                )
            }
        }
    }

    fn run_task(&self, task: &Task, task_id: &str) -> Result<String, PredictError> {
        let image_reference = task.image_reference();
        log::info!(
            "Processing task {task_id} with image: {}",
            image_reference
                .map(|value| value.chars().take(80).collect::<String>())
                .unwrap_or_else(|| "None".to_string())
        );
        self.record(task_id, TaskState::Pending, EventPayload::new());
        if let Some(reason) = &task.malformed {
            return Err(PredictError::MalformedTask {
                reason: reason.clone(),
            });
        }

        self.record(task_id, TaskState::Preparing, EventPayload::new());
        let prepared = self.pipeline.prepare(image_reference, task_id)?;

        let mut payload = EventPayload::new();
        payload.insert("compression".to_string(), json!(prepared.outcome.label()));
        payload.insert("bytes".to_string(), json!(prepared.outcome.bytes()));
        self.record(task_id, TaskState::Invoking, payload);
        let request = VisionRequest {
            task_id: task_id.to_string(),
            prompt: task.prompt().to_string(),
            image_base64: prepared.base64,
        };
        let response =
            self.client
                .describe(&request)
                .map_err(|err| PredictError::ModelInvocation {
                    message: error_chain_text(&err, MODEL_ERROR_MAX_CHARS),
                })?;
        log::info!(
            "Task {task_id} described by {} ({} chars)",
            response.model,
            response.text.chars().count()
        );
        Ok(response.text)
    }

    fn record(&self, task_id: &str, state: TaskState, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.task_state(task_id, state, payload) {
            log::warn!("failed recording {state} for task {task_id}: {err:#}");
        }
    }
}

impl InferenceBackend for VisionBackend {
    fn predict(&self, tasks: &[Task]) -> Vec<PredictionRecord> {
        let mut predictions = Vec::with_capacity(tasks.len());
        let mut succeeded = 0usize;
        for task in tasks {
            let (record, state) = self.settle(task);
            if state == TaskState::Succeeded {
                succeeded += 1;
            }
            predictions.push(record);
        }
        log::info!(
            "Batch finished: {succeeded}/{} tasks succeeded via {}",
            tasks.len(),
            self.client.name()
        );
        if let Some(events) = self.events.as_ref() {
            if let Err(err) = events.batch_finished(tasks.len(), succeeded) {
                log::warn!("failed recording batch summary: {err:#}");
            }
        }
        predictions
    }

    fn model_version(&self) -> &str {
        &self.config.model_version
    }
}
