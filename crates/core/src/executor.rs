//! Backend executor: submits workflows to the diffusion backend, polls
//! for completion, and fetches artifacts (spec.md 4.J / §6).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ExecutorError;
use crate::recipe::Recipe;

#[derive(Debug, Clone, Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryImage {
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub image_type: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct HistoryStatus {
    status_str: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryOutputs {
    #[serde(default)]
    images: Vec<HistoryImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryRecord {
    #[serde(default)]
    outputs: std::collections::HashMap<String, HistoryOutputs>,
    #[serde(default)]
    status: HistoryStatus,
}

/// Result of awaiting a submitted prompt's completion.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub images: Vec<HistoryImage>,
    pub elapsed: Duration,
}

/// Thin HTTP client over the diffusion backend's API (spec.md §6).
pub struct BackendExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl BackendExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// `GET /system_stats` — used as a cheap reachability probe.
    pub async fn health_check(&self) -> Result<(), ExecutorError> {
        self.client
            .get(format!("{}/system_stats", self.base_url))
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable {
                endpoint: self.base_url.clone(),
                source: e,
            })?;
        Ok(())
    }

    pub async fn system_stats(&self) -> Result<Value, ExecutorError> {
        self.get_json("/system_stats").await
    }

    pub async fn queue_snapshot(&self) -> Result<Value, ExecutorError> {
        self.get_json("/queue").await
    }

    pub async fn interrupt(&self) -> Result<(), ExecutorError> {
        let resp = self
            .client
            .post(format!("{}/interrupt", self.base_url))
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable {
                endpoint: self.base_url.clone(),
                source: e,
            })?;
        if !resp.status().is_success() {
            return Err(ExecutorError::BadStatus {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// `POST /prompt` with `{prompt, client_id?}`; errors if the backend
    /// response lacks a prompt identifier.
    pub async fn submit(&self, workflow: &Value, client_id: Option<&str>) -> Result<String, ExecutorError> {
        let body = SubmitRequest {
            prompt: workflow,
            client_id,
        };
        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable {
                endpoint: self.base_url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ExecutorError::BadStatus {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: SubmitResponse = response.json().await.map_err(|_| ExecutorError::MalformedResponse {
            message: "response was not valid JSON".into(),
        })?;

        parsed.prompt_id.ok_or(ExecutorError::MalformedResponse {
            message: "response missing prompt_id".into(),
        })
    }

    /// `GET /history/{id}`. Absence (404 or missing body) means "not yet
    /// complete" and is represented as `Ok(None)`, not an error.
    pub async fn history(&self, prompt_id: &str) -> Result<Option<Value>, ExecutorError> {
        let response = self
            .client
            .get(format!("{}/history/{prompt_id}", self.base_url))
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable {
                endpoint: self.base_url.clone(),
                source: e,
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ExecutorError::BadStatus {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await.map_err(|_| ExecutorError::MalformedResponse {
            message: "history response was not valid JSON".into(),
        })?;

        let record = body
            .get(prompt_id)
            .cloned()
            .unwrap_or(Value::Null);
        if record.is_null() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// `GET /view?filename&subfolder&type` — raw artifact bytes.
    pub async fn fetch_artifact(
        &self,
        filename: &str,
        subfolder: &str,
        image_type: &str,
    ) -> Result<Vec<u8>, ExecutorError> {
        let response = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", image_type),
            ])
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable {
                endpoint: self.base_url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ExecutorError::BadStatus {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }

        response.bytes().await.map(|b| b.to_vec()).map_err(|_| ExecutorError::MalformedResponse {
            message: "artifact body was not readable".into(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, ExecutorError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable {
                endpoint: self.base_url.clone(),
                source: e,
            })?;
        response.json().await.map_err(|_| ExecutorError::MalformedResponse {
            message: format!("{path} response was not valid JSON"),
        })
    }

    /// Poll `history(prompt_id)` at `poll_interval` until completion, a
    /// backend-reported execution error, or `timeout` elapses.
    pub async fn await_completion(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CompletionResult, ExecutorError> {
        let start = Instant::now();
        loop {
            if start.elapsed() >= timeout {
                return Err(ExecutorError::Timeout {
                    job_id: prompt_id.to_string(),
                    elapsed_secs: start.elapsed().as_secs(),
                });
            }

            if let Some(record) = self.history(prompt_id).await? {
                let parsed: HistoryRecord = serde_json::from_value(record).map_err(|e| {
                    ExecutorError::MalformedResponse {
                        message: format!("could not parse history record: {e}"),
                    }
                })?;

                if parsed.status.status_str.as_deref() == Some("error") {
                    return Err(ExecutorError::ExecutionFailed {
                        job_id: prompt_id.to_string(),
                        reason: parsed.status.error.unwrap_or_else(|| "unknown error".into()),
                    });
                }

                let images = parsed
                    .outputs
                    .values()
                    .flat_map(|o| o.images.clone())
                    .collect::<Vec<_>>();
                if !images.is_empty() {
                    return Ok(CompletionResult {
                        images,
                        elapsed: start.elapsed(),
                    });
                }
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Patch a workflow's node graph in place to apply a composed
    /// recipe, matching each node by `class_type`. `seed` comes from the
    /// originating request (the recipe itself carries no seed) and is only
    /// applied to sampler nodes when non-negative. Unknown class types are
    /// left untouched.
    pub fn apply_recipe(workflow: &mut Value, recipe: &Recipe, seed: Option<i64>) {
        let Some(nodes) = workflow.as_object_mut() else {
            return;
        };

        for node in nodes.values_mut() {
            let Some(class_type) = node.get("class_type").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let is_negative = node
                .get("_meta")
                .and_then(|m| m.get("title"))
                .and_then(Value::as_str)
                .map(|t| t.to_lowercase().contains("neg"))
                .unwrap_or(false);
            let Some(inputs) = node.get_mut("inputs") else {
                continue;
            };

            match class_type.as_str() {
                "CLIPTextEncode" | "CLIPTextEncodeSDXL" => {
                    let text = if is_negative {
                        &recipe.negative_prompt
                    } else {
                        &recipe.positive_prompt
                    };
                    if let Some(obj) = inputs.as_object_mut() {
                        obj.insert("text".into(), Value::String(text.clone()));
                    }
                }
                "KSampler" | "KSamplerAdvanced" => {
                    if let Some(obj) = inputs.as_object_mut() {
                        if let Some(seed) = seed {
                            if seed >= 0 {
                                obj.insert("seed".into(), Value::from(seed));
                            }
                        }
                        obj.insert("steps".into(), Value::from(recipe.steps));
                        obj.insert("cfg".into(), Value::from(recipe.cfg));
                        if let Some(sampler) = &recipe.sampler {
                            obj.insert("sampler_name".into(), Value::String(sampler.clone()));
                        }
                        if let Some(scheduler) = &recipe.scheduler {
                            obj.insert("scheduler".into(), Value::String(scheduler.clone()));
                        }
                        if let Some(denoise) = recipe.denoise {
                            if denoise < 1.0 {
                                obj.insert("denoise".into(), Value::from(denoise));
                            }
                        }
                    }
                }
                "EmptyLatentImage" => {
                    if let Some(obj) = inputs.as_object_mut() {
                        obj.insert("width".into(), Value::from(recipe.width));
                        obj.insert("height".into(), Value::from(recipe.height));
                    }
                }
                other => {
                    debug!(class_type = other, "leaving unknown node class type untouched");
                }
            }
        }
    }
}
