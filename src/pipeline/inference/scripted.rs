//! Scripted backend for tests.
//!
//! Replies are chosen by the first rule whose needle occurs in the prompt
//! (stage rules match the stage marker every prompt starts with). A rule
//! with several replies serves them in order and repeats the last one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerationOptions, InferenceError, LlmBackend};
use crate::models::Stage;
use crate::pipeline::prompt::stage_marker;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(InferenceError),
    /// Reply after a delay (sleep is cancellable).
    Delayed(Duration, String),
    /// Never completes.
    Hang,
}

struct Rule {
    needle: String,
    replies: Vec<ScriptedReply>,
    cursor: AtomicUsize,
}

impl Rule {
    fn next_reply(&self) -> ScriptedReply {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let idx = i.min(self.replies.len().saturating_sub(1));
        self.replies
            .get(idx)
            .cloned()
            .unwrap_or_else(|| ScriptedReply::Fail(InferenceError::Http("empty script".into())))
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub model: String,
    pub rule: Option<String>,
    pub temperature: f32,
    pub num_predict: Option<i32>,
}

pub struct ScriptedBackend {
    rules: Vec<Rule>,
    default: ScriptedReply,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedBackend {
    pub fn new(default: ScriptedReply) -> Self {
        Self {
            rules: Vec::new(),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(ScriptedReply::Text(text.to_string()))
    }

    pub fn failing(error: InferenceError) -> Self {
        Self::new(ScriptedReply::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::new(ScriptedReply::Hang)
    }

    /// Reply to prompts containing `needle`.
    pub fn on(self, needle: &str, reply: ScriptedReply) -> Self {
        self.on_sequence(needle, vec![reply])
    }

    pub fn on_sequence(mut self, needle: &str, replies: Vec<ScriptedReply>) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            replies,
            cursor: AtomicUsize::new(0),
        });
        self
    }

    /// Reply to prompts of one cascade stage.
    pub fn on_stage(self, stage: Stage, reply: ScriptedReply) -> Self {
        let marker = stage_marker(stage);
        self.on(&marker, reply)
    }

    pub fn on_stage_sequence(self, stage: Stage, replies: Vec<ScriptedReply>) -> Self {
        let marker = stage_marker(stage);
        self.on_sequence(&marker, replies)
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, call: ScriptedCall) {
        match self.calls.lock() {
            Ok(mut guard) => guard.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        _system: &str,
        options: &GenerationOptions,
    ) -> Result<String, InferenceError> {
        let matched = self.rules.iter().find(|r| prompt.contains(&r.needle));
        self.record(ScriptedCall {
            model: model.to_string(),
            rule: matched.map(|r| r.needle.clone()),
            temperature: options.temperature,
            num_predict: options.num_predict,
        });

        let reply = match matched {
            Some(rule) => rule.next_reply(),
            None => self.default.clone(),
        };

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            ScriptedReply::Hang => {
                std::future::pending::<()>().await;
                Err(InferenceError::Http("unreachable".into()))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_reply_and_recording() {
        let backend = ScriptedBackend::replying("{}");
        let out = backend
            .generate("m1", "anything", "", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "{}");
        assert_eq!(backend.calls()[0].model, "m1");
        assert!(backend.calls()[0].rule.is_none());
    }

    #[tokio::test]
    async fn sequence_repeats_last_reply() {
        let backend = ScriptedBackend::replying("default").on_sequence(
            "needle",
            vec![
                ScriptedReply::Fail(InferenceError::Timeout(1)),
                ScriptedReply::Text("ok".into()),
            ],
        );
        let opts = GenerationOptions::default();
        assert!(backend.generate("m", "a needle", "", &opts).await.is_err());
        assert_eq!(backend.generate("m", "a needle", "", &opts).await.unwrap(), "ok");
        assert_eq!(backend.generate("m", "a needle", "", &opts).await.unwrap(), "ok");
        assert_eq!(backend.generate("m", "other", "", &opts).await.unwrap(), "default");
    }

    #[tokio::test]
    async fn hang_is_cancelled_by_timeout() {
        let backend = ScriptedBackend::hanging();
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            backend.generate("m", "p", "", &GenerationOptions::default()),
        )
        .await;
        assert!(res.is_err());
    }
}
