//! Mock LLM client for testing
//!
//! This module provides a deterministic, API-free [`LlmClient`] for exercising
//! the chunking → engine → task pipeline without API keys or network access.
//! Every request is recorded, and the number of concurrently executing calls is
//! tracked so tests can assert on context propagation and concurrency bounds.
//!
//! # Example
//!
//! ```ignore
//! use doc_translation_agent::mock::{MockLlm, MockMode};
//!
//! #[tokio::test]
//! async fn test_translation() {
//!     let mock = MockLlm::new(MockMode::Suffix);
//!     let request = CompletionRequest::new(0, "hello", "fr");
//!     let result = mock.complete(&request).await.unwrap();
//!     assert_eq!(result.text, "hello_fr");
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, TokenUsage};
use crate::tokenizer::estimate_tokens;

/// Mock translation modes for testing different scenarios
#[derive(Debug, Clone)]
pub enum MockMode {
    /// Return the input unchanged
    Echo,

    /// Replace every source term of the request's terminology with its fixed translation
    Terminology,

    /// Append target language suffix: "hello" → "hello_fr"
    Suffix,

    /// Predefined mappings: source text → translation, falling back to echo
    Mappings(HashMap<String, String>),

    /// Every call fails with a transient error
    AlwaysTransient(String),

    /// Every call fails with a permanent error
    AlwaysPermanent(String),

    /// The first `n` attempts for each chunk fail transiently, later attempts echo
    FailTimes(usize),

    /// Calls for the given chunk index always fail transiently, others echo
    FailChunk(usize),
}

/// Mock LLM that simulates various completion scenarios
#[derive(Debug)]
pub struct MockLlm {
    mode: MockMode,
    /// Optional simulated network delay (in milliseconds)
    delay_ms: u64,
    calls: Mutex<Vec<CompletionRequest>>,
    attempts_per_chunk: Mutex<HashMap<usize, usize>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockLlm {
    /// Create a new MockLlm with the given mode
    pub fn new(mode: MockMode) -> Self {
        Self::with_delay(mode, 0)
    }

    /// Create a MockLlm with simulated network delay
    pub fn with_delay(mode: MockMode, delay_ms: u64) -> Self {
        Self {
            mode,
            delay_ms,
            calls: Mutex::new(Vec::new()),
            attempts_per_chunk: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// All requests received so far, in arrival order
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of requests received so far
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Highest number of calls observed executing at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn record(&self, request: &CompletionRequest) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        let mut attempts = self
            .attempts_per_chunk
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let attempt = attempts.entry(request.chunk_index).or_insert(0);
        *attempt += 1;
        *attempt
    }

    /// Apply translation logic based on the mode
    fn apply(&self, request: &CompletionRequest, attempt: usize) -> Result<String, String> {
        let text = request.text.trim();
        match &self.mode {
            MockMode::Echo => Ok(text.to_string()),
            MockMode::Terminology => Ok(request
                .terminology
                .iter()
                .fold(text.to_string(), |acc, (term, translation)| {
                    acc.replace(term.as_str(), translation)
                })),
            MockMode::Suffix => Ok(format!("{}_{}", text, request.target_language)),
            MockMode::Mappings(map) => Ok(map
                .get(text)
                .cloned()
                .unwrap_or_else(|| text.to_string())),
            MockMode::AlwaysTransient(message) | MockMode::AlwaysPermanent(message) => {
                Err(message.clone())
            }
            MockMode::FailTimes(n) if attempt <= *n => {
                Err(format!("simulated failure {}/{}", attempt, n))
            }
            MockMode::FailTimes(_) => Ok(text.to_string()),
            MockMode::FailChunk(index) if request.chunk_index == *index => {
                Err(format!("simulated failure for chunk {}", index))
            }
            MockMode::FailChunk(_) => Ok(text.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let attempt = self.record(request);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let input_tokens = (estimate_tokens(&request.text)
            + estimate_tokens(&request.terminology_hints())
            + request.prior_context.iter().map(|c| estimate_tokens(c)).sum::<usize>())
            as u64;
        let outcome = self.apply(request, attempt);

        self.active.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(text) => {
                let usage = TokenUsage::new(input_tokens, estimate_tokens(&text) as u64);
                Ok(Completion { text, usage })
            }
            Err(message) => {
                let usage = Some(TokenUsage::new(input_tokens, 0));
                Err(match self.mode {
                    MockMode::AlwaysPermanent(_) => LlmError::Permanent { message, usage },
                    _ => LlmError::Transient { message, usage },
                })
            }
        }
    }

    fn provider_name(&self) -> &str {
        "Mock LLM"
    }
}
