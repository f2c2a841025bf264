//! Semantic description collaborator boundary.
//!
//! Describers turn a frame plus its detection set into a short text
//! description for the persisted event. The call is the slowest suspension
//! point in the processing loop, so the orchestrator imposes a per-call
//! timeout; implementations must honor it. A timeout or failure costs the
//! description on that event, never the event itself.

use std::time::Duration;

use anyhow::Result;

use crate::detect::Detection;
use crate::frame::Frame;

pub trait Describer: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Produce a description, returning within `timeout`.
    fn describe(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        timeout: Duration,
    ) -> Result<String>;
}

/// Template describer used by tests and hosts without a language model.
pub struct StubDescriber;

impl Describer for StubDescriber {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn describe(
        &mut self,
        _frame: &Frame,
        detections: &[Detection],
        _timeout: Duration,
    ) -> Result<String> {
        let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
        Ok(format!("observed: {}", labels.join(", ")))
    }
}

#[cfg(feature = "describe-ollama")]
pub use ollama::OllamaDescriber;

#[cfg(feature = "describe-ollama")]
mod ollama {
    use super::*;

    /// Describer backed by a local Ollama HTTP endpoint.
    ///
    /// The request carries only the detection labels, not frame pixels;
    /// the model is asked for a one-line summary of the detected entities.
    pub struct OllamaDescriber {
        endpoint: String,
        model: String,
    }

    impl OllamaDescriber {
        pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
            Self {
                endpoint: endpoint.into(),
                model: model.into(),
            }
        }
    }

    impl Describer for OllamaDescriber {
        fn name(&self) -> &'static str {
            "ollama"
        }

        fn describe(
            &mut self,
            _frame: &Frame,
            detections: &[Detection],
            timeout: Duration,
        ) -> Result<String> {
            let labels: Vec<&str> = detections.iter().map(|d| d.label.as_str()).collect();
            let prompt = format!(
                "Describe in one short sentence a camera scene containing: {}",
                labels.join(", ")
            );

            let response: serde_json::Value = ureq::post(&format!("{}/api/generate", self.endpoint))
                .timeout(timeout)
                .send_json(serde_json::json!({
                    "model": self.model,
                    "prompt": prompt,
                    "stream": false,
                }))?
                .into_json()?;

            response["response"]
                .as_str()
                .map(|text| text.trim().to_string())
                .ok_or_else(|| anyhow::anyhow!("ollama response missing text field"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::solid_frame;

    #[test]
    fn stub_describer_lists_labels() {
        let mut describer = StubDescriber;
        let frame = solid_frame(1, 4, 4, 0);
        let detections = vec![
            Detection::new("person", 0.9, [0.0; 4]),
            Detection::new("dog", 0.5, [0.0; 4]),
        ];
        let text = describer
            .describe(&frame, &detections, Duration::from_secs(1))
            .unwrap();
        assert_eq!(text, "observed: person, dog");
    }
}
