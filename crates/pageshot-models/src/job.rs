//! One-shot capture requests and their results.

use serde::{Deserialize, Serialize};

use crate::render::{ImageFormat, RenderOptions};

/// A single capture request: one page visit producing one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureJob {
    pub url: String,
    /// Attempt to dismiss cookie/consent overlays before capturing.
    #[serde(default = "default_true")]
    pub dismiss_consent: bool,
    #[serde(default)]
    pub options: RenderOptions,
}

fn default_true() -> bool {
    true
}

impl CaptureJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dismiss_consent: true,
            options: RenderOptions::default(),
        }
    }

    pub fn with_options(url: impl Into<String>, options: RenderOptions) -> Self {
        Self {
            url: url.into(),
            dismiss_consent: true,
            options,
        }
    }
}

/// Encoded image bytes produced by a capture.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl CaptureOutput {
    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_dismissal_defaults_on() {
        let job: CaptureJob = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert!(job.dismiss_consent);
        assert_eq!(job.options, RenderOptions::default());
    }

    #[test]
    fn test_consent_dismissal_can_be_disabled() {
        let job: CaptureJob =
            serde_json::from_str(r#"{"url":"https://example.com","dismiss_consent":false}"#)
                .unwrap();
        assert!(!job.dismiss_consent);
    }
}
