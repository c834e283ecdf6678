// SPDX-License-Identifier: MPL-2.0

//! Core types for classification results

use std::fmt;

/// One recognised label
///
/// Produced once per classification cycle and superseded by the next one; no
/// history is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Label text as it appears in the label list
    pub label: String,
    /// Score in `0.0..=1.0`
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// Label with its first character upper-cased, for display
    pub fn display_label(&self) -> String {
        capitalize_first(&self.label)
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:4.2}", self.label, self.confidence)
    }
}

/// Upper-case the first character, leaving the rest untouched
pub fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Render results one per line as `label: 0.87`
pub fn format_results(results: &[ClassificationResult]) -> String {
    results
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
