//! PII & data leakage scanner
//!
//! Runs an ordered set of detectors over every free-text field of a trace.
//! Detection is pure: the same input always yields the same result.

use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::{PiiFinding, PiiScanResult, PiiSeverity, RiskLevel, Trace};

const MAX_SAMPLES: usize = 2;
const SAMPLE_PREFIX_CHARS: usize = 4;

/// A single PII detector.
pub struct PiiDetector {
    pub name: &'static str,
    /// Marker used by [`redact`], rendered as `[<MARKER>_REDACTED]`.
    pub marker: &'static str,
    pub severity: PiiSeverity,
    pub pattern: Regex,
}

impl PiiDetector {
    fn new(name: &'static str, marker: &'static str, severity: PiiSeverity, pattern: &str) -> Self {
        Self {
            name,
            marker,
            severity,
            pattern: Regex::new(pattern).unwrap(),
        }
    }
}

// Order matters: findings are reported in detector order.
static DETECTORS: Lazy<Vec<PiiDetector>> = Lazy::new(|| {
    vec![
        PiiDetector::new("SSN", "SSN", PiiSeverity::Critical, r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b"),
        PiiDetector::new("Aadhaar", "AADHAAR", PiiSeverity::Critical, r"\b[0-9]{4}\s?[0-9]{4}\s?[0-9]{4}\b"),
        PiiDetector::new("PAN (India)", "PAN", PiiSeverity::Critical, r"\b[A-Z]{5}[0-9]{4}[A-Z]\b"),
        PiiDetector::new(
            "Credit Card",
            "CREDIT_CARD",
            PiiSeverity::Critical,
            r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13})\b",
        ),
        PiiDetector::new(
            "Email",
            "EMAIL",
            PiiSeverity::High,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b",
        ),
        PiiDetector::new(
            "Phone (US)",
            "PHONE",
            PiiSeverity::High,
            r"\b(?:\+1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b",
        ),
        PiiDetector::new("Phone (India)", "PHONE", PiiSeverity::High, r"\b(?:\+91[-.\s]?)?[6-9][0-9]{9}\b"),
        PiiDetector::new(
            "DOB Pattern",
            "DOB",
            PiiSeverity::High,
            r"(?i)\b(?:dob|date of birth|birth date)\s*[:=]?\s*[0-9]{1,2}[/-][0-9]{1,2}[/-][0-9]{2,4}\b",
        ),
        PiiDetector::new(
            "Policy Number",
            "POLICY_NUMBER",
            PiiSeverity::Medium,
            r"(?i)\b(?:policy|pol)[-_#\s]?[0-9]{6,12}\b",
        ),
        PiiDetector::new(
            "Medical ID",
            "MEDICAL_ID",
            PiiSeverity::High,
            r"(?i)\b(?:MRN|medical record|patient id)\s*[:=]?\s*[A-Z0-9]{6,12}\b",
        ),
        PiiDetector::new(
            "IP Address",
            "IP_ADDRESS",
            PiiSeverity::Medium,
            r"\b(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
        ),
    ]
});

/// The detectors in evaluation order.
pub fn detectors() -> &'static [PiiDetector] {
    &DETECTORS
}

fn mask(sample: &str) -> String {
    let prefix: String = sample.chars().take(SAMPLE_PREFIX_CHARS).collect();
    format!("{}***", prefix)
}

/// Scan one block of text.
pub fn scan_text(text: &str) -> PiiScanResult {
    let mut findings = Vec::new();

    for detector in DETECTORS.iter() {
        let matches: Vec<&str> = detector.pattern.find_iter(text).map(|m| m.as_str()).collect();
        if matches.is_empty() {
            continue;
        }
        findings.push(PiiFinding {
            pii_type: detector.name.to_string(),
            count: matches.len(),
            severity: detector.severity,
            samples: matches.iter().take(MAX_SAMPLES).map(|m| mask(m)).collect(),
        });
    }

    let risk_level = findings
        .iter()
        .map(|f| RiskLevel::from(f.severity))
        .max()
        .unwrap_or(RiskLevel::None);
    let total_exposures = findings.iter().map(|f| f.count).sum();

    PiiScanResult {
        clean: findings.is_empty(),
        findings,
        risk_level,
        total_exposures,
        scanned_fields: usize::from(!text.is_empty()),
        scanned_chars: text.chars().count(),
    }
}

/// Collect the free-text fields of a trace in scan order: input payload,
/// output payload, reasoning, then each LLM call's response and prompt.
fn trace_texts(trace: &Trace) -> Vec<String> {
    let mut texts = Vec::new();

    if !trace.input.is_absent() {
        if let Ok(json) = serde_json::to_string(&trace.input) {
            texts.push(json);
        }
    }
    if !trace.output.is_absent() {
        if let Ok(json) = serde_json::to_string(&trace.output) {
            texts.push(json);
        }
    }
    if let Some(reasoning) = trace.reasoning.as_deref().filter(|r| !r.is_empty()) {
        texts.push(reasoning.to_string());
    }
    for call in &trace.llm_calls {
        if let Some(response) = call.response_text.as_deref().filter(|r| !r.is_empty()) {
            texts.push(response.to_string());
        }
        if let Some(prompt) = call.prompt_text.as_deref().filter(|p| !p.is_empty()) {
            texts.push(prompt.to_string());
        }
    }
    texts
}

/// Scan every free-text field of `trace` as one newline-joined buffer.
pub fn scan_trace(trace: &Trace) -> PiiScanResult {
    let texts = trace_texts(trace);
    let combined = texts.join("\n");
    let mut result = scan_text(&combined);
    result.scanned_fields = texts.len();
    result
}

/// Replace every detected span with a `[<MARKER>_REDACTED]` tag.
pub fn redact(text: &str) -> String {
    DETECTORS.iter().fold(text.to_string(), |acc, detector| {
        let replacement = format!("[{}_REDACTED]", detector.marker);
        detector
            .pattern
            .replace_all(&acc, regex::NoExpand(&replacement))
            .into_owned()
    })
}
