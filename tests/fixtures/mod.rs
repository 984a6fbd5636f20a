//! AI service responses as they arrive on the wire.
#![allow(dead_code)]

use site_inspect_queue::models::analysis::AnalysisResponse;

/// Two violations: one cites a known code in different case, one cites nothing.
pub const TWO_VIOLATIONS: &str = r#"{
    "violations": [
        {
            "description": "Worker on scaffold without fall protection",
            "safety_code": "osha 1926.501(b)(1)",
            "severity": "high",
            "confidence": 0.85,
            "location": "North elevation, level 3"
        },
        {
            "description": "Extension cord run through standing water",
            "severity": "Critical",
            "confidence": 0.6234
        }
    ],
    "tokens_used": 1840,
    "analysis_details": "Two hazards identified"
}"#;

/// A single violation citing a code the catalogue does not contain.
pub const UNKNOWN_CODE: &str = r#"{
    "violations": [
        {
            "description": "Missing toe board on platform",
            "safety_code": "EN 12811-1",
            "severity": "moderate",
            "confidence": 1.7,
            "location": "  "
        }
    ],
    "tokens_used": 910
}"#;

/// Three violations; tests reject one of them at insert time.
pub const THREE_VIOLATIONS: &str = r#"{
    "violations": [
        { "description": "Missing guardrail", "severity": "high", "confidence": 0.9 },
        { "description": "Unsecured ladder", "severity": "medium", "confidence": 0.7 },
        { "description": "No hard hat", "severity": "low", "confidence": 0.95 }
    ],
    "tokens_used": 2200
}"#;

pub const CLEAN_PHOTO: &str = r#"{ "violations": [], "tokens_used": 400 }"#;

pub fn response(raw: &str) -> AnalysisResponse {
    serde_json::from_str(raw).expect("fixture parses")
}

/// The same finding reported twice, with no code or location to tell them apart.
pub const REPEATED_FINDING: &str = r#"{
    "violations": [
        { "description": "Worker without hard hat", "severity": "high", "confidence": 0.9 },
        { "description": "Worker without hard hat", "severity": "high", "confidence": 0.9 }
    ],
    "tokens_used": 610
}"#;
