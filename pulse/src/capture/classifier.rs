//! HTTP request classification
//!
//! Deterministic function of (method, URI) that labels an HTTP-shaped event
//! as a genuine user interaction with the API or background housekeeping
//! (health checks, CORS preflights, connection probes). The kernel never
//! classifies; it only parses. The two outcomes are mutually exclusive by
//! construction: everything that is not a user-interaction rule match falls
//! through to background.

use serde::Serialize;

/// Request URIs whose GETs are part of an interactive conversation rather
/// than polling. Everything else fetched with GET is treated as background.
const INTERACTIVE_GET_URIS: [&str; 2] = ["/v1/messages", "/v1/conversation"];

/// Classification outcome for an HTTP request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestClass {
    /// The user is actively driving the CLI (prompt submissions, edits,
    /// conversation retrieval).
    #[serde(rename = "user_interaction")]
    UserInteraction,
    /// Automated housekeeping traffic (health checks, preflights, probes)
    /// and anything not positively identified as user-driven.
    #[serde(rename = "background_operation")]
    Background,
}

impl RequestClass {
    #[must_use]
    pub fn is_user_interaction(self) -> bool {
        self == Self::UserInteraction
    }

    #[must_use]
    pub fn is_background(self) -> bool {
        self == Self::Background
    }
}

/// Classify an HTTP request by method and URI.
///
/// Rules, first match wins:
/// - `POST`, `PUT`, `PATCH` to any URI are user interactions: mutating
///   requests from an interactive CLI are user-driven.
/// - `GET` to an interactive-conversation URI is a user interaction.
/// - Everything else (`OPTIONS`, `HEAD`, `GET` on health/status paths,
///   unknown methods) is background. Background is the safe default: an
///   unrecognized request must never inflate user-activity tracking.
#[must_use]
pub fn classify(method: &str, uri: &str) -> RequestClass {
    match method {
        "POST" | "PUT" | "PATCH" => RequestClass::UserInteraction,
        "GET" if INTERACTIVE_GET_URIS.contains(&uri) => RequestClass::UserInteraction,
        _ => RequestClass::Background,
    }
}
