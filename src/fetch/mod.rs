//! Outbound fetching: HTTP client, politeness gate and page rendering.

pub mod http;
pub mod politeness;
pub mod renderer;

pub use http::{validate_url, FetchResponse, HttpFetcher};
pub use politeness::{
    PolitenessDecision, PolitenessGate, RobotsRules, ROBOTS_BLOCKED_MESSAGE,
    ROBOTS_TAG_BLOCKED_MESSAGE,
};
pub use renderer::{HttpPageRenderer, PageRenderer, RenderedPage};
