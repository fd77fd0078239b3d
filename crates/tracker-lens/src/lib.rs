//! Tracker Lens — rule-driven extraction of search results and account data
//! from tracker sites.

pub mod aggregator;
pub mod category;
pub mod document;
pub mod engine;
pub mod extractor;
pub mod filters;
pub mod list;
pub mod registry;
pub mod request;
pub mod resilience;
pub mod rule;
pub mod site;
pub mod state;
pub mod transport;
pub mod types;

pub use category::{CategoryFacet, CrossMode, Selection};
pub use document::{Document, DocumentKind, Location, Node};
pub use engine::{Engine, SiteResult};
pub use extractor::{extract, extract_field};
pub use filters::Filter;
pub use registry::SiteRegistry;
pub use request::{compose, SearchQuery};
pub use rule::ExtractionRule;
pub use site::{Site, SiteDefinition, SiteHooks};
pub use transport::{
    BypassToken, BypassTokenProvider, HttpRequest, HttpResponse, ReqwestTransport, Transport,
    TransportConfig,
};
pub use types::*;
