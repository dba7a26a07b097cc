pub mod types;
pub mod fetcher;
pub mod parser;
pub mod automation;
pub mod registry;
pub mod progress;
pub mod classifier;
pub mod drafting;
pub mod dispatcher;
pub mod scrape_cycle;
pub mod approval;
pub mod store;

pub use types::*;
pub use fetcher::Fetcher;
pub use parser::ListingParser;
pub use automation::{AccountAutomation, AdapterCache, AutomationFactory, PublishFailure, PublishReport, RedditAutomation};
pub use registry::{AccountRegistry, Cancellable};
pub use progress::{ProgressHub, Subscription};
pub use classifier::{Classification, RelevanceClassifier};
pub use drafting::{DraftComposer, HttpGenerationService};
pub use dispatcher::{ChannelDispatcher, ClassificationWorker};
pub use scrape_cycle::{CycleStatus, ScrapeCycleEngine};
pub use approval::{ApprovalOutcome, ApprovalWorkflow};
pub use store::PgStore;
