use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use interfaces::defs::{AccountMode, GenerationService, NewAccount, TaskDispatcher};
use interfaces::empty::UnavailableGenerator;
use interfaces::state::Store;
use reddit_harvester::automation::reddit::RedditAutomationFactory;
use reddit_harvester::{
    AdapterCache, ApprovalWorkflow, ChannelDispatcher, ClassificationWorker, DraftComposer, Fetcher,
    HarvesterConfig, HttpGenerationService, PgStore, ProgressHub, RelevanceClassifier, ScrapeCycleEngine,
};
use session_vault::{CredentialVault, PgSessionStore, SessionManager};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "reddit-harvester", about = "Harvests posts, drafts replies and publishes approved ones")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database tables
    InitDb,
    /// Register an account
    AddAccount {
        #[arg(long)]
        username: String,
        #[arg(long)]
        secret: String,
        #[arg(long, default_value = "SCRAPE")]
        mode: String,
        #[arg(long)]
        persona: Option<String>,
    },
    /// Add a keyword to an account
    AddKeyword {
        account_id: Uuid,
        base_term: String,
        #[arg(long = "variant")]
        variants: Vec<String>,
    },
    /// Run scrape cycles and the classification worker until Ctrl-C
    Run {
        /// Only this account instead of every active harvesting account
        #[arg(long)]
        account: Option<Uuid>,
    },
    /// List accounts and drafts awaiting approval
    Status,
    /// Approve a draft, optionally publishing it
    Approve {
        draft_id: Uuid,
        #[arg(long)]
        publish: bool,
    },
    Reject {
        draft_id: Uuid,
    },
    /// Classify every pending item again
    Reprocess,
    Stats,
}

fn redact(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => database_url.to_string(),
    }
}

struct App {
    config: HarvesterConfig,
    store: Arc<PgStore>,
    sessions: Arc<SessionManager>,
    session_store: PgSessionStore,
}

impl App {
    async fn connect(config: HarvesterConfig) -> anyhow::Result<Self> {
        info!("Connecting to database: {}", redact(&config.database_url));
        let store = PgStore::new(&config.database_url).await.map_err(|e| {
            error!("Failed to connect to database. Make sure PostgreSQL is running");
            e
        })?;
        let session_store = PgSessionStore::from_pool(store.pool());
        let vault = CredentialVault::from_env().context("loading session encryption key")?;
        let sessions = Arc::new(SessionManager::new(Arc::new(session_store.clone()), Arc::new(vault)));
        Ok(Self {
            config,
            store: Arc::new(store),
            sessions,
            session_store,
        })
    }

    fn adapters(&self) -> anyhow::Result<Arc<AdapterCache>> {
        let fetcher = Arc::new(Fetcher::new(self.config.fetch.clone())?);
        let factory = RedditAutomationFactory::new(fetcher, self.config.browser.clone());
        Ok(Arc::new(AdapterCache::new(Arc::new(factory))))
    }

    fn worker(&self, dispatcher: Arc<dyn TaskDispatcher>) -> ClassificationWorker {
        let generator: Arc<dyn GenerationService> = match &self.config.draft.generation_service_url {
            Some(url) => Arc::new(HttpGenerationService::new(url, self.config.draft.generation_timeout)),
            None => {
                info!("No generation service configured, drafts use fallback replies");
                Arc::new(UnavailableGenerator)
            }
        };
        ClassificationWorker::new(
            self.store.clone(),
            RelevanceClassifier::new(self.config.classifier.clone()),
            DraftComposer::new(generator, self.config.draft.clone()),
            dispatcher,
        )
    }

    fn approvals(&self) -> anyhow::Result<ApprovalWorkflow> {
        Ok(ApprovalWorkflow::new(
            self.store.clone(),
            self.sessions.clone(),
            self.adapters()?,
            self.config.cycle.session_ttl_hours,
        ))
    }
}

async fn run(app: &App, only: Option<Uuid>) -> anyhow::Result<()> {
    let (dispatcher, tasks) = ChannelDispatcher::new();
    let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(dispatcher);
    let worker = Arc::new(app.worker(dispatcher.clone()));
    let worker_task = tokio::spawn(worker.run(tasks));

    let progress = ProgressHub::new();
    let mut subscription = progress.subscribe(None);
    let progress_task = tokio::spawn(async move {
        while let Some(event) = subscription.events.recv().await {
            info!(
                account_id = %event.account_id,
                "{}: {} new item(s), {}s remaining",
                event.status.as_str(),
                event.items_found,
                event.time_remaining_ms / 1000
            );
        }
    });

    let engine = ScrapeCycleEngine::new(
        app.store.clone(),
        app.sessions.clone(),
        app.adapters()?,
        dispatcher,
        Arc::new(progress.clone()),
        app.config.cycle.clone(),
    );

    let accounts = app.store.list_accounts().await?;
    let mut started = 0;
    for account in accounts {
        if only.is_some_and(|id| id != account.id) {
            continue;
        }
        if !account.is_active() || !account.mode.can_harvest() {
            continue;
        }
        match engine.start(account.id).await {
            Ok(()) => started += 1,
            Err(e) => error!(account_id = %account.id, "Could not start scrape cycle: {}", e),
        }
    }
    if started == 0 {
        warn!("No scrape cycles running");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    engine.stop_all().await;
    drop(engine);
    progress_task.abort();
    worker_task.abort();
    Ok(())
}

async fn reprocess(app: &App) -> anyhow::Result<()> {
    let (dispatcher, mut tasks) = ChannelDispatcher::new();
    let worker = app.worker(Arc::new(dispatcher));
    let queued = worker.reprocess_pending().await?;

    let mut drafted = 0;
    while let Ok(task) = tasks.try_recv() {
        match worker.handle(&task).await {
            Ok(Some(outcome)) if outcome.draft_id.is_some() => drafted += 1,
            Ok(_) => {}
            Err(e) => warn!("Reprocessing {} failed: {}", task.name, e),
        }
    }
    info!("Reprocessed {} item(s), {} new draft(s)", queued, drafted);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let app = App::connect(HarvesterConfig::from_env()).await?;

    match cli.command {
        Command::InitDb => {
            app.store.setup_schema().await?;
            app.session_store.setup_schema().await?;
        }
        Command::AddAccount {
            username,
            secret,
            mode,
            persona,
        } => {
            let Some(mode) = AccountMode::parse(&mode.to_uppercase()) else {
                bail!("unknown mode {:?}, expected SCRAPE, POST or BOTH", mode);
            };
            let account = app
                .store
                .create_account(NewAccount {
                    username,
                    secret,
                    mode,
                    persona_prompt: persona,
                })
                .await?;
            info!(account_id = %account.id, "Account {} created", account.username);
        }
        Command::AddKeyword {
            account_id,
            base_term,
            variants,
        } => {
            let keyword = app.store.create_keyword(account_id, &base_term, variants).await?;
            info!("Keyword {} added with variants {:?}", keyword.base_term, keyword.variants);
        }
        Command::Run { account } => run(&app, account).await?,
        Command::Status => {
            for account in app.store.list_accounts().await? {
                info!(
                    account_id = %account.id,
                    "{} [{} {}] last active {}",
                    account.username,
                    account.mode.as_str(),
                    account.status.as_str(),
                    account
                        .last_active_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
            for draft in app.store.list_drafts(Some(false)).await? {
                info!(draft_id = %draft.id, content_id = %draft.content_id, "Awaiting approval: {}", draft.text);
            }
        }
        Command::Approve { draft_id, publish } => {
            let outcome = app.approvals()?.approve_and_publish(draft_id, publish).await?;
            info!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Reject { draft_id } => {
            app.approvals()?.reject(draft_id).await?;
        }
        Command::Reprocess => reprocess(&app).await?,
        Command::Stats => {
            let stats = app.store.stats().await?;
            info!("Accounts: {} ({} active)", stats.accounts, stats.active_accounts);
            info!("Content items: {}", stats.content_items);
            info!("Drafts awaiting approval: {}", stats.unapproved_drafts);
        }
    }

    Ok(())
}
