use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use module_monitoring::{
    FetchQuery, Monitoring, Severity, StateNode,
    config::{MonitoringConfig, read_config_file},
    util::get_config_path,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "monitoring-ctl")]
#[command(about = "Inspect and feed a module's monitoring storage", long_about = None)]
struct Args {
    /// Config file (defaults to $MONITORING_CONFIG or ./monitoring.json)
    #[arg(short, long)]
    file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print stored events as JSON lines
    Fetch {
        /// Start of the time window (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// End of the time window (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(long, default_value = "")]
        machine: String,

        #[arg(long, default_value = "")]
        module: String,

        #[arg(long, default_value = "")]
        component: String,

        /// Start after (or before, with --backward) this event id
        #[arg(long)]
        page_id: Option<i64>,

        #[arg(long, default_value_t = 100)]
        page_size: usize,

        /// Page from the newest event towards the oldest
        #[arg(long)]
        backward: bool,

        /// Keep paging until the result set is exhausted
        #[arg(long)]
        all: bool,
    },

    /// Register one event and flush it
    Emit {
        /// Dotted component path below the module root
        #[arg(short, long, default_value = "")]
        component: String,

        /// Severity, e.g. "warning" or "error+email"
        #[arg(short, long, default_value = "info")]
        severity: Severity,

        title: String,

        #[arg(default_value = "")]
        description: String,
    },

    /// Print storage health and statistics
    Stats,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("module_monitoring", LevelFilter::DEBUG),
        ("monitoring_ctl", LevelFilter::TRACE),
        ("notification", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;
    let monitoring = Monitoring::from_config(&config).await?;

    match args.command {
        Command::Fetch {
            from,
            to,
            machine,
            module,
            component,
            page_id,
            page_size,
            backward,
            all,
        } => {
            let mut query = FetchQuery::new(
                from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                to.unwrap_or_else(Utc::now),
            )
            .machine(machine)
            .module(module)
            .component(component)
            .page_size(page_size);
            query.page_id = page_id;
            query.forward = !backward;

            fetch(&monitoring, query, all).await?;
        }
        Command::Emit {
            component,
            severity,
            title,
            description,
        } => {
            let node = resolve(&monitoring, &config, &component)?;
            let registration = node.register(severity, &title, &description)?;
            info!("{}: {:?}", node.component(), registration);
        }
        Command::Stats => {
            let health = monitoring.storage().health_check().await?;
            println!("healthy: {} ({})", health.healthy, health.message);
            println!("{}", monitoring.storage().get_stats().await?);
        }
    }

    monitoring.shutdown();
    Ok(())
}

async fn fetch(monitoring: &Monitoring, query: FetchQuery, all: bool) -> anyhow::Result<()> {
    let mut query = Some(query);
    while let Some(current) = query.take() {
        let page = monitoring.fetch(&current).await?;
        for event in &page {
            println!("{}", serde_json::to_string(event)?);
        }
        if all {
            query = current.next_page(&page);
        }
    }
    Ok(())
}

/// Find or create the node for a dotted path below the root
fn resolve(
    monitoring: &Monitoring,
    config: &MonitoringConfig,
    path: &str,
) -> anyhow::Result<StateNode> {
    let mut node = monitoring.root().clone();
    let relative = path
        .strip_prefix(config.module.as_str())
        .map(|rest| rest.trim_start_matches('.'))
        .unwrap_or(path);

    for name in relative.split('.').filter(|name| !name.is_empty()) {
        node = match node.child(name) {
            Some(child) => child,
            None => node.attach_component(name, None)?,
        };
    }
    Ok(node)
}
