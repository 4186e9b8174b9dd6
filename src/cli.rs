//! The `fincache` command: aggregate statistics for movements stored in JSON files, through the cache.

use crate::config::CacheConfig;
use crate::domain::FinanceCache;
use crate::memory::MemorySource;
use crate::stats::StatisticsResult;
use crate::stats::StatsPeriod;
use crate::types::Category;
use crate::types::Movement;
use crate::types::Scope;
use anyhow::bail;
use anyhow::Context;
use chrono::NaiveDate;
use chrono::Utc;
use fieldx::fxstruct;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, clap::Parser)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, author, name = "fincache")]
pub struct Cli {
    /// JSON array of movements.
    #[fieldx(get(clone))]
    #[clap(long, short, env = "FINCACHE_MOVEMENTS")]
    movements: PathBuf,

    /// JSON array of categories.
    #[fieldx(get(clone))]
    #[clap(long, short, env = "FINCACHE_CATEGORIES")]
    categories: Option<PathBuf>,

    #[fieldx(get(clone))]
    #[clap(long, short, env = "FINCACHE_USER", default_value = "local")]
    user: String,

    /// Shared household the movements belong to.
    #[fieldx(get(clone))]
    #[clap(long, env = "FINCACHE_CONTEXT")]
    context: Option<String>,

    /// Length of the statistics window: 6 or 12.
    #[clap(long, env = "FINCACHE_MONTHS", default_value_t = 6)]
    months: u32,

    /// Last month of the window, as any date inside it. Defaults to today.
    #[clap(long, short, env = "FINCACHE_REFERENCE")]
    reference: Option<NaiveDate>,

    /// Print the result as JSON.
    #[clap(long, env = "FINCACHE_JSON", default_value_t = false)]
    json: bool,
}

impl Cli {
    pub fn scope(&self) -> Scope {
        match self.context() {
            Some(context) => Scope::shared(self.user(), context),
            None => Scope::personal(self.user()),
        }
    }

    pub fn period(&self) -> anyhow::Result<StatsPeriod> {
        match StatsPeriod::from_months(self.months()) {
            Some(period) => Ok(period),
            None => bail!("--months must be 6 or 12, got {}", self.months()),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn setup_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    info!("Tracing initialized");
    Ok(())
}

pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    setup_tracing()?;

    let scope = cli.scope();
    let period = cli.period()?;
    let reference = cli.reference().unwrap_or_else(|| Utc::now().date_naive());

    let source = MemorySource::new();
    source.set_movements(&scope, read_json::<Vec<Movement>>(&cli.movements())?);
    if let Some(path) = cli.categories() {
        source.set_categories(&scope, read_json::<Vec<Category>>(&path)?);
    }

    let cache = FinanceCache::new(Arc::new(source), CacheConfig::default())?;

    let stats = cache.statistics(&scope, period, reference).await?;
    // Same question again; answered from the cache.
    let again = cache.statistics(&scope, period, reference).await?;
    debug_assert_eq!(stats, again);

    if cli.json() {
        println!("{}", serde_json::to_string_pretty(stats.as_ref())?);
    }
    else {
        print_report(&stats);
    }

    let insights = cache.performance_insights();
    info!(
        "{} calls, {} served from cache ({:.0}%), average fetch {:.2}ms",
        insights.total_calls,
        insights.cache_hits,
        insights.hit_rate * 100.0,
        insights.average_fetch_ms
    );

    cache.close().await;
    Ok(())
}

fn print_report(stats: &StatisticsResult) {
    let totals = &stats.detailed_stats;
    println!("Income:          {:>12}", totals.total_income);
    println!("Expenses:        {:>12}", totals.total_expenses);
    println!("Balance:         {:>12}", totals.balance);
    println!("Monthly average: {:>12}", totals.average_monthly);

    println!();
    for month in &stats.monthly_comparison {
        println!(
            "{:<10} {:>12} {:>12} {:>12}",
            month.label, month.income, month.expenses, month.balance
        );
    }

    if !stats.category_stats.is_empty() {
        println!();
        for bucket in &stats.category_stats {
            println!("{:<24} {:>12}  {}", bucket.name, bucket.value, bucket.color);
        }
    }
}
