use clap::{ArgAction, Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use folio_cache::{BlobCache, MemoryBlobStore};
use folio_config::Config;
use folio_fetch::Url;
use folio_fetch::fetcher::{HttpFetcher, HttpOptions};
use folio_preload::{PageState, PageTicket, PreloadOptions, Preloader, preload_window};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("not a page URL: {_0}")]
    Usage(#[error(not(source))] String),
    #[display("could not start the preloader")]
    Setup,
}

#[derive(Parser)]
#[command(name = "folio", version, about = "Prefetch and cache page images")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging; repeat for more (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch pages into the cache and report how each one ended.
    Preload {
        /// Priority of the first page; each following page is one step less
        /// urgent. Lower is more urgent.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,

        /// Route every request through this image proxy.
        #[arg(long)]
        proxy: Option<String>,

        /// Fetches in flight at once (overrides the configuration).
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Treat the URLs as one chapter and preload only the reading window
        /// starting at this page index (`preload.lookahead` pages ahead).
        #[arg(long, conflicts_with = "priority")]
        current: Option<usize>,

        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Preload { priority, proxy, concurrency, current, urls } => {
            if proxy.is_some() {
                config.fetch.proxy = proxy;
            }
            if let Some(concurrency) = concurrency {
                config.fetch.concurrency = concurrency;
            }
            config.validate().or_raise(|| ErrorKind::Config)?;
            let urls = urls
                .iter()
                .map(|url| folio_fetch::validate_url(url).or_raise(|| ErrorKind::Usage(url.clone())))
                .collect::<Result<Vec<Url>>>()?;
            let request = match current {
                Some(current) => Request::Window { current, lookahead: config.preload.lookahead },
                None => Request::All { priority },
            };
            preload(&config, urls, request).await
        },
    }
}

/// Which pages of the command line to request, and how urgently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Request {
    All { priority: i64 },
    Window { current: usize, lookahead: usize },
}

fn request(preloader: &Preloader, urls: Vec<Url>, request: Request) -> Vec<PageTicket> {
    match request {
        Request::All { priority } => preloader.preload(urls, priority),
        Request::Window { current, lookahead } => preload_window(preloader, &urls, current, lookahead),
    }
}

async fn preload(config: &Config, urls: Vec<Url>, plan: Request) -> Result<ExitCode> {
    let options = HttpOptions {
        proxy: config.fetch.proxy_url().or_raise(|| ErrorKind::Config)?,
        // The preloader enforces the per-page timeout.
        timeout: None,
        user_agent: config.fetch.user_agent.clone(),
    };
    let fetcher = HttpFetcher::new("http", options).or_raise(|| ErrorKind::Setup)?;
    let store = Arc::new(MemoryBlobStore::default());
    let capacity = config.cache.capacity().or_raise(|| ErrorKind::Config)?;
    let cache = Arc::new(BlobCache::new(store.clone(), capacity).or_raise(|| ErrorKind::Setup)?);
    let preloader = Preloader::new(
        Arc::new(fetcher),
        Arc::clone(&cache),
        PreloadOptions { concurrency: config.fetch.concurrency, fetch_timeout: config.fetch.timeout() },
    )
    .or_raise(|| ErrorKind::Setup)?;

    let tickets = request(&preloader, urls, plan);
    tracing::info!(pages = tickets.len(), concurrency = preloader.concurrency(), "Preloading");
    let outcomes = futures::future::join_all(tickets.into_iter().map(settle)).await;

    let mut failed = 0usize;
    for (ticket, state) in &outcomes {
        match state {
            PageState::Cached(handle) => println!("cached     {}  {handle} ({} bytes)", ticket.url(), handle.size()),
            PageState::Failed(err) => {
                failed += 1;
                let kind: &folio_preload::error::ErrorKind = err;
                println!("failed     {}  {kind}", ticket.url());
            },
            PageState::Cancelled => println!("cancelled  {}", ticket.url()),
            PageState::Queued | PageState::Fetching => println!("unfinished {}", ticket.url()),
        }
    }

    let stats = cache.stats();
    println!(
        "cache: {} entries, {}/{} used ({}), {} evictions, {} bytes live",
        stats.entries,
        stats.used,
        stats.capacity,
        cache.capacity(),
        stats.evictions,
        store.live_bytes(),
    );
    Ok(if failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn settle(mut ticket: PageTicket) -> (PageTicket, PageState) {
    let state = ticket.wait().await;
    (ticket, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_fetch::FetcherHandle;
    use folio_fetch::fetcher::MockFetcher;

    fn chapter(count: usize) -> Vec<Url> {
        (0..count).map(|n| Url::parse(&format!("https://cdn.example/ch3/{n:03}.webp")).unwrap()).collect()
    }

    fn preloader(pages: &[Url]) -> (Arc<MockFetcher>, Preloader) {
        let fetcher = Arc::new(MockFetcher::with_pages(pages.iter().map(|url| (url.to_string(), &b"webp"[..]))));
        let cache = Arc::new(BlobCache::new(Arc::new(MemoryBlobStore::default()), folio_cache::Capacity::Entries(16)).unwrap());
        let handle: FetcherHandle = fetcher.clone();
        let preloader = Preloader::new(handle, cache, PreloadOptions { concurrency: 2, fetch_timeout: None }).unwrap();
        (fetcher, preloader)
    }

    #[test]
    fn test_current_selects_window() {
        let cli = Cli::try_parse_from(["folio", "preload", "--current", "2", "https://cdn.example/1.jpg"]).unwrap();
        let Command::Preload { current, .. } = cli.command;
        assert_eq!(current, Some(2));
        assert!(Cli::try_parse_from(["folio", "preload", "--current", "2", "--priority", "1", "https://a.test/1.jpg"]).is_err());
    }

    #[tokio::test]
    async fn test_window_request_uses_lookahead() {
        let pages = chapter(8);
        let (fetcher, preloader) = preloader(&pages);
        let mut tickets = request(&preloader, pages.clone(), Request::Window { current: 2, lookahead: 3 });
        assert_eq!(tickets.len(), 4);
        for ticket in &mut tickets {
            assert!(ticket.wait().await.handle().is_some());
        }
        let mut fetched = fetcher.calls();
        fetched.sort();
        assert_eq!(fetched, pages[2..=5]);
    }

    #[tokio::test]
    async fn test_all_request_fetches_every_url() {
        let pages = chapter(3);
        let (fetcher, preloader) = preloader(&pages);
        for mut ticket in request(&preloader, pages.clone(), Request::All { priority: 0 }) {
            assert!(ticket.wait().await.handle().is_some());
        }
        assert_eq!(fetcher.calls().len(), 3);
    }
}
