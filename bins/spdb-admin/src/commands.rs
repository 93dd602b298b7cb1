//! Subcommands and their handlers.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use spdb_client::{ClientConfig, Destination, DsUrlResolver, SpdbClient, UrlResolver};
use spdb_types::{format_unix, parse_unix, Compression, PutMode, UniqueMode};

use crate::output::{chunk_rows, render_chunks, render_value, table, OutputFormat};

const LOCAL_URL_REJECTED: &str = "local stores are in-process only; use spdbp:://host::dir";

/// A local store would live and die with this process, so only remote URLs
/// are accepted.
fn require_remote(url: &str) -> anyhow::Result<()> {
    match DsUrlResolver::default().resolve(url)? {
        Destination::Local { .. } => bail!("{url}: {LOCAL_URL_REJECTED}"),
        Destination::Remote { .. } => Ok(()),
    }
}

fn parse_time(s: &str) -> Result<i64, String> {
    parse_unix(s).ok_or_else(|| {
        format!("cannot parse time {s:?}: use unix seconds or YYYY-MM-DD HH:MM:SS")
    })
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Put one chunk.
    Put(PutArgs),

    /// Fetch chunks with one of the query modes.
    Get(GetArgs),

    /// Show the first, last and last valid times of a store.
    Times(TimesArgs),

    /// List valid times in a range, thinned by a minimum interval.
    TimeList(TimeListArgs),

    /// Erase the chunks at one valid time.
    Erase(EraseArgs),
}

#[derive(Debug, Args)]
pub struct PutArgs {
    #[arg(long)]
    pub url: String,

    #[arg(long, default_value_t = 0)]
    pub prod_id: i32,

    #[arg(long, default_value = "")]
    pub label: String,

    #[arg(long, default_value_t = 0)]
    pub data_type: i32,

    #[arg(long, default_value_t = 0)]
    pub data_type2: i32,

    #[arg(long, value_parser = parse_time)]
    pub valid: i64,

    /// Defaults to `valid + lifetime`.
    #[arg(long, value_parser = parse_time)]
    pub expire: Option<i64>,

    /// Seconds.
    #[arg(long, default_value_t = 3600)]
    pub lifetime: i64,

    /// overwrite, add, once or add_unique.
    #[arg(long, default_value = "overwrite")]
    pub mode: PutMode,

    /// Compression of the payload on the wire: none or zstd.
    #[arg(long, default_value = "none")]
    pub compression: Compression,

    /// Payload given inline.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,

    /// Payload read from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GetMode {
    Exact,
    Closest,
    Interval,
    Valid,
    Latest,
    FirstBefore,
    FirstAfter,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    #[arg(value_enum)]
    pub mode: GetMode,

    #[arg(long)]
    pub url: String,

    /// Request time for exact, closest, valid, first-before and first-after.
    #[arg(long, value_parser = parse_time)]
    pub time: Option<i64>,

    #[arg(long, value_parser = parse_time)]
    pub start: Option<i64>,

    #[arg(long, value_parser = parse_time)]
    pub end: Option<i64>,

    /// Seconds; negative is unbounded for closest.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub margin: i64,

    /// 0 matches every type.
    #[arg(long, default_value_t = 0)]
    pub data_type: i32,

    /// 0 matches every second type.
    #[arg(long, default_value_t = 0)]
    pub data_type2: i32,

    #[arg(long, default_value = "off")]
    pub unique: UniqueMode,

    #[arg(long)]
    pub refs_only: bool,

    /// Compression of the reply payloads: none or zstd.
    #[arg(long, default_value = "none")]
    pub compression: Compression,

    /// Print payloads as text.
    #[arg(long)]
    pub show_data: bool,
}

#[derive(Debug, Args)]
pub struct TimesArgs {
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Args)]
pub struct TimeListArgs {
    #[arg(long)]
    pub url: String,

    #[arg(long, value_parser = parse_time)]
    pub start: i64,

    #[arg(long, value_parser = parse_time)]
    pub end: i64,

    /// Seconds between kept entries.
    #[arg(long, default_value_t = 0)]
    pub min_interval: i64,
}

#[derive(Debug, Args)]
pub struct EraseArgs {
    #[arg(long)]
    pub url: String,

    #[arg(long, value_parser = parse_time)]
    pub time: i64,

    /// 0 erases every type.
    #[arg(long, default_value_t = 0)]
    pub data_type: i32,

    /// 0 erases every second type.
    #[arg(long, default_value_t = 0)]
    pub data_type2: i32,
}

#[derive(Debug, Serialize)]
struct TimesRow {
    product: String,
    first_time: String,
    last_time: String,
    last_valid_time: String,
}

impl Command {
    fn url(&self) -> &str {
        match self {
            Command::Put(args) => &args.url,
            Command::Get(args) => &args.url,
            Command::Times(args) => &args.url,
            Command::TimeList(args) => &args.url,
            Command::Erase(args) => &args.url,
        }
    }

    /// Run against a client built from `config` and return the text to print.
    pub async fn run(self, config: ClientConfig, format: OutputFormat) -> anyhow::Result<String> {
        require_remote(self.url())?;
        let mut client = SpdbClient::new(config);
        match self {
            Command::Put(args) => run_put(&mut client, args, format).await,
            Command::Get(args) => run_get(&mut client, args, format).await,
            Command::Times(args) => {
                let result = client.get_times(&args.url).await?;
                let row = TimesRow {
                    product: result.product.prod_label.clone(),
                    first_time: format_unix(result.times.first_time),
                    last_time: format_unix(result.times.last_time),
                    last_valid_time: format_unix(result.times.last_valid_time),
                };
                if result.times.is_empty() {
                    tracing::warn!(url = %args.url, "store is empty");
                }
                render_value(&row, format, || {
                    table(
                        &["PRODUCT", "FIRST", "LAST", "LAST VALID"],
                        &[vec![
                            row.product.clone(),
                            row.first_time.clone(),
                            row.last_time.clone(),
                            row.last_valid_time.clone(),
                        ]],
                    )
                })
            }
            Command::TimeList(args) => {
                let times = client
                    .compile_time_list(&args.url, args.start, args.end, args.min_interval)
                    .await?;
                let formatted: Vec<String> = times.iter().map(|&t| format_unix(t)).collect();
                render_value(&formatted, format, || {
                    let rows: Vec<Vec<String>> =
                        formatted.iter().map(|t| vec![t.clone()]).collect();
                    table(&["VALID"], &rows)
                })
            }
            Command::Erase(args) => {
                client
                    .erase(&args.url, args.time, args.data_type, args.data_type2)
                    .await?;
                Ok(format!(
                    "erased {} type {}/{}\n",
                    format_unix(args.time),
                    args.data_type,
                    args.data_type2
                ))
            }
        }
    }
}

async fn run_put(
    client: &mut SpdbClient,
    args: PutArgs,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let payload = match (&args.data, &args.file) {
        (Some(data), _) => data.as_bytes().to_vec(),
        (None, Some(path)) => {
            std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?
        }
        (None, None) => bail!("one of --data or --file is required"),
    };
    let expire = args.expire.unwrap_or(args.valid.saturating_add(args.lifetime));

    client.set_put_mode(args.mode);
    client.set_compression(args.compression);
    client.clear_chunks();
    client.add_chunk_with_type2(args.data_type, args.data_type2, args.valid, expire, &payload)?;
    client.put_sync(&args.url, args.prod_id, &args.label).await?;

    let rows = chunk_rows(client.chunks(), false);
    render_chunks(&rows, format)
}

async fn run_get(
    client: &mut SpdbClient,
    args: GetArgs,
    format: OutputFormat,
) -> anyhow::Result<String> {
    client.set_unique(args.unique);
    client.set_refs_only(args.refs_only);
    client.set_compression(args.compression);

    let need_time = || args.time.context("--time is required for this mode");
    let url = args.url.as_str();
    let (dt, dt2) = (args.data_type, args.data_type2);
    let result = match args.mode {
        GetMode::Exact => client.get_exact(url, need_time()?, dt, dt2).await?,
        GetMode::Closest => client.get_closest(url, need_time()?, args.margin, dt, dt2).await?,
        GetMode::Interval => {
            let (Some(start), Some(end)) = (args.start, args.end) else {
                bail!("--start and --end are required for interval");
            };
            client.get_interval(url, start, end, dt, dt2).await?
        }
        GetMode::Valid => client.get_valid(url, need_time()?, dt, dt2).await?,
        GetMode::Latest => client.get_latest(url, args.margin, dt, dt2).await?,
        GetMode::FirstBefore => {
            client.get_first_before(url, need_time()?, args.margin, dt, dt2).await?
        }
        GetMode::FirstAfter => {
            client.get_first_after(url, need_time()?, args.margin, dt, dt2).await?
        }
    };

    tracing::debug!(url, n_chunks = result.batch.len(), "get done");
    let rows = chunk_rows(&result.batch, args.show_data && !args.refs_only);
    render_chunks(&rows, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use spdb_net::FrameServer;
    use spdb_service::SpdbService;
    use spdb_store::MemBackend;
    use std::sync::Arc;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Command {
        let mut full = vec!["spdb-admin"];
        full.extend_from_slice(args);
        TestCli::try_parse_from(full).unwrap().command
    }

    fn sync_config() -> ClientConfig {
        ClientConfig {
            put_threading: false,
            connect_timeout_ms: 2_000,
            io_timeout_ms: 2_000,
            ..ClientConfig::default()
        }
    }

    /// A loopback server over a fresh store, and a URL for `dir` on it.
    async fn start_server(dir: &str) -> (FrameServer, String) {
        let service = SpdbService::new(Arc::new(MemBackend::new()));
        let mut server = FrameServer::new(Arc::new(service));
        let addr = server.start("127.0.0.1:0").await.unwrap();
        (server, format!("spdbp:://127.0.0.1:{}::{dir}", addr.port()))
    }

    async fn run(args: &[&str], format: OutputFormat) -> String {
        parse(args).run(sync_config(), format).await.unwrap()
    }

    #[test]
    fn test_parse_put() {
        let cmd = parse(&[
            "put", "--url", "/spdb/x", "--valid", "2001-09-09 01:46:40", "--data", "abc",
            "--mode", "once",
        ]);
        match cmd {
            Command::Put(args) => {
                assert_eq!(args.valid, 1_000_000_000);
                assert_eq!(args.mode, PutMode::Once);
                assert_eq!(args.expire, None);
                assert_eq!(args.compression, Compression::None);
            }
            other => panic!("expected put, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_add_unique_and_compression() {
        let cmd = parse(&[
            "put", "--url", "u", "--valid", "1", "--data", "x", "--mode", "add_unique",
            "--compression", "zstd", "--data-type2", "850",
        ]);
        match cmd {
            Command::Put(args) => {
                assert_eq!(args.mode, PutMode::AddUnique);
                assert_eq!(args.compression, Compression::Zstd);
                assert_eq!(args.data_type2, 850);
            }
            other => panic!("expected put, got {other:?}"),
        }
    }

    #[test]
    fn test_put_requires_payload() {
        let result = TestCli::try_parse_from(["spdb-admin", "put", "--url", "u", "--valid", "1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_get_negative_margin() {
        match parse(&["get", "closest", "--url", "u", "--time", "5", "--margin", "-1"]) {
            Command::Get(args) => {
                assert_eq!(args.mode, GetMode::Closest);
                assert_eq!(args.margin, -1);
            }
            other => panic!("expected get, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_url_is_rejected() {
        for args in [
            &["put", "--url", "/spdb/x", "--valid", "100", "--data", "lost"][..],
            &["get", "exact", "--url", "/spdb/x", "--time", "100"][..],
            &["times", "--url", "spdb/x"][..],
            &["erase", "--url", "/spdb/x", "--time", "100"][..],
        ] {
            let err = parse(args).run(sync_config(), OutputFormat::Table).await.unwrap_err();
            assert!(err.to_string().contains(LOCAL_URL_REJECTED), "{err}");
        }
    }

    #[tokio::test]
    async fn test_put_get_erase_remote() {
        let (_server, url) = start_server("spdb/put-get").await;
        run(
            &["put", "--url", &url, "--valid", "100", "--data-type", "4", "--data-type2", "850",
                "--data", "payload", "--label", "Test", "--compression", "zstd"],
            OutputFormat::Table,
        )
        .await;

        let out = run(
            &["get", "exact", "--url", &url, "--time", "100", "--show-data"],
            OutputFormat::Json,
        )
        .await;
        assert!(out.contains("\"data\": \"payload\""), "{out}");
        assert!(out.contains("\"data_type\": 4"), "{out}");
        assert!(out.contains("\"data_type2\": 850"), "{out}");

        let out = run(&["times", "--url", &url], OutputFormat::Table).await;
        assert!(out.contains("Test"), "{out}");

        run(
            &["erase", "--url", &url, "--time", "100", "--data-type2", "851"],
            OutputFormat::Table,
        )
        .await;
        let out = run(&["get", "exact", "--url", &url, "--time", "100"], OutputFormat::Json).await;
        assert_ne!(out.trim(), "[]");

        run(&["erase", "--url", &url, "--time", "100"], OutputFormat::Table).await;
        let out = run(&["get", "exact", "--url", &url, "--time", "100"], OutputFormat::Json).await;
        assert_eq!(out.trim(), "[]");
    }

    #[tokio::test]
    async fn test_get_missing_time() {
        let (_server, url) = start_server("spdb/missing").await;
        let get = parse(&["get", "exact", "--url", &url]);
        let err = get.run(sync_config(), OutputFormat::Table).await.unwrap_err();
        assert!(err.to_string().contains("--time"));
    }

    #[tokio::test]
    async fn test_time_list_remote() {
        let (_server, url) = start_server("spdb/time-list").await;
        for t in ["100", "130", "200"] {
            run(&["put", "--url", &url, "--valid", t, "--data", "x"], OutputFormat::Table).await;
        }
        let out = run(
            &["time-list", "--url", &url, "--start", "0", "--end", "1000", "--min-interval", "60"],
            OutputFormat::Json,
        )
        .await;
        let list: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(list, vec![format_unix(100), format_unix(200)]);
    }
}
