//! The Spdb access client.
//!
//! Every operation takes a URL. A local URL goes straight to the [`Backend`];
//! a remote one is served by a fresh connection per request. Remote puts run
//! on detached workers when put threading is on, and their failures are only
//! logged. Local puts, gets and erases always complete before returning.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use spdb_net::{Connector, TcpConnector};
use spdb_proto::{EraseRequest, GetQuery, GetReply, GetRequest, PutRequest};
use spdb_store::{run_put, run_query, Backend, MemBackend, QueryOutput};
use spdb_types::{ChunkBatch, ChunkRef, Compression, ProductInfo, PutMode, TimesInfo, UniqueMode};
use tracing::{debug, error, info};

use crate::config::{ClientConfig, DEFAULT_MAX_THREADS};
use crate::error::{ClientError, ClientResult};
use crate::put_worker::PutWorkerPool;
use crate::session::RemoteSession;
use crate::url::{Destination, DsUrlResolver, UrlResolver};

/// Chunks returned by a get, with the product they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResult {
    pub product: ProductInfo,
    pub batch: ChunkBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimesResult {
    pub product: ProductInfo,
    pub times: TimesInfo,
}

/// In-process backend used for local URLs when none is injected.
fn shared_mem_backend() -> Arc<dyn Backend> {
    static SHARED: OnceLock<Arc<MemBackend>> = OnceLock::new();
    SHARED.get_or_init(|| Arc::new(MemBackend::new())).clone()
}

pub struct SpdbClient {
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    resolver: Arc<dyn UrlResolver>,
    connector: Arc<dyn Connector>,
    session: RemoteSession,
    pool: PutWorkerPool,
    pending: ChunkBatch,
    /// Put destinations are resolved once per URL for the client's lifetime.
    put_destinations: DashMap<String, Destination>,
}

impl SpdbClient {
    /// Create a client on the process-wide worker pool.
    ///
    /// A `config.max_threads` other than [`DEFAULT_MAX_THREADS`] becomes the
    /// shared pool's ceiling; the default leaves the ceiling as other clients
    /// set it.
    ///
    /// Local URLs are served by an in-memory backend that lives as long as
    /// the process and is shared by every client built here. Chunks put to a
    /// local URL are not written to disk and are gone when the process exits.
    /// Use [`SpdbClient::with_backend`] to supply another backend.
    pub fn new(config: ClientConfig) -> Self {
        let pool = PutWorkerPool::shared();
        if config.max_threads != DEFAULT_MAX_THREADS {
            pool.set_max_workers(config.max_threads);
        }
        let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new());
        let session = RemoteSession::new(
            Arc::clone(&connector),
            config.connect_timeout(),
            config.io_timeout(),
        );
        Self {
            config,
            backend: shared_mem_backend(),
            resolver: Arc::new(DsUrlResolver::default()),
            connector,
            session,
            pool,
            pending: ChunkBatch::new(),
            put_destinations: DashMap::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.resolver = resolver;
        self.put_destinations.clear();
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self.rebuild_session();
        self
    }

    /// Use `pool` for async puts. Its ceiling is left as is.
    pub fn with_pool(mut self, pool: PutWorkerPool) -> Self {
        self.pool = pool;
        self
    }

    fn rebuild_session(&mut self) {
        self.session = RemoteSession::new(
            Arc::clone(&self.connector),
            self.config.connect_timeout(),
            self.config.io_timeout(),
        );
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &PutWorkerPool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn set_put_threading(&mut self, enabled: bool) {
        self.config.put_threading = enabled;
    }

    /// Change the worker ceiling of this client's pool, which may be shared
    /// with other clients.
    pub fn set_max_n_threads(&mut self, max_threads: usize) {
        self.config.max_threads = max_threads;
        self.pool.set_max_workers(max_threads);
    }

    pub fn set_put_mode(&mut self, mode: PutMode) {
        self.config.put_mode = mode;
    }

    pub fn set_unique(&mut self, unique: UniqueMode) {
        self.config.unique = unique;
    }

    pub fn set_refs_only(&mut self, refs_only: bool) {
        self.config.refs_only = refs_only;
    }

    /// Compress chunk data on the wire for remote puts and gets.
    pub fn set_compression(&mut self, compression: Compression) {
        self.config.compression = compression;
    }

    pub fn add_url(&mut self, url: impl Into<String>) {
        self.config.urls.push(url.into());
    }

    pub fn clear_urls(&mut self) {
        self.config.urls.clear();
    }

    // -----------------------------------------------------------------------
    // Pending batch
    // -----------------------------------------------------------------------

    pub fn add_chunk(
        &mut self,
        data_type: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> ClientResult<ChunkRef> {
        Ok(self.pending.add_chunk(data_type, valid_time, expire_time, data)?)
    }

    pub fn add_chunk_with_type2(
        &mut self,
        data_type: i32,
        data_type2: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> ClientResult<ChunkRef> {
        Ok(self
            .pending
            .add_chunk_with_type2(data_type, data_type2, valid_time, expire_time, data)?)
    }

    pub fn clear_chunks(&mut self) {
        self.pending.clear();
    }

    pub fn n_chunks(&self) -> usize {
        self.pending.len()
    }

    pub fn chunks(&self) -> &ChunkBatch {
        &self.pending
    }

    // -----------------------------------------------------------------------
    // Put
    // -----------------------------------------------------------------------

    /// Put the pending batch to `url`, on a worker if put threading is on.
    pub async fn put(&self, url: &str, prod_id: i32, prod_label: &str) -> ClientResult<()> {
        if self.config.put_threading {
            self.put_async(url, prod_id, prod_label)
        } else {
            self.put_sync(url, prod_id, prod_label).await
        }
    }

    /// Put the pending batch and wait for the outcome.
    ///
    /// Once the URL resolves, any failure is reported as [`ClientError::Put`]
    /// carrying the cause's text.
    pub async fn put_sync(&self, url: &str, prod_id: i32, prod_label: &str) -> ClientResult<()> {
        let result = match self.resolve_for_put(url)? {
            Destination::Local { dir } => self.put_local(&dir, prod_id, prod_label),
            Destination::Remote { endpoint, dir } => {
                let req = self.put_request(dir, prod_id, prod_label);
                self.session.put(&endpoint, req).await
            }
        };
        result.map_err(|e| {
            debug!(url = %url, error = %e, "sync put failed");
            ClientError::put_failed(url, &e)
        })
    }

    /// Hand a remote put to a detached worker.
    ///
    /// `Ok` means the put was admitted, not that it succeeded; failures are
    /// logged by the worker. Local destinations are written before returning.
    pub fn put_async(&self, url: &str, prod_id: i32, prod_label: &str) -> ClientResult<()> {
        match self.resolve_for_put(url)? {
            Destination::Local { dir } => self.put_local(&dir, prod_id, prod_label),
            Destination::Remote { endpoint, dir } => {
                let req = self.put_request(dir, prod_id, prod_label);
                let session = self.session.clone();
                self.pool.try_spawn(url.to_string(), async move {
                    session.put(&endpoint, req).await
                })
            }
        }
    }

    /// Clear the pending batch, add one chunk and put it.
    #[allow(clippy::too_many_arguments)]
    pub async fn put_chunk(
        &mut self,
        url: &str,
        prod_id: i32,
        prod_label: &str,
        data_type: i32,
        valid_time: i64,
        expire_time: i64,
        data: &[u8],
    ) -> ClientResult<()> {
        self.clear_chunks();
        self.add_chunk(data_type, valid_time, expire_time, data)?;
        self.put(url, prod_id, prod_label).await
    }

    /// Put the pending batch to every configured URL.
    ///
    /// Every destination is attempted even after a failure. Each logs its own
    /// outcome; the result only says how many failed.
    pub async fn put_all(&self, prod_id: i32, prod_label: &str) -> ClientResult<()> {
        if self.config.urls.is_empty() {
            return Err(ClientError::NoUrls);
        }

        let total = self.config.urls.len();
        let mut failed = 0;
        for url in &self.config.urls {
            match self.put(url, prod_id, prod_label).await {
                Ok(()) => info!(
                    app = %self.config.app_name,
                    url = %url,
                    n_chunks = self.pending.len(),
                    "put accepted"
                ),
                Err(e) => {
                    failed += 1;
                    error!(app = %self.config.app_name, url = %url, error = %e, "put failed");
                }
            }
        }

        if failed > 0 {
            return Err(ClientError::PutFailed { failed, total });
        }
        Ok(())
    }

    fn resolve_for_put(&self, url: &str) -> ClientResult<Destination> {
        if let Some(dest) = self.put_destinations.get(url) {
            return Ok(dest.clone());
        }
        let dest = self.resolver.resolve(url)?;
        self.put_destinations.insert(url.to_string(), dest.clone());
        Ok(dest)
    }

    fn put_request(&self, dir: String, prod_id: i32, prod_label: &str) -> PutRequest {
        PutRequest {
            dir,
            product: ProductInfo::new(prod_id, prod_label),
            mode: self.config.put_mode,
            compression: self.config.compression,
            batch: self.pending.clone(),
        }
    }

    fn put_local(&self, dir: &Path, prod_id: i32, prod_label: &str) -> ClientResult<()> {
        let mut handle = self.backend.open(prod_label, prod_id, dir)?;
        let written = run_put(handle.as_mut(), self.config.put_mode, &self.pending)?;
        handle.close();
        debug!(
            dir = %dir.display(),
            mode = %self.config.put_mode,
            n_chunks = self.pending.len(),
            written,
            "local put"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Get
    // -----------------------------------------------------------------------

    /// Run any query against `url`. The URL is resolved on every call.
    pub async fn query(&self, url: &str, query: GetQuery) -> ClientResult<QueryOutput> {
        let dest = self.resolver.resolve(url)?;
        debug!(url = %url, query = query.name(), local = dest.is_local(), "get");
        match dest {
            Destination::Local { dir } => {
                let handle = self.backend.open("", 0, &dir)?;
                let out = run_query(
                    handle.as_ref(),
                    &query,
                    self.config.unique,
                    self.config.refs_only,
                )?;
                handle.close();
                Ok(out)
            }
            Destination::Remote { endpoint, dir } => {
                let req = GetRequest {
                    dir,
                    query,
                    unique: self.config.unique,
                    refs_only: self.config.refs_only,
                    compression: self.config.compression,
                };
                let GetReply {
                    product,
                    batch,
                    times,
                    time_list,
                    ..
                } = self.session.get(&endpoint, req).await?;
                Ok(QueryOutput {
                    product,
                    batch,
                    times,
                    time_list,
                })
            }
        }
    }

    async fn get(&self, url: &str, query: GetQuery) -> ClientResult<GetResult> {
        let out = self.query(url, query).await?;
        Ok(GetResult {
            product: out.product,
            batch: out.batch,
        })
    }

    // A data type of 0 in any of the gets below matches every chunk on that
    // field.

    pub async fn get_exact(
        &self,
        url: &str,
        time: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::Exact { time, data_type, data_type2 }).await
    }

    pub async fn get_closest(
        &self,
        url: &str,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::Closest { time, margin, data_type, data_type2 })
            .await
    }

    pub async fn get_interval(
        &self,
        url: &str,
        start: i64,
        end: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::Interval { start, end, data_type, data_type2 })
            .await
    }

    pub async fn get_valid(
        &self,
        url: &str,
        time: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::Valid { time, data_type, data_type2 }).await
    }

    pub async fn get_latest(
        &self,
        url: &str,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::Latest { margin, data_type, data_type2 }).await
    }

    pub async fn get_first_before(
        &self,
        url: &str,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::FirstBefore { time, margin, data_type, data_type2 })
            .await
    }

    pub async fn get_first_after(
        &self,
        url: &str,
        time: i64,
        margin: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<GetResult> {
        self.get(url, GetQuery::FirstAfter { time, margin, data_type, data_type2 })
            .await
    }

    pub async fn get_times(&self, url: &str) -> ClientResult<TimesResult> {
        let out = self.query(url, GetQuery::Times).await?;
        Ok(TimesResult {
            product: out.product,
            times: out.times,
        })
    }

    pub async fn compile_time_list(
        &self,
        url: &str,
        start: i64,
        end: i64,
        min_interval: i64,
    ) -> ClientResult<Vec<i64>> {
        let out = self
            .query(url, GetQuery::TimeList { start, end, min_interval })
            .await?;
        Ok(out.time_list)
    }

    // -----------------------------------------------------------------------
    // Erase
    // -----------------------------------------------------------------------

    /// Remove the chunks at `valid_time` matching both data types (0 for
    /// every type).
    pub async fn erase(
        &self,
        url: &str,
        valid_time: i64,
        data_type: i32,
        data_type2: i32,
    ) -> ClientResult<()> {
        match self.resolver.resolve(url)? {
            Destination::Local { dir } => {
                let mut handle = self.backend.open("", 0, &dir)?;
                let removed = handle.erase(valid_time, data_type, data_type2)?;
                handle.close();
                debug!(url = %url, valid_time, data_type, data_type2, removed, "local erase");
                Ok(())
            }
            Destination::Remote { endpoint, dir } => {
                let req = EraseRequest {
                    dir,
                    valid_time,
                    data_type,
                    data_type2,
                };
                self.session.erase(&endpoint, req).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use spdb_net::{
        BoxStream, Endpoint, FrameServer, FramedSocket, MessageHandler, NetError, Reply,
    };
    use spdb_proto::{ids, AckReply};
    use spdb_serde::to_wire_bytes;
    use spdb_service::SpdbService;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn config(threading: bool) -> ClientConfig {
        ClientConfig {
            put_threading: threading,
            connect_timeout_ms: 2_000,
            io_timeout_ms: 2_000,
            ..ClientConfig::default()
        }
    }

    fn local_client(threading: bool) -> SpdbClient {
        SpdbClient::new(config(threading))
            .with_backend(Arc::new(MemBackend::new()))
            .with_pool(PutWorkerPool::new(8))
    }

    async fn start_server() -> (FrameServer, String) {
        let service = SpdbService::new(Arc::new(MemBackend::new()));
        let mut server = FrameServer::new(Arc::new(service));
        let addr = server.start("127.0.0.1:0").await.unwrap();
        (server, format!("spdbp:://127.0.0.1:{}::spdb/test", addr.port()))
    }

    fn unreachable_url() -> String {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        format!("spdbp:://127.0.0.1:{port}::spdb/test")
    }

    fn times(result: &GetResult) -> Vec<i64> {
        let mut t: Vec<i64> = result.batch.refs().iter().map(|r| r.valid_time).collect();
        t.sort_unstable();
        t
    }

    async fn seed(client: &mut SpdbClient, url: &str) {
        client.clear_chunks();
        for t in [100, 200, 300] {
            client.add_chunk(1, t, t + 50, format!("at-{t}").as_bytes()).unwrap();
        }
        client.put_sync(url, 7, "Metar").await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_remote() {
        let (_server, url) = start_server().await;
        let mut client = local_client(false);

        client.put_chunk(&url, 7, "Metar", 3, 500, 600, b"first").await.unwrap();
        client.put_chunk(&url, 7, "Metar", 3, 500, 600, b"second").await.unwrap();

        let got = client.get_exact(&url, 500, 3, 0).await.unwrap();
        assert_eq!(got.batch.len(), 1);
        assert_eq!(got.batch.chunk_data(0), Some(&b"second"[..]));
        assert_eq!(got.product, ProductInfo::new(7, "Metar"));
    }

    #[tokio::test]
    async fn test_add_mode_keeps_both_remote() {
        let (_server, url) = start_server().await;
        let mut client = local_client(false);
        client.set_put_mode(PutMode::Add);

        client.put_chunk(&url, 7, "Metar", 3, 500, 600, b"one").await.unwrap();
        client.put_chunk(&url, 7, "Metar", 3, 500, 600, b"two").await.unwrap();

        let got = client.get_interval(&url, 400, 600, 3, 0).await.unwrap();
        assert_eq!(got.batch.len(), 2);
    }

    #[tokio::test]
    async fn test_once_mode_is_noop_local() {
        let mut client = local_client(true);
        client.set_put_mode(PutMode::Once);

        client.put_chunk("/spdb/once", 1, "Once", 2, 10, 20, b"original").await.unwrap();
        client.put_chunk("/spdb/once", 1, "Once", 2, 10, 20, b"ignored").await.unwrap();

        let got = client.get_exact("/spdb/once", 10, 2, 0).await.unwrap();
        assert_eq!(got.batch.len(), 1);
        assert_eq!(got.batch.chunk_data(0), Some(&b"original"[..]));
    }

    #[tokio::test]
    async fn test_query_semantics_remote() {
        let (_server, url) = start_server().await;
        let mut client = local_client(false);
        seed(&mut client, &url).await;

        let got = client.get_closest(&url, 210, 50, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![200]);

        let got = client.get_closest(&url, 260, 20, 0, 0).await.unwrap();
        assert!(got.batch.is_empty());

        let got = client.get_first_before(&url, 250, 1000, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![200]);

        let got = client.get_first_after(&url, 250, 1000, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![300]);

        let got = client.get_interval(&url, 150, 300, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![200, 300]);

        let got = client.get_valid(&url, 249, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![200]);
        let got = client.get_valid(&url, 250, 0, 0).await.unwrap();
        assert!(got.batch.is_empty());

        let got = client.get_latest(&url, 0, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![300]);
        assert_eq!(got.batch.chunk_data(0), Some(&b"at-300"[..]));
    }

    #[tokio::test]
    async fn test_query_semantics_local() {
        let mut client = local_client(false);
        seed(&mut client, "/spdb/local").await;

        assert_eq!(
            times(&client.get_closest("/spdb/local", 210, 50, 0, 0).await.unwrap()),
            vec![200]
        );
        assert_eq!(
            times(&client.get_first_before("/spdb/local", 250, 1000, 0, 0).await.unwrap()),
            vec![200]
        );
        assert_eq!(
            times(&client.get_latest("/spdb/local", 100, 0, 0).await.unwrap()),
            vec![200, 300]
        );
    }

    #[tokio::test]
    async fn test_wildcard_type_matches_any() {
        let mut client = local_client(false);
        client.add_chunk(4, 100, 200, b"a").unwrap();
        client.add_chunk(9, 100, 200, b"b").unwrap();
        client.put("/spdb/wild", 1, "Wild").await.unwrap();

        assert_eq!(client.get_exact("/spdb/wild", 100, 0, 0).await.unwrap().batch.len(), 2);
        assert_eq!(client.get_exact("/spdb/wild", 100, 9, 0).await.unwrap().batch.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_on_empty_store() {
        let (_server, url) = start_server().await;
        let client = local_client(false);
        let got = client.get_latest(&url, 60, 0, 0).await.unwrap();
        assert!(got.batch.is_empty());
    }

    #[tokio::test]
    async fn test_times_time_list_and_erase_remote() {
        let (_server, url) = start_server().await;
        let mut client = local_client(false);
        seed(&mut client, &url).await;

        let t = client.get_times(&url).await.unwrap();
        assert_eq!(t.times.first_time, 100);
        assert_eq!(t.times.last_time, 300);
        assert_eq!(t.times.last_valid_time, 300);
        assert_eq!(t.product.prod_label, "Metar");

        let list = client.compile_time_list(&url, 0, 1000, 150).await.unwrap();
        assert_eq!(list, vec![100, 300]);

        client.erase(&url, 200, 0, 0).await.unwrap();
        let got = client.get_interval(&url, 0, 1000, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![100, 300]);
    }

    #[tokio::test]
    async fn test_unique_and_refs_only() {
        let mut client = local_client(false);
        client.add_chunk(5, 100, 200, b"old").unwrap();
        client.add_chunk(5, 150, 250, b"new").unwrap();
        client.add_chunk(6, 120, 220, b"other").unwrap();
        client.put("/spdb/unique", 1, "U").await.unwrap();

        client.set_unique(UniqueMode::Latest);
        let got = client.get_interval("/spdb/unique", 0, 1000, 0, 0).await.unwrap();
        assert_eq!(times(&got), vec![120, 150]);

        client.set_unique(UniqueMode::Off);
        client.set_refs_only(true);
        let got = client.get_interval("/spdb/unique", 0, 1000, 5, 0).await.unwrap();
        assert!(got.batch.is_refs_only());
        assert!(got.batch.data().is_empty());
        assert_eq!(got.batch.refs()[1].len, 3);
    }

    #[tokio::test]
    async fn test_async_put_then_drain() {
        let (_server, url) = start_server().await;
        let mut client = local_client(true);
        client.add_chunk(1, 42, 100, b"async").unwrap();

        client.put(&url, 3, "Async").await.unwrap();
        assert!(client.pool().wait_idle(WAIT).await);

        let got = client.get_exact(&url, 42, 1, 0).await.unwrap();
        assert_eq!(got.batch.chunk_data(0), Some(&b"async"[..]));
    }

    #[tokio::test]
    async fn test_async_put_failure_is_not_returned() {
        let mut client = local_client(true);
        client.add_chunk(1, 42, 100, b"lost").unwrap();

        client.put(&unreachable_url(), 3, "Async").await.unwrap();
        assert!(client.pool().wait_idle(WAIT).await);
        assert_eq!(client.pool().live_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_put_failure_is_returned() {
        let mut client = local_client(false);
        client.add_chunk(1, 42, 100, b"lost").unwrap();
        let url = unreachable_url();
        let err = client.put(&url, 3, "Sync").await.unwrap_err();
        match err {
            ClientError::Put { url: failed, .. } => assert_eq!(failed, url),
            other => panic!("expected put error, got {other:?}"),
        }
    }

    /// Answers every request with a fixed reply.
    struct FixedReplyHandler {
        id: i64,
        ack: AckReply,
    }

    #[async_trait]
    impl MessageHandler for FixedReplyHandler {
        async fn handle(&self, _id: i64, _payload: &[u8]) -> Reply {
            Reply::new(self.id, to_wire_bytes(&self.ack).unwrap())
        }
    }

    async fn start_fixed(id: i64, ack: AckReply) -> (FrameServer, String) {
        let mut server = FrameServer::new(Arc::new(FixedReplyHandler { id, ack }));
        let addr = server.start("127.0.0.1:0").await.unwrap();
        (server, format!("spdbp:://127.0.0.1:{}::spdb/test", addr.port()))
    }

    #[tokio::test]
    async fn test_sync_put_failures_share_one_error() {
        let mut client = local_client(false);
        client.add_chunk(1, 42, 100, b"x").unwrap();

        let (_wrong_id, wrong_id_url) = start_fixed(ids::GET_REPLY, AckReply::ok()).await;
        let (_failing, failing_url) =
            start_fixed(ids::PUT_REPLY, AckReply::failed("disk full")).await;

        for url in [unreachable_url(), wrong_id_url, failing_url.clone()] {
            let err = client.put_sync(&url, 3, "Sync").await.unwrap_err();
            assert!(matches!(&err, ClientError::Put { url: u, .. } if *u == url), "got {err:?}");
        }

        let err = client.put_sync(&failing_url, 3, "Sync").await.unwrap_err();
        assert!(err.to_string().contains("disk full"), "{err}");
    }

    #[tokio::test]
    async fn test_default_config_keeps_shared_ceiling() {
        let shared = PutWorkerPool::shared();
        shared.set_max_workers(DEFAULT_MAX_THREADS + 5);

        let _client = SpdbClient::new(config(true));
        assert_eq!(shared.max_workers(), DEFAULT_MAX_THREADS + 5);

        let _client = SpdbClient::new(ClientConfig {
            max_threads: DEFAULT_MAX_THREADS + 7,
            ..config(true)
        });
        assert_eq!(shared.max_workers(), DEFAULT_MAX_THREADS + 7);

        shared.set_max_workers(DEFAULT_MAX_THREADS);
    }

    #[tokio::test]
    async fn test_compressed_put_and_get_remote() {
        let (_server, url) = start_server().await;
        let mut client = local_client(false);
        client.set_compression(Compression::Zstd);
        let payload = b"ceiling 2500 broken ".repeat(64);

        client.put_chunk(&url, 7, "Metar", 3, 500, 600, &payload).await.unwrap();
        let got = client.get_exact(&url, 500, 3, 0).await.unwrap();
        assert_eq!(got.batch.chunk_data(0), Some(&payload[..]));

        client.set_compression(Compression::None);
        let got = client.get_exact(&url, 500, 3, 0).await.unwrap();
        assert_eq!(got.batch.chunk_data(0), Some(&payload[..]));
    }

    #[tokio::test]
    async fn test_second_type_selects_and_erases_remote() {
        let (_server, url) = start_server().await;
        let mut client = local_client(false);
        client.add_chunk_with_type2(3, 850, 500, 600, b"850mb").unwrap();
        client.add_chunk_with_type2(3, 500, 500, 600, b"500mb").unwrap();
        client.put_sync(&url, 7, "Sounding").await.unwrap();

        assert_eq!(client.get_exact(&url, 500, 3, 0).await.unwrap().batch.len(), 2);
        let got = client.get_exact(&url, 500, 0, 850).await.unwrap();
        assert_eq!(got.batch.chunk_data(0), Some(&b"850mb"[..]));
        assert_eq!(got.batch.refs()[0].data_type2, 850);

        client.erase(&url, 500, 3, 850).await.unwrap();
        let got = client.get_exact(&url, 500, 3, 0).await.unwrap();
        assert_eq!(got.batch.len(), 1);
        assert_eq!(got.batch.chunk_data(0), Some(&b"500mb"[..]));
    }

    #[tokio::test]
    async fn test_add_unique_local() {
        let mut client = local_client(false);
        client.set_put_mode(PutMode::AddUnique);

        client.put_chunk("/spdb/add-unique", 1, "U", 2, 10, 20, b"same").await.unwrap();
        client.put_chunk("/spdb/add-unique", 1, "U", 2, 10, 20, b"same").await.unwrap();
        client.put_chunk("/spdb/add-unique", 1, "U", 2, 10, 20, b"other").await.unwrap();

        let got = client.get_exact("/spdb/add-unique", 10, 2, 0).await.unwrap();
        assert_eq!(got.batch.len(), 2);
    }

    /// Never completes a connection, so workers stay live.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _timeout: Option<Duration>,
        ) -> Result<FramedSocket<BoxStream>, NetError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_admission_control() {
        let pool = PutWorkerPool::new(2);
        let mut client = SpdbClient::new(config(true))
            .with_backend(Arc::new(MemBackend::new()))
            .with_pool(pool.clone())
            .with_connector(Arc::new(StalledConnector));
        client.add_chunk(1, 1, 2, b"x").unwrap();
        let url = "spdbp:://stalled-host:5440::spdb/x";

        client.put(url, 1, "X").await.unwrap();
        client.put(url, 1, "X").await.unwrap();
        let err = client.put(url, 1, "X").await.unwrap_err();
        assert!(matches!(err, ClientError::TooManyThreads { live: 2, max: 2 }));
        assert_eq!(pool.live_count(), 2);

        client.set_max_n_threads(3);
        client.put(url, 1, "X").await.unwrap();
        assert_eq!(pool.live_count(), 3);
    }

    #[tokio::test]
    async fn test_put_all_reports_aggregate_failure() {
        let (_server, good) = start_server().await;
        let mut client = local_client(false);
        client.add_url(good.clone());
        client.add_url(unreachable_url());
        client.add_url("/spdb/fanout");
        client.add_chunk(2, 77, 88, b"fan").unwrap();

        let err = client.put_all(1, "Fan").await.unwrap_err();
        assert!(matches!(err, ClientError::PutFailed { failed: 1, total: 3 }));

        assert_eq!(client.get_exact(&good, 77, 2, 0).await.unwrap().batch.len(), 1);
        assert_eq!(client.get_exact("/spdb/fanout", 77, 2, 0).await.unwrap().batch.len(), 1);

        client.clear_urls();
        assert!(matches!(client.put_all(1, "Fan").await, Err(ClientError::NoUrls)));
    }

    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl UrlResolver for CountingResolver {
        fn resolve(&self, url: &str) -> ClientResult<Destination> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            DsUrlResolver::default().resolve(url)
        }
    }

    #[tokio::test]
    async fn test_put_resolution_is_cached_get_is_not() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let mut client = local_client(false).with_resolver(resolver.clone());
        client.add_chunk(1, 5, 6, b"r").unwrap();

        client.put("/spdb/cached", 1, "C").await.unwrap();
        client.put("/spdb/cached", 1, "C").await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        client.get_exact("/spdb/cached", 5, 1, 0).await.unwrap();
        client.get_exact("/spdb/cached", 5, 1, 0).await.unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let client = local_client(false);
        let err = client.get_exact("ftp:://host::dir", 1, 0, 0).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn test_pending_batch() {
        let mut client = local_client(false);
        client.add_chunk(1, 10, 20, b"abc").unwrap();
        let r = client.add_chunk(1, 11, 21, b"de").unwrap();
        assert_eq!(r.offset, 3);
        assert_eq!(client.n_chunks(), 2);
        client.clear_chunks();
        assert_eq!(client.n_chunks(), 0);
    }
}
