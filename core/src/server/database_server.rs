//! Database server implementation
//!
//! Accepts TCP connections and hands each one to the connection manager.

use crate::config::ServerConfig;
use crate::database::Database;
use crate::error::PineResult;
use crate::server::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Main database server
pub struct DatabaseServer {
    config: ServerConfig,
    database: Arc<Database>,
    connection_manager: Arc<ConnectionManager>,
    shutdown_token: CancellationToken,
}

impl DatabaseServer {
    pub fn new(config: ServerConfig, database: Arc<Database>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new(&config, Arc::clone(&database)));

        Self {
            config,
            database,
            connection_manager,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Bind the configured address
    pub async fn bind(&self) -> PineResult<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Listening");
        Ok(listener)
    }

    /// Bind and serve until shutdown
    pub async fn start(&self) -> PineResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until the shutdown token fires
    pub async fn serve(&self, listener: TcpListener) -> PineResult<()> {
        tracing::info!(
            workers = self.config.worker_threads,
            queue = self.config.work_queue_size,
            "Accepting connections"
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.admit(socket, addr),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping connection acceptance");
                    break;
                }
            }
        }

        Ok(())
    }

    fn admit(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let connection_manager = Arc::clone(&self.connection_manager);

        match connection_manager.try_admit() {
            Some(permit) => {
                tracing::debug!(peer = %addr, "New connection");
                tokio::spawn(async move {
                    if let Err(e) = connection_manager.handle_connection(socket, permit).await {
                        tracing::debug!(peer = %addr, error = %e, "Error handling connection");
                    }
                });
            }
            None => {
                tracing::warn!(
                    peer = %addr,
                    in_flight = connection_manager.in_flight(),
                    "Server saturated, rejecting connection"
                );
                tokio::spawn(async move {
                    if let Err(e) = connection_manager.reject(socket).await {
                        tracing::debug!(peer = %addr, error = %e, "Error rejecting connection");
                    }
                });
            }
        }
    }

    /// Stop accepting connections and flush every table.
    pub async fn shutdown(&self) -> PineResult<()> {
        tracing::info!("Shutting down PineDB server...");
        self.shutdown_token.cancel();

        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || database.flush())
            .await
            .map_err(|e| crate::error::PineError::Internal(format!("flush task failed: {}", e)))?
    }

    /// Get shutdown token for external shutdown coordination
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::network::{NetworkConnection, Request, Response, ResponseCode};
    use crate::query::{Query, QueryOutput};
    use crate::storage::{Column, DataType, Value};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn start(worker_threads: usize, work_queue_size: usize) -> (Arc<DatabaseServer>, SocketAddr) {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            worker_threads,
            work_queue_size,
            read_timeout_secs: 2,
            ..ServerConfig::default()
        };
        let database = Arc::new(Database::open(StorageConfig::in_memory()).unwrap());
        let server = Arc::new(DatabaseServer::new(config, database));

        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.serve(listener).await });

        (server, addr)
    }

    async fn send(addr: SocketAddr, request: &Request) -> Response {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = NetworkConnection::new(stream, Duration::from_secs(5));
        conn.send_request(request).await.unwrap();
        conn.read_response().await.unwrap()
    }

    async fn query(addr: SocketAddr, query: Query) -> QueryOutput {
        let response = send(addr, &Request::query(&query).unwrap()).await;
        assert!(response.is_success(), "{:?}", response);
        serde_json::from_str(&response.content).unwrap()
    }

    #[tokio::test]
    async fn test_ping_over_tcp() {
        let (server, addr) = start(2, 2).await;
        assert_eq!(send(addr, &Request::ping()).await, Response::pong());
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_over_tcp() {
        let (server, addr) = start(2, 4).await;

        query(
            addr,
            Query::CreateTable {
                table: "notes".into(),
                columns: vec![Column::new("body", DataType::String).with_capacity(40)],
            },
        )
        .await;
        let inserted = query(
            addr,
            Query::Insert {
                table: "notes".into(),
                values: HashMap::from([("body".to_string(), Value::from("hello"))]),
            },
        )
        .await;
        assert_eq!(inserted, QueryOutput::Inserted { row_id: 1 });

        let count = query(addr, Query::Count { table: "notes".into() }).await;
        assert_eq!(count, QueryOutput::Count { count: 1 });
        assert_eq!(server.database().count_all("notes").unwrap(), 1);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_saturated_server_rejects() {
        let (server, addr) = start(1, 0).await;

        // Holds the only admission slot: connected but silent.
        let _idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = NetworkConnection::new(stream, Duration::from_secs(5));
        let response = conn.read_response().await.unwrap();
        assert_eq!(response.code, ResponseCode::TooManyRequests);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_over_tcp() {
        let (server, addr) = start(1, 1).await;

        // Declares 20000 bytes of content; the answer comes back before any is sent.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0, 2, 0x4e, 0x20]).await.unwrap();

        let mut conn = NetworkConnection::new(stream, Duration::from_secs(5));
        let response = conn.read_response().await.unwrap();
        assert_eq!(response.code, ResponseCode::InvalidRequest);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_many_clients_in_parallel() {
        let (server, addr) = start(4, 64).await;
        query(
            addr,
            Query::CreateTable {
                table: "hits".into(),
                columns: vec![Column::new("n", DataType::Int)],
            },
        )
        .await;

        let mut tasks = Vec::new();
        for n in 0..32i64 {
            tasks.push(tokio::spawn(async move {
                query(
                    addr,
                    Query::Insert {
                        table: "hits".into(),
                        values: HashMap::from([("n".to_string(), Value::Int(n))]),
                    },
                )
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let count = query(addr, Query::Count { table: "hits".into() }).await;
        assert_eq!(count, QueryOutput::Count { count: 32 });
        server.shutdown().await.unwrap();
    }
}
