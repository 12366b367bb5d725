//! Connection management for the database server
//!
//! Admits connections up to `worker_threads + work_queue_size`, turns the rest
//! away with TOO_MANY_REQUESTS, and runs admitted queries on the blocking pool
//! once one of `worker_threads` execution slots is free.

use crate::config::ServerConfig;
use crate::database::Database;
use crate::error::{PineError, PineResult};
use crate::network::{NetworkConnection, Request, RequestType, Response};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

pub struct ConnectionManager {
    database: Arc<Database>,
    admission: Arc<Semaphore>,
    capacity: usize,
    workers: Semaphore,
    max_content_length: usize,
    read_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(config: &ServerConfig, database: Arc<Database>) -> Self {
        let capacity = config.worker_threads + config.work_queue_size;
        Self {
            database,
            admission: Arc::new(Semaphore::new(capacity)),
            capacity,
            workers: Semaphore::new(config.worker_threads),
            max_content_length: config.max_content_length,
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        }
    }

    /// Claim an admission slot without waiting.
    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.admission).try_acquire_owned().ok()
    }

    /// Connections currently admitted
    pub fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    /// Serve one admitted connection: read a request, answer it, close.
    /// The admission slot is held until the response is written.
    pub async fn handle_connection<S>(&self, stream: S, permit: OwnedSemaphorePermit) -> PineResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let id = Uuid::new_v4();
        let started = Instant::now();
        let mut conn = NetworkConnection::new(stream, self.read_timeout);

        let response = match conn.read_request(self.max_content_length).await {
            Ok(request) => self.dispatch(id, request).await,
            Err(e) => {
                tracing::debug!(request = %id, error = %e, "Rejected request");
                Response::error(&e)
            }
        };

        let result = conn.send_response(&response).await;
        drop(permit);
        // Best effort; the peer may already be gone.
        let _ = conn.close().await;

        tracing::debug!(
            request = %id,
            code = ?response.code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request finished"
        );
        result
    }

    /// Answer a connection that could not be admitted.
    pub async fn reject<S>(&self, stream: S) -> PineResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = NetworkConnection::new(stream, self.read_timeout);
        conn.send_response(&Response::error(&PineError::TooManyRequests))
            .await?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn dispatch(&self, id: Uuid, request: Request) -> Response {
        match request.request_type {
            RequestType::Ping => Response::pong(),
            RequestType::Query => match self.run_query(id, &request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(request = %id, error = %e, "Query failed");
                    Response::error(&e)
                }
            },
        }
    }

    async fn run_query(&self, id: Uuid, request: &Request) -> PineResult<Response> {
        let query = request.parse_query()?;
        tracing::debug!(request = %id, kind = query.kind(), table = ?query.table(), "Executing query");

        let _worker = self
            .workers
            .acquire()
            .await
            .map_err(|_| PineError::Internal("worker pool closed".into()))?;

        let database = Arc::clone(&self.database);
        let output = tokio::task::spawn_blocking(move || database.execute(query))
            .await
            .map_err(|e| PineError::Internal(format!("query task failed: {}", e)))??;

        Ok(Response::output(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::network::ResponseCode;
    use crate::query::{Query, QueryOutput};
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    fn manager(worker_threads: usize, work_queue_size: usize) -> ConnectionManager {
        let config = ServerConfig {
            worker_threads,
            work_queue_size,
            read_timeout_secs: 5,
            ..ServerConfig::default()
        };
        let database = Arc::new(Database::open(StorageConfig::in_memory()).unwrap());
        ConnectionManager::new(&config, database)
    }

    async fn roundtrip(manager: &ConnectionManager, request: Request) -> Response {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut client = NetworkConnection::new(client, Duration::from_secs(5));
        client.send_request(&request).await.unwrap();

        let permit = manager.try_admit().unwrap();
        manager.handle_connection(server, permit).await.unwrap();
        client.read_response().await.unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let manager = manager(1, 1);
        assert_eq!(roundtrip(&manager, Request::ping()).await, Response::pong());
    }

    #[tokio::test]
    async fn test_query_success_and_failure() {
        let manager = manager(2, 2);

        let response = roundtrip(&manager, Request::query(&Query::ListTables).unwrap()).await;
        assert!(response.is_success());
        let output: QueryOutput = serde_json::from_str(&response.content).unwrap();
        assert_eq!(output, QueryOutput::Tables { tables: vec![] });

        let response = roundtrip(
            &manager,
            Request::query(&Query::Count { table: "ghost".into() }).unwrap(),
        )
        .await;
        assert_eq!(response.code, ResponseCode::QueryError);
    }

    #[tokio::test]
    async fn test_malformed_query_is_a_query_error() {
        let manager = manager(1, 0);
        let request = Request {
            request_type: RequestType::Query,
            content: "SELECT * FROM t".into(),
        };

        let response = roundtrip(&manager, request).await;
        assert_eq!(response.code, ResponseCode::QueryError);
    }

    #[tokio::test]
    async fn test_oversized_request() {
        let manager = manager(1, 0);
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&[0, 2, 0xff, 0xff]).await.unwrap();

        let permit = manager.try_admit().unwrap();
        manager.handle_connection(server, permit).await.unwrap();

        let mut client = NetworkConnection::new(client, Duration::from_secs(5));
        let response = client.read_response().await.unwrap();
        assert_eq!(response.code, ResponseCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_admission_is_bounded() {
        let manager = manager(1, 1);

        let first = manager.try_admit().unwrap();
        let second = manager.try_admit().unwrap();
        assert!(manager.try_admit().is_none());
        assert_eq!(manager.in_flight(), 2);

        drop(first);
        assert!(manager.try_admit().is_some());
        drop(second);
    }

    #[tokio::test]
    async fn test_reject_answers_too_many_requests() {
        let manager = manager(1, 0);
        let (client, server) = tokio::io::duplex(1024);

        manager.reject(server).await.unwrap();

        let mut client = NetworkConnection::new(client, Duration::from_secs(5));
        let response = client.read_response().await.unwrap();
        assert_eq!(response.code, ResponseCode::TooManyRequests);
    }
}
