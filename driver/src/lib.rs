use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};
use pine_core::error::ErrorKind;
use pine_core::network::{ErrorBody, NetworkConnection, Request, Response, ResponseCode};
use pine_core::{PineError, Query, QueryOutput, ResultSet};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum DriverError {
	/// The server answered with a non-success code.
	#[error("{code:?} ({kind:?}): {message}")]
	Server {
		code: ResponseCode,
		kind: ErrorKind,
		message: String,
	},

	#[error(transparent)]
	Client(#[from] PineError),
}

impl DriverError {
	fn from_response(response: &Response) -> Self {
		let body = response.error_body().unwrap_or_else(|| ErrorBody {
			kind: ErrorKind::Internal,
			message: response.content.clone(),
		});
		DriverError::Server {
			code: response.code,
			kind: body.kind,
			message: body.message,
		}
	}

	/// Whether the server turned the request away because it was saturated
	pub fn is_busy(&self) -> bool {
		matches!(
			self,
			DriverError::Server {
				code: ResponseCode::TooManyRequests,
				..
			}
		)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
	pub output: QueryOutput,
	pub execution_time: Duration,
}

impl ExecutionResult {
	pub fn render(&self) -> String {
		render_output(&self.output)
	}
}

/// Client for a `pined` server. Every call opens its own connection, since
/// the server answers one request per connection.
#[derive(Debug, Clone)]
pub struct DatabaseDriver {
	server_address: String,
	timeout: Duration,
}

impl Default for DatabaseDriver {
	fn default() -> Self {
		Self::new()
	}
}

impl DatabaseDriver {
	pub fn new() -> Self {
		Self::with_server("127.0.0.1:6969".to_string())
	}

	pub fn with_server(address: String) -> Self {
		Self {
			server_address: address,
			timeout: Duration::from_secs(5),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn server_address(&self) -> &str {
		&self.server_address
	}

	pub fn set_server_address(&mut self, address: String) {
		self.server_address = address;
	}

	async fn round_trip(&self, request: &Request) -> DriverResult<Response> {
		let stream = match timeout(self.timeout, TcpStream::connect(&self.server_address)).await {
			Ok(Ok(stream)) => stream,
			Ok(Err(e)) => {
				return Err(PineError::Connection(format!(
					"Failed to connect to {}: {}",
					self.server_address, e
				))
				.into());
			}
			Err(_) => return Err(PineError::Timeout.into()),
		};

		let mut connection = NetworkConnection::new(stream, self.timeout);
		connection.send_request(request).await?;
		let response = connection.read_response().await?;
		tracing::debug!(server = %self.server_address, code = ?response.code, "Response received");

		if response.is_success() {
			Ok(response)
		} else {
			Err(DriverError::from_response(&response))
		}
	}

	/// Round-trip time of a PING
	pub async fn ping(&self) -> DriverResult<Duration> {
		let start = Instant::now();
		let response = self.round_trip(&Request::ping()).await?;
		if response.content != "PONG" {
			return Err(PineError::Protocol(format!(
				"Unexpected response to ping: {}",
				response.content
			))
			.into());
		}
		Ok(start.elapsed())
	}

	pub async fn execute(&self, query: &Query) -> DriverResult<ExecutionResult> {
		let start = Instant::now();
		let response = self.round_trip(&Request::query(query)?).await?;
		let output: QueryOutput = serde_json::from_str(&response.content).map_err(PineError::from)?;

		Ok(ExecutionResult {
			output,
			execution_time: start.elapsed(),
		})
	}

	pub async fn list_tables(&self) -> DriverResult<Vec<String>> {
		match self.execute(&Query::ListTables).await?.output {
			QueryOutput::Tables { tables } => Ok(tables),
			other => Err(PineError::Protocol(format!("Unexpected response to list_tables: {:?}", other)).into()),
		}
	}
}

/// Text rendering of a query result, tables drawn with comfy-table.
pub fn render_output(output: &QueryOutput) -> String {
	match output {
		QueryOutput::Created { table } => format!("Table '{}' created", table),
		QueryOutput::Dropped { table } => format!("Table '{}' dropped", table),
		QueryOutput::Inserted { row_id } => format!("Inserted row {}", row_id),
		QueryOutput::Rows(result) => render_result_set(result),
		QueryOutput::Count { count } => format!("{} row(s)", count),
		QueryOutput::Deleted { deleted: true } => "Deleted 1 row".to_string(),
		QueryOutput::Deleted { deleted: false } => "No matching row".to_string(),
		QueryOutput::Tables { tables } if tables.is_empty() => "No tables found".to_string(),
		QueryOutput::Tables { tables } => {
			let mut table = new_table();
			table.set_header(vec!["Table"]);
			for name in tables {
				table.add_row(vec![name.as_str()]);
			}
			table.to_string()
		}
	}
}

fn render_result_set(result: &ResultSet) -> String {
	let mut table = new_table();
	table.set_header(&result.columns);
	for row in &result.rows {
		table.add_row(row.values().iter().map(|v| v.to_string()));
	}
	format!("{}\n({} row(s))", table, result.rows.len())
}

fn new_table() -> Table {
	let mut table = Table::new();
	table
		.load_preset(UTF8_FULL_CONDENSED)
		.set_content_arrangement(ContentArrangement::Dynamic);
	table
}

// Blocking wrapper for synchronous usage
pub struct BlockingDatabaseDriver {
	driver: DatabaseDriver,
	runtime: tokio::runtime::Runtime,
}

impl BlockingDatabaseDriver {
	pub fn new(driver: DatabaseDriver) -> DriverResult<Self> {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.map_err(PineError::from)?;
		Ok(Self { driver, runtime })
	}

	pub fn ping(&self) -> DriverResult<Duration> {
		self.runtime.block_on(self.driver.ping())
	}

	pub fn execute(&self, query: &Query) -> DriverResult<ExecutionResult> {
		self.runtime.block_on(self.driver.execute(query))
	}

	pub fn list_tables(&self) -> DriverResult<Vec<String>> {
		self.runtime.block_on(self.driver.list_tables())
	}

	pub fn server_address(&self) -> &str {
		self.driver.server_address()
	}

	pub fn set_server_address(&mut self, address: String) {
		self.driver.set_server_address(address);
	}
}
