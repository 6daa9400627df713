//! Server session: lifecycle state, the framed read loop and outbound writes.

use std::{
    io::{self, IsTerminal},
    sync::Arc,
};

use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::logging::redact_audit_params;
use crate::mcp::codec::{encode_frame, FrameDecoder};
use crate::mcp::rpc::{Incoming, JsonRpcResponse, RpcError};
use crate::mcp::server::{Dispatch, McpServer, ServerInfo};

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initialized,
    ShutdownRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `exit`.
    Exit(i32),
    /// Input closed; in-flight requests were answered first.
    Eof,
    /// Input was a terminal, nothing was read.
    Interactive,
}

impl SessionEnd {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exit(code) => code,
            Self::Eof | Self::Interactive => 0,
        }
    }
}

pub fn interactive_notice(info: &ServerInfo) -> String {
    format!(
        "{} {} operates as an MCP server over stdio; launch it from an MCP client instead of an interactive terminal.",
        info.name, info.version
    )
}

type SharedWriter<W> = Arc<Mutex<W>>;

pub struct ServerSession {
    server: Arc<McpServer>,
    state: SessionState,
}

impl ServerSession {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reads frames until `exit` or end of input. Messages are dispatched in arrival
    /// order; asynchronous handlers run in their own tasks and answer when done.
    pub async fn run<R, W>(&mut self, mut reader: R, writer: W) -> io::Result<SessionEnd>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer: SharedWriter<W> = Arc::new(Mutex::new(writer));
        let mut decoder = FrameDecoder::new();
        let mut in_flight = JoinSet::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                break;
            }

            for message in decoder.feed(&chunk[..read]) {
                if let Some(code) = self.handle_message(message, &writer, &mut in_flight).await? {
                    if !in_flight.is_empty() {
                        warn!(pending = in_flight.len(), "exiting with requests still in flight");
                    }
                    return Ok(SessionEnd::Exit(code));
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                log_join_failure(joined);
            }
        }

        if decoder.buffered_len() > 0 {
            warn!(
                buffered_bytes = decoder.buffered_len(),
                "input closed with an incomplete frame"
            );
        }
        debug!(pending = in_flight.len(), "input closed, waiting for in-flight requests");
        while let Some(joined) = in_flight.join_next().await {
            log_join_failure(joined);
        }
        info!("input closed, session finished");
        Ok(SessionEnd::Eof)
    }

    async fn handle_message<W>(
        &mut self,
        message: Value,
        writer: &SharedWriter<W>,
        in_flight: &mut JoinSet<()>,
    ) -> io::Result<Option<i32>>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(incoming) = Incoming::from_value(message) else {
            warn!("ignoring message that is not a JSON-RPC 2.0 request or notification");
            return Ok(None);
        };
        let audited_params = redact_audit_params(incoming.params.as_ref());

        match self.server.dispatch(&mut self.state, &incoming) {
            Dispatch::Exit(code) => {
                audit(&incoming.method, &audited_params, &Ok(Value::Null));
                info!(code, "exit requested");
                Ok(Some(code))
            }
            Dispatch::Ready(outcome) => {
                audit(&incoming.method, &audited_params, &outcome);
                if let Some(id) = incoming.id {
                    write_response(writer, &JsonRpcResponse::from_outcome(id, outcome)).await?;
                }
                Ok(None)
            }
            Dispatch::Pending(future) => {
                let writer = Arc::clone(writer);
                let Incoming { id, method, .. } = incoming;
                in_flight.spawn(async move {
                    let outcome = match tokio::spawn(future).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            error!(method = %method, error = %err, "request handler panicked");
                            Err(RpcError::internal("request handler panicked"))
                        }
                    };
                    audit(&method, &audited_params, &outcome);

                    let Some(id) = id else {
                        return;
                    };
                    let response = JsonRpcResponse::from_outcome(id, outcome);
                    if let Err(err) = write_response(&writer, &response).await {
                        error!(method = %method, error = %err, "failed to write response");
                    }
                });
                Ok(None)
            }
        }
    }
}

/// Serves stdin/stdout, short-circuiting when stdin is a terminal.
pub async fn serve_stdio(server: Arc<McpServer>) -> io::Result<SessionEnd> {
    let interactive = io::stdin().is_terminal();
    serve(server, tokio::io::stdin(), tokio::io::stdout(), interactive).await
}

pub async fn serve<R, W>(
    server: Arc<McpServer>,
    reader: R,
    writer: W,
    interactive: bool,
) -> io::Result<SessionEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    if interactive {
        eprintln!("{}", interactive_notice(server.info()));
        return Ok(SessionEnd::Interactive);
    }

    info!(
        server = %server.info().name,
        version = %server.info().version,
        tools = server.registry().len(),
        "serving MCP over stdio"
    );
    ServerSession::new(server).run(reader, writer).await
}

async fn write_response<W>(writer: &Mutex<W>, response: &JsonRpcResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(response).map_err(io::Error::other)?;
    let mut writer = writer.lock().await;
    writer.write_all(&frame).await?;
    writer.flush().await
}

fn audit(method: &str, params: &Value, outcome: &Result<Value, RpcError>) {
    match outcome {
        Ok(_) => info!(method, params = %params, outcome = "ok", "mcp action audited"),
        Err(err) => info!(
            method,
            params = %params,
            outcome = "error",
            code = err.code,
            "mcp action audited"
        ),
    }
}

fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "response task failed");
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::{
        io::{DuplexStream, ReadHalf, WriteHalf},
        task::JoinHandle,
        time::{sleep, timeout},
    };

    use super::*;
    use crate::errors::AppError;
    use crate::mcp::context::ToolContext;
    use crate::mcp::registry::{tests::EchoTool, ToolDescriptor, ToolHandler, ToolRegistry};
    use crate::mcp::rpc::{
        INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, NOT_INITIALIZED, TOOL_EXECUTION_FAILED,
        TOOL_NOT_FOUND,
    };

    #[derive(Debug, Deserialize)]
    struct DelayInput {
        ms: u64,
        label: String,
    }

    struct DelayTool;

    #[async_trait]
    impl ToolHandler for DelayTool {
        type Input = DelayInput;
        type Output = Value;

        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "delay".to_string(),
                description: "Answers after a delay".to_string(),
                input_schema: json!({ "type": "object" }),
                output_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(&self, input: DelayInput, _ctx: &ToolContext) -> Result<Value, AppError> {
            sleep(Duration::from_millis(input.ms)).await;
            Ok(json!({ "label": input.label }))
        }
    }

    #[derive(Debug, Deserialize)]
    struct Nothing {}

    struct FailingTool {
        panics: bool,
    }

    #[async_trait]
    impl ToolHandler for FailingTool {
        type Input = Nothing;
        type Output = Value;

        fn describe(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: if self.panics { "explode" } else { "fail" }.to_string(),
                description: "Always fails".to_string(),
                input_schema: json!({ "type": "object" }),
                output_schema: json!({ "type": "object" }),
            }
        }

        async fn execute(&self, _input: Nothing, _ctx: &ToolContext) -> Result<Value, AppError> {
            if self.panics {
                panic!("tool blew up");
            }
            Err(AppError::internal("backend unavailable"))
        }
    }

    fn test_server() -> McpServer {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool {
            name: "echo",
            description: "Echo text back",
        });
        registry.register(DelayTool);
        registry.register(FailingTool { panics: false });
        registry.register(FailingTool { panics: true });
        McpServer::new(registry)
    }

    struct Client {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
        decoder: FrameDecoder,
        queued: VecDeque<Value>,
    }

    impl Client {
        async fn send(&mut self, message: Value) {
            let frame = encode_frame(&message).expect("encode frame");
            self.send_raw(&frame).await;
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.expect("write to session");
        }

        async fn request(&mut self, id: Value, method: &str, params: Value) {
            self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
                .await;
        }

        async fn notify(&mut self, method: &str) {
            self.send(json!({ "jsonrpc": "2.0", "method": method })).await;
        }

        async fn recv(&mut self) -> Value {
            loop {
                if let Some(message) = self.queued.pop_front() {
                    return message;
                }
                let mut buf = [0u8; 4096];
                let read = timeout(Duration::from_secs(5), self.reader.read(&mut buf))
                    .await
                    .expect("response before timeout")
                    .expect("read from session");
                assert!(read > 0, "session closed its output");
                self.queued.extend(self.decoder.feed(&buf[..read]));
            }
        }

        async fn close_input(&mut self) {
            self.writer.shutdown().await.expect("close session input");
        }

        async fn initialize(&mut self) {
            self.request(json!("init"), "initialize", json!({})).await;
            let response = self.recv().await;
            assert_eq!(response["id"], json!("init"));
            assert!(response.get("result").is_some());
        }
    }

    fn start(server: McpServer) -> (Client, JoinHandle<io::Result<SessionEnd>>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_reader, server_writer) = tokio::io::split(server_io);
        let session = tokio::spawn(async move {
            ServerSession::new(Arc::new(server))
                .run(server_reader, server_writer)
                .await
        });

        let (reader, writer) = tokio::io::split(client_io);
        let client = Client {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            queued: VecDeque::new(),
        };
        (client, session)
    }

    async fn finish(session: JoinHandle<io::Result<SessionEnd>>) -> SessionEnd {
        timeout(Duration::from_secs(5), session)
            .await
            .expect("session ends before timeout")
            .expect("session task")
            .expect("session io")
    }

    fn error_code(response: &Value) -> Option<i64> {
        response["error"]["code"].as_i64()
    }

    #[tokio::test]
    async fn notifications_get_no_reply_and_id_zero_does() {
        let (mut client, _session) = start(test_server());

        client.notify("initialized").await;
        client.notify("ping").await;
        client.notify("no/such/method").await;
        client
            .send(json!({ "jsonrpc": "2.0", "method": "tools/call", "params": { "name": "echo", "arguments": { "text": "x" } } }))
            .await;
        client.request(json!(0), "ping", Value::Null).await;

        let response = client.recv().await;
        assert_eq!(response["id"], json!(0));
        assert_eq!(response["result"], json!({ "ok": true }));
    }

    #[tokio::test]
    async fn null_id_is_answered_with_null_id() {
        let (mut client, _session) = start(test_server());
        client.request(Value::Null, "ping", Value::Null).await;

        let response = client.recv().await;
        assert!(response.as_object().expect("object").contains_key("id"));
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["result"], json!({ "ok": true }));
    }

    #[tokio::test]
    async fn tools_require_initialize() {
        let (mut client, _session) = start(test_server());

        client.request(json!(1), "tools/list", json!({})).await;
        let response = client.recv().await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(error_code(&response), Some(NOT_INITIALIZED));

        client.initialize().await;
        client.request(json!(2), "tools/list", json!({})).await;
        let response = client.recv().await;
        let names: Vec<_> = response["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .map(|tool| tool["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("echo"), json!("delay"), json!("fail"), json!("explode")]);
    }

    #[tokio::test]
    async fn unknown_method_and_tool_have_distinct_codes() {
        let (mut client, _session) = start(test_server());
        client.initialize().await;

        client.request(json!(1), "prompts/list", json!({})).await;
        assert_eq!(error_code(&client.recv().await), Some(METHOD_NOT_FOUND));

        client
            .request(json!(2), "tools/call", json!({ "name": "missing" }))
            .await;
        assert_eq!(error_code(&client.recv().await), Some(TOOL_NOT_FOUND));

        client
            .request(json!(3), "tools/call", json!({ "name": "echo", "arguments": {} }))
            .await;
        assert_eq!(error_code(&client.recv().await), Some(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn handler_failures_are_contained() {
        let (mut client, _session) = start(test_server());
        client.initialize().await;

        client.request(json!(1), "tools/call", json!({ "name": "fail" })).await;
        let response = client.recv().await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(error_code(&response), Some(TOOL_EXECUTION_FAILED));
        assert_eq!(
            response["error"]["data"],
            json!("internal error: backend unavailable")
        );

        client.request(json!(2), "tools/call", json!({ "name": "explode" })).await;
        let response = client.recv().await;
        assert_eq!(response["id"], json!(2));
        assert_eq!(error_code(&response), Some(INTERNAL_ERROR));

        client.request(json!(3), "ping", Value::Null).await;
        assert_eq!(client.recv().await["result"], json!({ "ok": true }));
    }

    #[tokio::test]
    async fn slow_tool_does_not_block_later_requests() {
        let (mut client, _session) = start(test_server());
        client.initialize().await;

        client
            .request(
                json!("slow"),
                "tools/call",
                json!({ "name": "delay", "arguments": { "ms": 300, "label": "slow" } }),
            )
            .await;
        client
            .request(
                json!("fast"),
                "tools/call",
                json!({ "name": "delay", "arguments": { "ms": 0, "label": "fast" } }),
            )
            .await;
        client.request(json!("ping"), "ping", Value::Null).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let response = client.recv().await;
            if let Some(label) = response["result"]["structuredContent"]["label"].as_str() {
                assert_eq!(response["id"], json!(label));
            }
            ids.push(response["id"].clone());
        }
        assert_eq!(ids.last(), Some(&json!("slow")));
        assert!(ids.contains(&json!("fast")));
        assert!(ids.contains(&json!("ping")));
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (mut client, _session) = start(test_server());

        let mut bytes = b"Content-Length: 7\r\n\r\n{broken".to_vec();
        bytes.extend(encode_frame(&json!({ "jsonrpc": "1.0", "id": 5, "method": "ping" })).expect("encode"));
        bytes.extend(encode_frame(&json!({ "jsonrpc": "2.0", "id": 6, "method": "ping" })).expect("encode"));
        client.send_raw(&bytes).await;

        let response = client.recv().await;
        assert_eq!(response["id"], json!(6));
    }

    #[tokio::test]
    async fn shutdown_then_exit_ends_with_zero() {
        let (mut client, session) = start(test_server());
        client.initialize().await;

        client.request(json!(1), "shutdown", Value::Null).await;
        assert_eq!(client.recv().await["result"], json!({}));

        client.request(json!(2), "tools/list", json!({})).await;
        assert_eq!(error_code(&client.recv().await), Some(NOT_INITIALIZED));

        client.notify("exit").await;
        let end = finish(session).await;
        assert_eq!(end, SessionEnd::Exit(0));
        assert_eq!(end.exit_code(), 0);
    }

    #[tokio::test]
    async fn exit_without_shutdown_ends_with_one() {
        let (mut client, session) = start(test_server());
        client.initialize().await;
        client.notify("exit").await;

        assert_eq!(finish(session).await.exit_code(), 1);
    }

    #[tokio::test]
    async fn end_of_input_waits_for_in_flight_requests() {
        let (mut client, session) = start(test_server());
        client.initialize().await;

        client
            .request(
                json!(9),
                "tools/call",
                json!({ "name": "delay", "arguments": { "ms": 100, "label": "late" } }),
            )
            .await;
        client.close_input().await;

        let response = client.recv().await;
        assert_eq!(response["id"], json!(9));
        assert_eq!(response["result"]["structuredContent"]["label"], json!("late"));
        assert_eq!(finish(session).await, SessionEnd::Eof);
    }

    #[tokio::test]
    async fn interactive_input_is_not_read() {
        let server = Arc::new(test_server());
        let end = serve(server, tokio::io::empty(), tokio::io::sink(), true)
            .await
            .expect("serve");
        assert_eq!(end, SessionEnd::Interactive);
        assert_eq!(end.exit_code(), 0);
    }

    #[test]
    fn interactive_notice_names_the_server() {
        let info = ServerInfo {
            name: "mcp-rca".to_string(),
            version: "1.2.3".to_string(),
        };
        assert_eq!(
            interactive_notice(&info),
            "mcp-rca 1.2.3 operates as an MCP server over stdio; launch it from an MCP client instead of an interactive terminal."
        );
    }
}
