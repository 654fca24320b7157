//! The process bridge: one agent invocation in, one message stream out.
//!
//! [`AgentBridge::invoke`] never fails. Everything that goes wrong, from a bad
//! working directory to a crashed process, ends the returned [`Invocation`]
//! with exactly one terminal notice.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::agent::locate::ExecutableLocator;
use crate::agent::options::{QueryInputs, build_query_options};
use crate::agent::transport::{AgentTransport, EventStream};
use crate::error::BridgeError;
use crate::events::RawEvent;
use crate::mcp::config::McpServerConfig;
use crate::mcp::status::McpStatusCache;
use crate::message::{Message, provisional_session_id};
use crate::normalized::normalize;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parameters of one invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub prompt: String,
    pub working_directory: String,
    /// Session to resume.
    pub session_id: Option<String>,
    /// Stamped on messages whose event carries no session id.
    pub fallback_session_id: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub tool_servers: BTreeMap<String, McpServerConfig>,
    /// External cancellation; cancelling it cancels the invocation.
    pub signal: Option<CancellationToken>,
}

impl InvokeRequest {
    pub fn new(prompt: impl Into<String>, working_directory: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            working_directory: working_directory.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn resume(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn fallback_session(mut self, session_id: impl Into<String>) -> Self {
        self.fallback_session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    #[must_use]
    pub fn tool_servers(mut self, servers: BTreeMap<String, McpServerConfig>) -> Self {
        self.tool_servers = servers;
        self
    }

    #[must_use]
    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }
}

struct ActiveInvocation {
    id: u64,
    token: CancellationToken,
}

type ActiveSlot = Arc<Mutex<Option<ActiveInvocation>>>;

/// Clears the registration slot when the invocation ends, unless a newer
/// invocation has replaced it.
struct SlotGuard {
    slot: ActiveSlot,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|a| a.id == self.id) {
            *slot = None;
        }
    }
}

/// Starts agent invocations and cancels the current one.
pub struct AgentBridge {
    transport: Arc<dyn AgentTransport>,
    locator: Mutex<ExecutableLocator>,
    active: ActiveSlot,
    next_id: AtomicU64,
    idle_timeout: Option<Duration>,
    mcp_status: Option<Arc<McpStatusCache>>,
}

impl std::fmt::Debug for AgentBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBridge")
            .field("active", &self.is_active())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl AgentBridge {
    pub fn new(transport: Arc<dyn AgentTransport>, locator: ExecutableLocator) -> Self {
        Self {
            transport,
            locator: Mutex::new(locator),
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
            idle_timeout: None,
            mcp_status: None,
        }
    }

    /// End an invocation with an error when the process is silent this long.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Refresh `cache` from the tool-server list of every `init` event.
    #[must_use]
    pub fn with_mcp_status(mut self, cache: Arc<McpStatusCache>) -> Self {
        self.mcp_status = Some(cache);
        self
    }

    /// Takes effect on the next invocation.
    pub fn set_executable_path(&self, path: Option<PathBuf>) {
        lock(&self.locator).set_configured(path);
    }

    /// Whether an invocation is registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Cancel the registered invocation. Idempotent; a no-op when none is active.
    pub fn cancel(&self) {
        if let Some(active) = lock(&self.active).as_ref() {
            tracing::info!(name: "agent.invoke.cancel", invocation = active.id, "Cancelling agent invocation");
            active.token.cancel();
        }
    }

    /// Start an invocation.
    ///
    /// The cancellation token is registered before this returns, so
    /// [`cancel`](Self::cancel) reaches the invocation even before its stream
    /// is first polled.
    pub fn invoke(&self, request: InvokeRequest) -> Invocation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = match &request.signal {
            Some(external) => external.child_token(),
            None => CancellationToken::new(),
        };
        *lock(&self.active) = Some(ActiveInvocation {
            id,
            token: token.clone(),
        });

        let guard = SlotGuard {
            slot: Arc::clone(&self.active),
            id,
        };
        let session = Arc::new(Mutex::new(
            request.session_id.clone().filter(|s| !s.is_empty()),
        ));
        let run = Run {
            id,
            request,
            transport: Arc::clone(&self.transport),
            locator: lock(&self.locator).clone(),
            idle_timeout: self.idle_timeout,
            mcp_status: self.mcp_status.clone(),
            token: token.clone(),
            session: Arc::clone(&session),
        };

        Invocation {
            inner: Box::pin(run.into_stream(guard)),
            session,
            token,
        }
    }
}

/// State moved into an invocation's stream.
struct Run {
    id: u64,
    request: InvokeRequest,
    transport: Arc<dyn AgentTransport>,
    locator: ExecutableLocator,
    idle_timeout: Option<Duration>,
    mcp_status: Option<Arc<McpStatusCache>>,
    token: CancellationToken,
    session: Arc<Mutex<Option<String>>>,
}

enum Step {
    Event(RawEvent),
    End,
    Fail(BridgeError),
}

impl Run {
    fn into_stream(self, guard: SlotGuard) -> impl Stream<Item = Message> + Send + 'static {
        async_stream::stream! {
            let _guard = guard;
            let fallback = self
                .request
                .fallback_session_id
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(provisional_session_id);

            tracing::info!(
                name: "agent.invoke.start",
                invocation = self.id,
                resume = self.request.session_id.is_some(),
                cwd = %self.request.working_directory,
                "Starting agent invocation"
            );

            let started = tokio::select! {
                biased;
                () = self.token.cancelled() => Err(BridgeError::Cancelled),
                started = self.start() => started,
            };
            let mut events = match started {
                Ok(events) => events,
                Err(err) => {
                    yield self.terminal(err, &fallback);
                    return;
                }
            };

            let mut yielded = 0usize;
            loop {
                match self.next_step(&mut events).await {
                    Step::Event(event) => {
                        self.observe(&event);
                        let session = self.current_session(&fallback);
                        if let Some(message) = normalize(&event, &session) {
                            yielded += 1;
                            yield message;
                        }
                    }
                    Step::End => break,
                    Step::Fail(err) => {
                        yield self.terminal(err, &fallback);
                        break;
                    }
                }
            }

            tracing::info!(
                name: "agent.invoke.finished",
                invocation = self.id,
                messages = yielded,
                "Agent invocation finished"
            );
        }
    }

    /// Validate inputs, locate the executable and start the query.
    async fn start(&self) -> Result<EventStream, BridgeError> {
        validate_working_directory(&self.request.working_directory).await?;
        let executable = self.locator.resolve().await?;
        let options = build_query_options(
            QueryInputs {
                working_directory: &self.request.working_directory,
                session_id: self.request.session_id.as_deref(),
                model: self.request.model.as_deref(),
                system_prompt: self.request.system_prompt.as_deref(),
                tool_servers: &self.request.tool_servers,
            },
            executable,
        );
        self.transport.query(&self.request.prompt, &options).await
    }

    async fn next_step(&self, events: &mut EventStream) -> Step {
        if self.token.is_cancelled() {
            return Step::Fail(BridgeError::Cancelled);
        }
        let next = async {
            match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, events.next())
                    .await
                    .map_err(|_elapsed| {
                        BridgeError::Upstream(format!(
                            "no output from Claude CLI for {}s",
                            limit.as_secs()
                        ))
                    }),
                None => Ok(events.next().await),
            }
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => Step::Fail(BridgeError::Cancelled),
            next = next => match next {
                Ok(Some(Ok(event))) => Step::Event(event),
                Ok(Some(Err(err))) | Err(err) => Step::Fail(err),
                Ok(None) => Step::End,
            },
        }
    }

    /// Track session adoption and tool-server status from `init` events.
    fn observe(&self, event: &RawEvent) {
        if !event.is_init() {
            return;
        }
        if let Some(id) = event.session_id() {
            tracing::debug!(name: "agent.invoke.session", invocation = self.id, session = %id, "Session confirmed");
            *lock(&self.session) = Some(id.to_string());
        }
        if let (Some(cache), RawEvent::System(system)) = (&self.mcp_status, event) {
            cache.refresh_from_agent(&system.mcp_servers);
        }
    }

    fn current_session(&self, fallback: &str) -> String {
        lock(&self.session)
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }

    fn terminal(&self, err: BridgeError, fallback: &str) -> Message {
        let session = self.current_session(fallback);
        if err.is_cancellation() {
            tracing::info!(name: "agent.invoke.cancelled", invocation = self.id, "Agent invocation cancelled");
            Message::cancelled(session)
        } else {
            tracing::warn!(
                name: "agent.invoke.failed",
                invocation = self.id,
                kind = err.kind(),
                error = %err,
                "Agent invocation failed"
            );
            Message::error(err, session)
        }
    }
}

async fn validate_working_directory(dir: &str) -> Result<(), BridgeError> {
    if dir.trim().is_empty() {
        return Err(BridgeError::Config("Working directory is not set".into()));
    }
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(BridgeError::Config(format!(
            "Working directory does not exist: {dir}"
        ))),
    }
}

/// Messages of one invocation, in upstream order.
///
/// Ends after the upstream stream is exhausted or after one terminal notice.
pub struct Invocation {
    inner: Pin<Box<dyn Stream<Item = Message> + Send>>,
    session: Arc<Mutex<Option<String>>>,
    token: CancellationToken,
}

impl Invocation {
    /// Last known session id: the resumed id, replaced by any `init` id.
    /// Final once the stream is exhausted.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        lock(&self.session).clone()
    }

    /// Cancel this invocation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Stream for Invocation {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("session_id", &self.session_id())
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::options::QueryOptions;
    use crate::mcp::status::McpConnectionState;
    use crate::message::{MessageBody, NoticeKind};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;

    /// Replays one scripted stream; records the options it was called with.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<Option<EventStream>>,
        calls: AtomicUsize,
        last_options: Mutex<Option<QueryOptions>>,
    }

    impl ScriptedTransport {
        fn with(events: Vec<&str>, then_hang: bool) -> Arc<Self> {
            let parsed: Vec<Result<RawEvent, BridgeError>> = events
                .into_iter()
                .map(|e| Ok(serde_json::from_str(e).unwrap()))
                .collect();
            let base = stream::iter(parsed);
            let script: EventStream = if then_hang {
                Box::pin(base.chain(stream::pending()))
            } else {
                Box::pin(base)
            };
            Arc::new(Self {
                script: Mutex::new(Some(script)),
                ..Self::default()
            })
        }

        fn failing(err: BridgeError) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Some(Box::pin(stream::iter(vec![Err(err)])))),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn query(&self, _prompt: &str, options: &QueryOptions) -> Result<EventStream, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *lock(&self.last_options) = Some(options.clone());
            Ok(lock(&self.script)
                .take()
                .unwrap_or_else(|| Box::pin(stream::empty())))
        }
    }

    fn bridge(transport: Arc<ScriptedTransport>) -> AgentBridge {
        let exe = std::env::current_exe().unwrap();
        AgentBridge::new(transport, ExecutableLocator::with_candidates(Some(exe), vec![]))
    }

    fn cwd() -> String {
        std::env::temp_dir().display().to_string()
    }

    const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"S1","mcp_servers":[{"name":"time","status":"connected"}]}"#;
    const ASSISTANT: &str = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","result":"hi","duration_ms":1200}"#;

    #[tokio::test]
    async fn test_happy_path_adopts_init_session() {
        let transport = ScriptedTransport::with(vec![INIT, ASSISTANT, RESULT], false);
        let bridge = bridge(transport.clone());
        let mut invocation = bridge.invoke(InvokeRequest::new("hello", cwd()).fallback_session("session-x"));

        let messages: Vec<_> = (&mut invocation).collect().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].init_session_id(), Some("S1"));
        // no session id on the event: the adopted one is used
        assert_eq!(messages[1].session_id, "S1");
        assert_eq!(invocation.session_id().as_deref(), Some("S1"));
        assert!(!bridge.is_active());

        let options = lock(&transport.last_options).clone().unwrap();
        assert_eq!(options.model, crate::agent::options::DEFAULT_MODEL);
        assert!(options.resume.is_none());
    }

    #[tokio::test]
    async fn test_fallback_session_before_init() {
        let transport = ScriptedTransport::with(vec![ASSISTANT], false);
        let invocation = bridge(transport).invoke(
            InvokeRequest::new("hello", cwd())
                .resume(Some("OLD".into()))
                .fallback_session("session-x"),
        );
        let messages: Vec<_> = invocation.collect().await;
        assert_eq!(messages[0].session_id, "OLD");
    }

    #[tokio::test]
    async fn test_invalid_working_directory_never_spawns() {
        let transport = ScriptedTransport::with(vec![RESULT], false);
        let bridge = bridge(transport.clone());
        for dir in ["", "/definitely/not/a/dir"] {
            let messages: Vec<_> = bridge.invoke(InvokeRequest::new("hello", dir)).collect().await;
            assert_eq!(messages.len(), 1);
            assert!(messages[0].is_error_notice());
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_executable_is_error_notice() {
        let transport = ScriptedTransport::with(vec![RESULT], false);
        let bridge = AgentBridge::new(
            transport.clone(),
            ExecutableLocator::with_candidates(None, vec![PathBuf::from("/missing/claude")]),
        );
        let messages: Vec<_> = bridge.invoke(InvokeRequest::new("hello", cwd())).collect().await;
        assert_eq!(messages.len(), 1);
        let MessageBody::SystemNotice { text, .. } = &messages[0].body else {
            panic!("expected notice");
        };
        assert!(text.as_deref().unwrap().contains("not found"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_yields_one_notice() {
        let transport = ScriptedTransport::with(vec![INIT], true);
        let bridge = bridge(transport);
        let mut invocation = bridge.invoke(InvokeRequest::new("hello", cwd()));

        let first = invocation.next().await.unwrap();
        assert!(first.init_session_id().is_some());

        bridge.cancel();
        bridge.cancel();
        let notice = invocation.next().await.unwrap();
        assert!(notice.is_cancel_notice());
        assert_eq!(notice.session_id, "S1");
        assert!(invocation.next().await.is_none());
        assert!(!bridge.is_active());
    }

    #[tokio::test]
    async fn test_external_signal_cancels_before_start() {
        let transport = ScriptedTransport::with(vec![INIT, RESULT], false);
        let signal = CancellationToken::new();
        signal.cancel();
        let messages: Vec<_> = bridge(transport)
            .invoke(InvokeRequest::new("hello", cwd()).signal(signal))
            .collect()
            .await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_cancel_notice());
    }

    #[tokio::test]
    async fn test_owned_cancel_does_not_cancel_external() {
        let transport = ScriptedTransport::with(vec![], true);
        let signal = CancellationToken::new();
        let invocation = bridge(transport).invoke(InvokeRequest::new("hello", cwd()).signal(signal.clone()));
        invocation.cancel();
        let messages: Vec<_> = invocation.collect().await;
        assert!(messages[0].is_cancel_notice());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_upstream_error_becomes_error_notice() {
        let transport = ScriptedTransport::failing(BridgeError::Upstream("Claude CLI exited with 1".into()));
        let messages: Vec<_> = bridge(transport)
            .invoke(InvokeRequest::new("hello", cwd()))
            .collect()
            .await;
        assert_eq!(messages.len(), 1);
        let MessageBody::SystemNotice { subtype, text } = &messages[0].body else {
            panic!("expected notice");
        };
        assert_eq!(*subtype, NoticeKind::Error);
        assert_eq!(text.as_deref(), Some("Error: Claude CLI exited with 1"));
    }

    #[tokio::test]
    async fn test_transport_cancellation_is_cancel_notice() {
        let transport = ScriptedTransport::failing(BridgeError::Cancelled);
        let messages: Vec<_> = bridge(transport)
            .invoke(InvokeRequest::new("hello", cwd()))
            .collect()
            .await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_cancel_notice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_ends_invocation() {
        let transport = ScriptedTransport::with(vec![INIT], true);
        let bridge = bridge(transport).with_idle_timeout(Some(Duration::from_secs(30)));
        let messages: Vec<_> = bridge.invoke(InvokeRequest::new("hello", cwd())).collect().await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].is_error_notice());
    }

    #[tokio::test]
    async fn test_init_refreshes_status_cache() {
        let cache = Arc::new(McpStatusCache::new());
        let transport = ScriptedTransport::with(vec![INIT, RESULT], false);
        let bridge = bridge(transport).with_mcp_status(Arc::clone(&cache));
        let _: Vec<_> = bridge.invoke(InvokeRequest::new("hello", cwd())).collect().await;
        assert_eq!(cache.status("time").unwrap().state, McpConnectionState::Connected);
    }

    #[test]
    fn test_cancel_without_invocation_is_noop() {
        let bridge = bridge(ScriptedTransport::with(vec![], false));
        bridge.cancel();
        assert!(!bridge.is_active());
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_newer_registration() {
        let bridge = bridge(ScriptedTransport::with(vec![], true));
        let first = bridge.invoke(InvokeRequest::new("a", cwd()));
        let _second = bridge.invoke(InvokeRequest::new("b", cwd()));
        drop(first);
        assert!(bridge.is_active());
    }
}
