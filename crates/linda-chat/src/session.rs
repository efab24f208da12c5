//! Conversation sessions and the streamed reply lifecycle.
//!
//! A `ChatSession` owns one conversation. Each `send` spawns a stream task
//! that is the only writer of its assistant message until it reaches a
//! terminal state. All conversation mutations happen under the session lock,
//! and the task re-checks its cancel token under that lock before every
//! mutation, so a cancelled stream cannot touch the conversation once
//! `cancel()` has returned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::client::ClientInner;
use crate::errors::{ChatError, StreamFailure, stream_failure_from_error};
use crate::image::ImageAttachment;
use crate::message::{ChatMessage, Conversation, MessageId, Settled};
use crate::reducer::TokenReducer;
use crate::sse::{SseDecoder, SseFrame};
use crate::stream::StreamEvent;
use crate::transport::{ByteStream, ChatRequest};

/// Content sent for a message that only carries an image.
pub const IMAGE_ONLY_TEXT: &str = "(Gambar terkirim.)";

/// Lifecycle of one streamed reply.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Cooperative cancellation signal shared by a stream task and its handles.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl CancelToken {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// A message typed by the user.
#[derive(Clone, Debug, Default)]
pub struct UserInput {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }
}

pub(crate) struct StreamControl {
    id: uuid::Uuid,
    message_id: MessageId,
    cancel: CancelToken,
    state: Mutex<SessionState>,
}

impl StreamControl {
    fn new(message_id: MessageId) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            message_id,
            cancel: CancelToken::default(),
            state: Mutex::new(SessionState::Connecting),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

pub(crate) struct SessionShared {
    conversation: Conversation,
    persona: Option<String>,
    active: Option<Arc<StreamControl>>,
    last_request: Option<ChatRequest>,
}

type Shared = Arc<Mutex<SessionShared>>;

fn lock(shared: &Mutex<SessionShared>) -> MutexGuard<'_, SessionShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settles the stream's message and marks it cancelled. Must be called with
/// the session lock held. Returns false if the stream had already ended.
fn cancel_locked(shared: &mut SessionShared, control: &StreamControl) -> bool {
    if control.state().is_terminal() {
        return false;
    }
    control.cancel.cancel();
    let settled = shared.conversation.settle(control.message_id);
    control.set_state(SessionState::Cancelled);
    if shared.active.as_ref().is_some_and(|a| a.id == control.id) {
        shared.active = None;
    }
    info!(
        event = "stream.cancelled",
        stream_id = %control.id,
        message_id = %control.message_id,
        settled = ?settled
    );
    true
}

/// Ends the stream with `state`. Lock must be held.
///
/// A completed reply is finalized and stays in the conversation even when
/// the server sent no text; any other ending settles it.
fn end_locked(
    shared: &mut SessionShared,
    control: &StreamControl,
    state: SessionState,
) -> (Settled, String) {
    let settled = match state {
        SessionState::Completed if shared.conversation.finalize(control.message_id) => {
            Settled::Finalized
        }
        SessionState::Completed => Settled::Missing,
        _ => shared.conversation.settle(control.message_id),
    };
    let content = shared
        .conversation
        .get(control.message_id)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    control.set_state(state);
    if shared.active.as_ref().is_some_and(|a| a.id == control.id) {
        shared.active = None;
    }
    (settled, content)
}

/// Handle used to cancel a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    shared: Shared,
    control: Arc<StreamControl>,
}

impl AbortHandle {
    /// Cancels the stream.
    ///
    /// When this returns the assistant message is settled (kept with its
    /// partial content, or removed if it was still empty) and no further
    /// events or mutations will come from the stream. Aborting a finished
    /// stream is a no-op.
    pub fn abort(&self) -> bool {
        let mut shared = lock(&self.shared);
        cancel_locked(&mut shared, &self.control)
    }
}

/// Logical chat session over one conversation.
#[derive(Clone)]
pub struct ChatSession {
    client: Arc<ClientInner>,
    shared: Shared,
}

impl ChatSession {
    pub(crate) fn new(client: Arc<ClientInner>, mut conversation: Conversation) -> Self {
        // Restored history may carry a message that was streaming when the
        // previous process stopped.
        let stale: Vec<MessageId> = conversation
            .messages()
            .iter()
            .filter(|m| m.streaming)
            .map(|m| m.id)
            .collect();
        for id in stale {
            conversation.settle(id);
        }
        Self {
            client,
            shared: Arc::new(Mutex::new(SessionShared {
                conversation,
                persona: None,
                active: None,
                last_request: None,
            })),
        }
    }

    /// Sets the style name sent as `persona` with every request.
    pub fn set_persona(&self, persona: impl Into<String>) {
        let persona = persona.into();
        lock(&self.shared).persona = Some(persona.trim().to_string()).filter(|p| !p.is_empty());
    }

    pub fn persona(&self) -> Option<String> {
        lock(&self.shared).persona.clone()
    }

    /// Snapshot of the conversation.
    pub fn conversation(&self) -> Conversation {
        lock(&self.shared).conversation.clone()
    }

    /// Appends a message outside of any stream (greetings, notices).
    pub fn push(&self, message: ChatMessage) -> MessageId {
        lock(&self.shared).conversation.push(message)
    }

    /// State of the active stream, `Idle` when there is none.
    pub fn state(&self) -> SessionState {
        lock(&self.shared)
            .active
            .as_ref()
            .map(|a| a.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Cancels the active stream, if any.
    pub fn cancel_active(&self) -> bool {
        let mut shared = lock(&self.shared);
        match shared.active.clone() {
            Some(active) => cancel_locked(&mut shared, &active),
            None => false,
        }
    }

    /// Replaces the conversation with a single greeting, cancelling any
    /// active stream first.
    pub fn clear(&self, greeting: impl Into<String>) {
        let mut shared = lock(&self.shared);
        if let Some(active) = shared.active.clone() {
            cancel_locked(&mut shared, &active);
        }
        shared.conversation = Conversation::seeded(greeting);
        shared.last_request = None;
    }

    /// Clears locally, then asks the server to forget the session.
    ///
    /// The local clear always happens; a server failure is returned for the
    /// caller to show as a minor notice.
    pub async fn reset(&self, greeting: impl Into<String>) -> Result<(), ChatError> {
        self.clear(greeting);
        self.client.transport.reset().await.inspect_err(|err| {
            warn!(event = "session.reset_failed", error = %err);
        })
    }

    /// Appends the user message and starts streaming the reply.
    ///
    /// A stream that is still running in this session is cancelled first, so
    /// only one assistant message is ever streaming.
    pub async fn send(&self, input: UserInput) -> Result<StreamHandle, ChatError> {
        let (message, image) = user_message(input)?;
        let (request, control) = {
            let mut shared = lock(&self.shared);
            let request = self.push_user_locked(&mut shared, message, image);
            let message_id = shared.conversation.begin_assistant_stream()?;
            let control = Arc::new(StreamControl::new(message_id));
            shared.active = Some(control.clone());
            (request, control)
        };

        let (tx, rx) = mpsc::channel(self.client.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        tokio::spawn(stream_task(
            self.client.clone(),
            request,
            self.shared.clone(),
            control.clone(),
            tx,
            final_tx,
        ));

        Ok(StreamHandle {
            abort: AbortHandle {
                shared: self.shared.clone(),
                control,
            },
            rx,
            final_rx,
            saw_terminal: false,
        })
    }

    /// Appends the user message and fetches the reply without streaming.
    pub async fn send_once(&self, input: UserInput) -> Result<ChatMessage, ChatError> {
        let (message, image) = user_message(input)?;
        self.push_user_locked(&mut lock(&self.shared), message, image);
        self.reply_without_stream().await
    }

    /// Fetches a reply for the latest request through the non-streaming
    /// endpoint and appends it.
    ///
    /// Used after a stream failed with `StreamFailure::Unavailable`: the user
    /// message is already in the conversation.
    pub async fn reply_without_stream(&self) -> Result<ChatMessage, ChatError> {
        let request = {
            let shared = lock(&self.shared);
            match &shared.last_request {
                Some(request) => request.clone(),
                None => self.build_request(&shared, None),
            }
        };
        let reply = self.client.transport.complete(&request).await?;
        let message = ChatMessage::assistant(reply);
        lock(&self.shared).conversation.push(message.clone());
        Ok(message)
    }

    /// Cancels a stale stream, appends the user message and records the
    /// request for it.
    fn push_user_locked(
        &self,
        shared: &mut SessionShared,
        message: ChatMessage,
        image_data_url: Option<String>,
    ) -> ChatRequest {
        if let Some(stale) = shared.active.clone() {
            cancel_locked(shared, &stale);
        }
        shared.conversation.push(message);
        let request = self.build_request(shared, image_data_url);
        shared.last_request = Some(request.clone());
        request
    }

    fn build_request(&self, shared: &SessionShared, image_base64: Option<String>) -> ChatRequest {
        ChatRequest {
            messages: shared.conversation.history(),
            persona: shared.persona.clone(),
            image_base64,
            use_memory: self.client.use_memory,
        }
    }
}

/// Validates `input` and turns it into the user message plus the image
/// data URL to send.
fn user_message(input: UserInput) -> Result<(ChatMessage, Option<String>), ChatError> {
    let text = input.text.trim();
    if text.is_empty() && input.image.is_none() {
        return Err(ChatError::Validation(
            "message must contain text or an image".into(),
        ));
    }
    let content = if text.is_empty() { IMAGE_ONLY_TEXT } else { text };
    let mut message = ChatMessage::user(content);
    let mut data_url = None;
    if let Some(image) = input.image {
        message = message.with_image_ref(image.source);
        data_url = Some(image.data_url);
    }
    Ok((message, data_url))
}

/// Streaming handle returned by `ChatSession::send`.
pub struct StreamHandle {
    abort: AbortHandle,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<String, ChatError>>,
    saw_terminal: bool,
}

impl StreamHandle {
    pub fn stream_id(&self) -> uuid::Uuid {
        self.abort.control.id
    }

    /// The assistant message this stream writes to.
    pub fn message_id(&self) -> MessageId {
        self.abort.control.message_id
    }

    pub fn state(&self) -> SessionState {
        self.abort.control.state()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Cancels the stream. See [`AbortHandle::abort`].
    pub fn cancel(&self) -> bool {
        self.abort.abort()
    }

    /// Waits for the next event. Returns `None` once the stream has ended or
    /// has been cancelled.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.saw_terminal || self.abort.control.cancel.is_cancelled() {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.abort.control.cancel.is_cancelled() {
            return None;
        }
        if event.is_terminal() {
            self.saw_terminal = true;
        }
        Some(event)
    }

    /// Drains the stream and returns the final content of the reply.
    pub async fn finish(mut self) -> Result<String, ChatError> {
        while self.next_event().await.is_some() {}
        if self.abort.control.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(ChatError::protocol_msg(format!(
                "stream {} ended without a final result",
                self.abort.control.id
            ))),
        }
    }
}

/// Outcome of applying the frames of one chunk.
enum Applied {
    Continue,
    Done,
    Failed(StreamFailure),
}

async fn stream_task(
    client: Arc<ClientInner>,
    request: ChatRequest,
    shared: Shared,
    control: Arc<StreamControl>,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<String, ChatError>>,
) {
    let message_id = control.message_id;
    send_event(
        &tx,
        &control,
        StreamEvent::Started {
            stream_id: control.id,
            message_id,
        },
    )
    .await;

    let opened = tokio::select! {
        biased;
        _ = control.cancel.cancelled() => {
            let _ = final_tx.send(Err(ChatError::Cancelled));
            return;
        }
        opened = client.transport.open_stream(&request) => opened,
    };

    let body: ByteStream = match opened {
        Ok(body) => {
            let guard = lock(&shared);
            if control.cancel.is_cancelled() {
                drop(guard);
                let _ = final_tx.send(Err(ChatError::Cancelled));
                return;
            }
            control.set_state(SessionState::Streaming);
            drop(guard);
            info!(event = "stream.opened", stream_id = %control.id, message_id = %message_id);
            body
        }
        Err(err) => {
            let failure = stream_failure_from_error(&err);
            warn!(event = "stream.rejected", stream_id = %control.id, error = %err);
            fail(&shared, &control, &tx, final_tx, failure).await;
            return;
        }
    };

    read_body(body, shared, control, tx, final_tx).await;
}

async fn read_body(
    mut body: ByteStream,
    shared: Shared,
    control: Arc<StreamControl>,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<String, ChatError>>,
) {
    let message_id = control.message_id;
    let mut decoder = SseDecoder::default();
    let mut reducer = TokenReducer::new();
    let mut seq = 0_u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = control.cancel.cancelled() => {
                let _ = final_tx.send(Err(ChatError::Cancelled));
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let frames = decoder.push_chunk(&chunk);
                if frames.is_empty() {
                    continue;
                }
                let mut events = Vec::new();
                let ended = {
                    let mut guard = lock(&shared);
                    if control.cancel.is_cancelled() {
                        drop(guard);
                        let _ = final_tx.send(Err(ChatError::Cancelled));
                        return;
                    }
                    let applied = apply_frames(
                        &mut guard.conversation,
                        &control,
                        &mut reducer,
                        frames,
                        &mut seq,
                        &mut events,
                    );
                    match applied {
                        Applied::Continue => None,
                        Applied::Done => {
                            let (_, content) =
                                end_locked(&mut guard, &control, SessionState::Completed);
                            Some(Ok(content))
                        }
                        Applied::Failed(failure) => {
                            end_locked(&mut guard, &control, SessionState::Failed);
                            Some(Err(failure))
                        }
                    }
                };
                for event in events {
                    send_event(&tx, &control, event).await;
                }
                match ended {
                    None => {}
                    Some(Ok(content)) => {
                        complete(&tx, &control, final_tx, content).await;
                        return;
                    }
                    Some(Err(failure)) => {
                        warn!(event = "stream.server_error", stream_id = %control.id, failure = %failure);
                        send_event(
                            &tx,
                            &control,
                            StreamEvent::Error {
                                message_id,
                                failure: failure.clone(),
                            },
                        )
                        .await;
                        let _ = final_tx.send(Err(ChatError::Stream(failure)));
                        return;
                    }
                }
            }
            Some(Err(err)) => {
                warn!(
                    event = "stream.dropped",
                    stream_id = %control.id,
                    received = reducer.accepted().len() as u64,
                    error = %err
                );
                fail(&shared, &control, &tx, final_tx, stream_failure_from_error(&err)).await;
                return;
            }
            None => {
                if decoder.pending_len() > 0 {
                    debug!(
                        event = "stream.tail_dropped",
                        stream_id = %control.id,
                        bytes = decoder.pending_len() as u64
                    );
                }
                let content = {
                    let mut guard = lock(&shared);
                    if control.cancel.is_cancelled() {
                        drop(guard);
                        let _ = final_tx.send(Err(ChatError::Cancelled));
                        return;
                    }
                    end_locked(&mut guard, &control, SessionState::Completed).1
                };
                complete(&tx, &control, final_tx, content).await;
                return;
            }
        }
    }
}

/// Applies decoded frames in order. Stops at the first terminal frame.
fn apply_frames(
    conversation: &mut Conversation,
    control: &StreamControl,
    reducer: &mut TokenReducer,
    frames: Vec<SseFrame>,
    seq: &mut u64,
    events: &mut Vec<StreamEvent>,
) -> Applied {
    let message_id = control.message_id;
    for frame in frames {
        match frame.event.as_str() {
            "token" => {
                let reduction = reducer.apply(&frame.data);
                if reduction.addition.is_empty() {
                    debug!(event = "stream.token_duplicate", stream_id = %control.id, len = frame.data.len() as u64);
                    continue;
                }
                if !conversation.append_to(message_id, &reduction.addition) {
                    return Applied::Failed(StreamFailure::Transport {
                        message: format!("assistant message {message_id} is no longer streaming"),
                    });
                }
                if reduction.first {
                    events.push(StreamEvent::FirstContent { message_id });
                }
                debug!(event = "stream.token", stream_id = %control.id, seq = *seq, len = reduction.addition.len() as u64);
                events.push(StreamEvent::Token {
                    message_id,
                    seq: *seq,
                    text: reduction.addition,
                });
                *seq = seq.saturating_add(1);
            }
            "done" => return Applied::Done,
            "error" => {
                let message = if frame.data.is_empty() {
                    "stream error".to_string()
                } else {
                    frame.data
                };
                return Applied::Failed(StreamFailure::Server { message });
            }
            other => {
                debug!(event = "stream.frame_ignored", stream_id = %control.id, frame_event = other);
            }
        }
    }
    Applied::Continue
}

async fn complete(
    tx: &mpsc::Sender<StreamEvent>,
    control: &StreamControl,
    final_tx: oneshot::Sender<Result<String, ChatError>>,
    content: String,
) {
    info!(
        event = "stream.completed",
        stream_id = %control.id,
        message_id = %control.message_id,
        chars = content.chars().count() as u64
    );
    send_event(
        tx,
        control,
        StreamEvent::Done {
            message_id: control.message_id,
            content: content.clone(),
        },
    )
    .await;
    let _ = final_tx.send(Ok(content));
}

/// Settles the message after a transport or status failure and reports it.
async fn fail(
    shared: &Mutex<SessionShared>,
    control: &StreamControl,
    tx: &mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<String, ChatError>>,
    failure: StreamFailure,
) {
    {
        let mut guard = lock(shared);
        if control.cancel.is_cancelled() {
            drop(guard);
            let _ = final_tx.send(Err(ChatError::Cancelled));
            return;
        }
        let (settled, _) = end_locked(&mut guard, control, SessionState::Failed);
        debug!(event = "stream.failed", stream_id = %control.id, settled = ?settled);
    }
    send_event(
        tx,
        control,
        StreamEvent::Error {
            message_id: control.message_id,
            failure: failure.clone(),
        },
    )
    .await;
    let _ = final_tx.send(Err(ChatError::Stream(failure)));
}

/// Sends an event unless the stream is cancelled, also while waiting for
/// buffer space. A dropped receiver is fine: the conversation still receives
/// the reply.
async fn send_event(tx: &mpsc::Sender<StreamEvent>, control: &StreamControl, event: StreamEvent) {
    if control.cancel.is_cancelled() {
        return;
    }
    tokio::select! {
        biased;
        _ = control.cancel.cancelled() => {}
        _ = tx.send(event) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::client::ChatClient;
    use crate::message::Role;
    use crate::transport::ChatTransport;

    enum Script {
        Status(u16),
        Refused(&'static str),
        Unavailable,
        Chunks(Vec<&'static str>),
        Channel(mpsc::UnboundedReceiver<Result<Bytes, ChatError>>),
        Pending,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().expect("requests").clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
            self.requests.lock().expect("requests").push(request.clone());
            let script = self
                .scripts
                .lock()
                .expect("scripts")
                .pop_front()
                .expect("no script left");
            match script {
                Script::Status(status) => Err(ChatError::Status {
                    status,
                    body: String::new(),
                }),
                Script::Refused(reason) => Err(ChatError::Transport(reason.into())),
                Script::Unavailable => Err(ChatError::StreamUnavailable),
                Script::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(
                    chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))),
                ))),
                Script::Channel(rx) => Ok(Box::pin(futures::stream::unfold(
                    rx,
                    |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
                ))),
                Script::Pending => Ok(Box::pin(futures::stream::pending())),
            }
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
            self.requests.lock().expect("requests").push(request.clone());
            Ok("Balasan lengkap".into())
        }
    }

    fn session_with(transport: Arc<ScriptedTransport>) -> ChatSession {
        ChatClient::builder()
            .transport(transport)
            .build()
            .expect("client")
            .session(Conversation::seeded("Halo!"))
    }

    async fn drain(handle: &mut StreamHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) =
            tokio::time::timeout(Duration::from_secs(5), handle.next_event())
                .await
                .expect("stream stalled")
        {
            events.push(event);
        }
        events
    }

    async fn next_token(handle: &mut StreamHandle) -> String {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), handle.next_event())
                .await
                .expect("stream stalled")
                .expect("stream ended");
            if let StreamEvent::Token { text, .. } = event {
                return text;
            }
        }
    }

    fn token(data: &str) -> Result<Bytes, ChatError> {
        Ok(Bytes::from(format!("event: token\ndata: {data}\n\n")))
    }

    #[tokio::test]
    async fn cumulative_tokens_produce_final_text() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec![
            "event: token\ndata: Hi\n\n",
            "event: token\ndata: Hi\n\n",
            "event: tok",
            "en\ndata: Hi there\n\n",
            "event: done\ndata: [DONE]\n\n",
        ])]);
        let session = session_with(transport.clone());
        session.set_persona("Tsundere");

        let mut handle = session.send(UserInput::text("  Hi ")).await.expect("send");
        let message_id = handle.message_id();
        let events = drain(&mut handle).await;

        assert!(matches!(events[0], StreamEvent::Started { .. }));
        assert_eq!(events[1], StreamEvent::FirstContent { message_id });
        assert_eq!(
            events[2],
            StreamEvent::Token {
                message_id,
                seq: 0,
                text: "Hi".into()
            }
        );
        assert_eq!(
            events[3],
            StreamEvent::Token {
                message_id,
                seq: 1,
                text: " there".into()
            }
        );
        assert_eq!(
            events[4],
            StreamEvent::Done {
                message_id,
                content: "Hi there".into()
            }
        );
        assert_eq!(events.len(), 5);
        assert_eq!(handle.state(), SessionState::Completed);
        assert_eq!(session.state(), SessionState::Idle);

        let conversation = session.conversation();
        let reply = conversation.get(message_id).expect("reply kept");
        assert_eq!(reply.content, "Hi there");
        assert!(!reply.streaming);
        assert_eq!(conversation.streaming_count(), 0);

        let request = &transport.requests()[0];
        assert_eq!(request.persona.as_deref(), Some("Tsundere"));
        let last = request.messages.last().expect("history");
        assert_eq!((last.role, last.content.as_str()), (Role::User, "Hi"));
        assert!(request.messages.iter().all(|m| !m.content.is_empty()));
    }

    #[tokio::test]
    async fn finish_returns_final_content() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec![
            "event: token\ndata: Oke  \n\n",
        ])]);
        let session = session_with(transport);
        let handle = session.send(UserInput::text("halo")).await.expect("send");
        assert_eq!(handle.finish().await.expect("finish"), "Oke");
    }

    #[tokio::test]
    async fn status_error_short_circuits_without_placeholder() {
        let transport = ScriptedTransport::new(vec![Script::Status(500)]);
        let session = session_with(transport);

        let mut handle = session.send(UserInput::text("Hi")).await.expect("send");
        let message_id = handle.message_id();
        let events = drain(&mut handle).await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            StreamEvent::Error {
                message_id,
                failure: StreamFailure::Status { status: 500 }
            }
        );
        assert_eq!(handle.state(), SessionState::Failed);
        let conversation = session.conversation();
        assert!(conversation.get(message_id).is_none());
        assert_eq!(conversation.count_role(Role::Assistant), 1);
        assert!(matches!(
            handle.finish().await,
            Err(ChatError::Stream(StreamFailure::Status { status: 500 }))
        ));
    }

    #[tokio::test]
    async fn cancel_stops_all_further_mutation() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = session_with(ScriptedTransport::new(vec![Script::Channel(rx)]));

        let mut handle = session.send(UserInput::text("cerita dong")).await.expect("send");
        let message_id = handle.message_id();
        tx.send(token("Hi")).expect("chunk");
        assert_eq!(next_token(&mut handle).await, "Hi");

        assert!(handle.cancel());
        assert_eq!(handle.state(), SessionState::Cancelled);

        let _ = tx.send(token("Hi there"));
        let _ = tx.send(Ok(Bytes::from_static(b"event: done\ndata: [DONE]\n\n")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let conversation = session.conversation();
        let reply = conversation.get(message_id).expect("partial reply kept");
        assert_eq!(reply.content, "Hi");
        assert!(!reply.streaming);
        assert!(handle.next_event().await.is_none());
        assert!(!handle.cancel());
        assert!(matches!(handle.finish().await, Err(ChatError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_before_content_discards_placeholder() {
        let session = session_with(ScriptedTransport::new(vec![Script::Pending]));
        let handle = session.send(UserInput::text("halo")).await.expect("send");
        let abort = handle.abort_handle();
        assert!(abort.abort());
        assert!(session.conversation().get(handle.message_id()).is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn new_send_cancels_the_running_stream() {
        let session = session_with(ScriptedTransport::new(vec![
            Script::Pending,
            Script::Pending,
        ]));

        let mut first = session.send(UserInput::text("satu")).await.expect("first");
        let second = session.send(UserInput::text("dua")).await.expect("second");

        assert_eq!(first.state(), SessionState::Cancelled);
        assert!(first.next_event().await.is_none());
        let conversation = session.conversation();
        assert_eq!(conversation.streaming_count(), 1);
        assert!(conversation.get(first.message_id()).is_none());
        assert!(conversation.get(second.message_id()).expect("second").streaming);
        assert_eq!(conversation.count_role(Role::User), 2);
        second.cancel();
    }

    #[tokio::test]
    async fn transport_failure_keeps_partial_content() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = session_with(ScriptedTransport::new(vec![Script::Channel(rx)]));

        let mut handle = session.send(UserInput::text("halo")).await.expect("send");
        tx.send(token("Setengah")).expect("chunk");
        tx.send(Err(ChatError::Transport("connection reset".into())))
            .expect("error");
        let events = drain(&mut handle).await;

        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error {
                failure: StreamFailure::Transport { .. },
                ..
            })
        ));
        let conversation = session.conversation();
        let reply = conversation.get(handle.message_id()).expect("kept");
        assert_eq!(reply.content, "Setengah");
        assert!(!reply.streaming);
    }

    #[tokio::test]
    async fn transport_failure_before_any_token_discards_placeholder() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = session_with(ScriptedTransport::new(vec![Script::Channel(rx)]));

        let mut handle = session.send(UserInput::text("halo")).await.expect("send");
        let message_id = handle.message_id();
        tx.send(Ok(Bytes::from_static(b": ka\n\n"))).expect("keep-alive");
        tx.send(Err(ChatError::Transport("connection reset".into())))
            .expect("error");
        let events = drain(&mut handle).await;

        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error {
                message_id: id,
                failure: StreamFailure::Transport { message },
            }) if *id == message_id && message.contains("connection reset")
        ));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Token { .. })));
        assert_eq!(handle.state(), SessionState::Failed);
        let conversation = session.conversation();
        assert!(conversation.get(message_id).is_none());
        assert_eq!(conversation.streaming_count(), 0);
    }

    #[tokio::test]
    async fn connection_refused_discards_placeholder() {
        let session = session_with(ScriptedTransport::new(vec![Script::Refused(
            "connection refused",
        )]));

        let mut handle = session.send(UserInput::text("halo")).await.expect("send");
        let message_id = handle.message_id();
        let events = drain(&mut handle).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StreamEvent::Error {
                message_id: id,
                failure: StreamFailure::Transport { message },
            } if *id == message_id && message.contains("connection refused")
        ));
        let conversation = session.conversation();
        assert!(conversation.get(message_id).is_none());
        assert_eq!(conversation.count_role(Role::User), 1);
        assert!(matches!(
            handle.finish().await,
            Err(ChatError::Stream(StreamFailure::Transport { .. }))
        ));
    }

    #[tokio::test]
    async fn empty_completed_reply_stays_in_conversation() {
        let session = session_with(ScriptedTransport::new(vec![Script::Chunks(vec![
            "event: done\ndata: [DONE]\n\n",
        ])]));

        let mut handle = session.send(UserInput::text("halo")).await.expect("send");
        let message_id = handle.message_id();
        let events = drain(&mut handle).await;

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                message_id,
                content: String::new()
            })
        );
        let conversation = session.conversation();
        let reply = conversation.get(message_id).expect("reply kept");
        assert!(reply.content.is_empty());
        assert!(!reply.streaming);
        assert!(conversation.history().iter().all(|m| !m.content.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_from_cloned_sessions_both_start() {
        for _ in 0..200 {
            let session = session_with(ScriptedTransport::new(vec![
                Script::Pending,
                Script::Pending,
            ]));
            let other = session.clone();

            let (first, second) = tokio::join!(
                tokio::spawn(async move {
                    let handle = session.send(UserInput::text("satu")).await;
                    handle.map(|h| (h, session))
                }),
                tokio::spawn(async move { other.send(UserInput::text("dua")).await }),
            );
            let (first, session) = first.expect("join").expect("first send");
            let second = second.expect("join").expect("second send");

            let conversation = session.conversation();
            assert_eq!(conversation.count_role(Role::User), 2);
            assert_eq!(conversation.streaming_count(), 1);
            first.cancel();
            second.cancel();
        }
    }

    #[tokio::test]
    async fn server_error_frame_discards_empty_reply() {
        let session = session_with(ScriptedTransport::new(vec![Script::Chunks(vec![
            ": heartbeat\n\n",
            "event: error\ndata: boom\n\n",
            "event: token\ndata: late\n\n",
        ])]));

        let mut handle = session.send(UserInput::text("halo")).await.expect("send");
        let message_id = handle.message_id();
        let events = drain(&mut handle).await;

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Error {
                message_id,
                failure: StreamFailure::Server {
                    message: "boom".into()
                }
            })
        );
        assert!(session.conversation().get(message_id).is_none());
    }

    #[tokio::test]
    async fn unavailable_stream_falls_back_to_complete() {
        let transport = ScriptedTransport::new(vec![Script::Unavailable]);
        let session = session_with(transport.clone());

        let mut handle = session.send(UserInput::text("halo")).await.expect("send");
        let events = drain(&mut handle).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error {
                failure: StreamFailure::Unavailable,
                ..
            })
        ));

        let reply = session.reply_without_stream().await.expect("fallback");
        assert_eq!(reply.content, "Balasan lengkap");
        let conversation = session.conversation();
        assert_eq!(conversation.last().map(|m| m.id), Some(reply.id));
        assert_eq!(conversation.count_role(Role::User), 1);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let session = session_with(ScriptedTransport::new(Vec::new()));
        assert!(matches!(
            session.send(UserInput::text("   ")).await,
            Err(ChatError::Validation(_))
        ));
        assert_eq!(session.conversation().len(), 1);
    }

    #[tokio::test]
    async fn image_only_message_gets_placeholder_text() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(Vec::new())]);
        let session = session_with(transport.clone());
        let image = ImageAttachment {
            source: "kucing.png".into(),
            mime: "image/png".into(),
            data_url: "data:image/png;base64,AAAA".into(),
        };

        let handle = session
            .send(UserInput::text("").with_image(image))
            .await
            .expect("send");
        let _ = handle.finish().await;

        let conversation = session.conversation();
        let user = conversation.last_user_message().expect("user");
        assert_eq!(user.content, IMAGE_ONLY_TEXT);
        assert_eq!(user.image_ref.as_deref(), Some("kucing.png"));
        assert_eq!(
            transport.requests()[0].image_base64.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[tokio::test]
    async fn clear_cancels_and_reseeds() {
        let session = session_with(ScriptedTransport::new(vec![Script::Pending]));
        let handle = session.send(UserInput::text("halo")).await.expect("send");
        session.clear("Mulai lagi!");

        assert_eq!(handle.state(), SessionState::Cancelled);
        let conversation = session.conversation();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].content, "Mulai lagi!");
    }

    #[test]
    fn restored_streaming_messages_are_settled() {
        let mut partial = ChatMessage::assistant("setengah jalan");
        partial.streaming = true;
        let mut empty = ChatMessage::assistant("");
        empty.streaming = true;
        let conversation =
            Conversation::from_messages(vec![ChatMessage::user("halo"), partial, empty]);

        let session = session_with(ScriptedTransport::new(Vec::new()));
        let restored = ChatSession::new(session.client.clone(), conversation);
        let conversation = restored.conversation();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.streaming_count(), 0);
    }
}
