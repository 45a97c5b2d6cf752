//! Bridge engine
//!
//! A single task owns the transport and the [`Session`]. It selects over
//! remote output, requests from [`BridgeHandle`]s, and the driver's next
//! deadline. Events are handed to the registered handlers one at a time; the
//! loop waits for each handler before reading more remote output.
//!
//! Handlers run inside the loop, so a handler must not await a verb on a
//! [`BridgeHandle`] (that verb is only served once the handler returns).
//! Spawn a task for that instead.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use super::handler::EventHandler;
use crate::config::Config;
use crate::core::classify::{ChatEvent, EventKind, ListingKind};
use crate::core::driver::{RawKey, Request, Status, Ticket};
use crate::core::session::Session;
use crate::core::transport::Transport;
use crate::error::{BridgeError, Result};

const READ_BUFFER: usize = 4096;

enum Command {
    Submit {
        request: Request,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<Status>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable entry point for everything that wants the remote to act
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Command>,
}

impl BridgeHandle {
    async fn submit(&self, request: Request) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Submit { request, reply })
            .await
            .map_err(|_| BridgeError::Disconnected)?;
        rx.await.map_err(|_| BridgeError::Disconnected)?
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.submit(Request::Chat(text.into())).await
    }

    pub async fn goto_room(&self, room: impl Into<String>) -> Result<()> {
        self.submit(Request::Goto(room.into())).await
    }

    pub async fn emote(&self, action: impl Into<String>) -> Result<()> {
        self.submit(Request::Emote(action.into())).await
    }

    /// Private message to a user in our current room
    pub async fn send_private(&self, to: impl Into<String>, text: impl Into<String>) -> Result<()> {
        self.submit(Request::Private {
            to: to.into(),
            room: None,
            text: text.into(),
        })
        .await
    }

    pub async fn request_who(&self) -> Result<()> {
        self.submit(Request::Listing(ListingKind::Who)).await
    }

    pub async fn request_room_list(&self) -> Result<()> {
        self.submit(Request::Listing(ListingKind::Rooms)).await
    }

    pub async fn request_idle(&self) -> Result<()> {
        self.submit(Request::Listing(ListingKind::Idle)).await
    }

    /// Who listing of another room
    pub async fn request_who_in(&self, room: impl Into<String>) -> Result<()> {
        self.submit(Request::WhoIn(room.into())).await
    }

    /// Show recent history of another room without going there
    pub async fn peek_room(&self, room: impl Into<String>) -> Result<()> {
        self.submit(Request::Peek(room.into())).await
    }

    /// Ask the remote to replay recent room history
    pub async fn review(&self) -> Result<()> {
        self.submit(Request::Raw(RawKey::Review)).await
    }

    /// Replay a given number of history lines
    pub async fn review_lines(&self, lines: u32) -> Result<()> {
        self.submit(Request::ReviewLines(lines)).await
    }

    /// Ask the remote for its own help screen
    pub async fn help(&self) -> Result<()> {
        self.submit(Request::Raw(RawKey::Help)).await
    }

    pub async fn status(&self) -> Result<Status> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| BridgeError::Disconnected)?;
        rx.await.map_err(|_| BridgeError::Disconnected)
    }

    /// Quit the remote program and end the session; every pending request
    /// fails with `Disconnected`
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Disconnect { reply })
            .await
            .map_err(|_| BridgeError::Disconnected)?;
        // The loop may exit before replying; either way we are disconnected
        let _ = rx.await;
        Ok(())
    }
}

pub struct Bridge<T: Transport> {
    config: Config,
    transport: T,
    session: Session,
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    tx: mpsc::Sender<Command>,
    requests: mpsc::Receiver<Command>,
    waiters: HashMap<Ticket, oneshot::Sender<Result<()>>>,
    lost_reported: u64,
}

enum Flow {
    Continue,
    Stop,
}

impl<T: Transport> Bridge<T> {
    pub fn new(config: Config, transport: T) -> Result<Self> {
        let session = Session::new(&config)?;
        let (tx, requests) = mpsc::channel(config.bridge.request_buffer.max(1));
        Ok(Self {
            config,
            transport,
            session,
            handlers: HashMap::new(),
            tx,
            requests,
            waiters: HashMap::new(),
            lost_reported: 0,
        })
    }

    /// Register a handler for one event kind; handlers run in registration order
    pub fn on(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle { tx: self.tx.clone() }
    }

    /// Drive the session until the remote hangs up, the transport fails, or
    /// a handle asks to disconnect.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; READ_BUFFER];
        tracing::info!(
            "bridge running as {:?} ({}x{})",
            self.config.identity.username,
            self.config.terminal.cols,
            self.config.terminal.rows
        );

        let outcome = loop {
            let deadline = self.session.deadline();
            let step = tokio::select! {
                read = self.transport.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!("remote closed the connection");
                        Ok(Flow::Stop)
                    }
                    Ok(n) => self.on_output(&buf[..n]).await.map(|()| Flow::Continue),
                    Err(e) => Err(e.into()),
                },
                Some(command) = self.requests.recv() => Ok(self.on_command(command)),
                _ = sleep_until_deadline(deadline) => {
                    self.session.tick(Instant::now());
                    Ok(Flow::Continue)
                }
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
            if let Err(e) = self.flush().await {
                break Err(e);
            }
        };

        self.shutdown().await;
        if let Err(e) = &outcome {
            tracing::error!("bridge stopped: {}", e);
        }
        outcome
    }

    async fn on_output(&mut self, bytes: &[u8]) -> Result<()> {
        let ingest = self.session.ingest(bytes, Instant::now());

        for response in &ingest.responses {
            self.transport.write(&response.to_bytes()).await?;
        }

        let lost = self.session.lost_lines();
        if lost > self.lost_reported {
            tracing::warn!("{} remote line(s) lost so far", lost);
            self.lost_reported = lost;
        }

        dispatch(&self.handlers, self.config.bridge.filter_system, ingest.events).await;
        Ok(())
    }

    fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Submit { request, reply } => match self.session.submit(request, Instant::now()) {
                Ok(ticket) if self.config.bridge.await_completion => {
                    self.waiters.insert(ticket, reply);
                }
                Ok(_) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Status { reply } => {
                let _ = reply.send(self.session.status());
            }
            Command::Disconnect { reply } => {
                tracing::info!("disconnect requested");
                self.session.quit();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Write pending keystrokes and resolve finished requests
    async fn flush(&mut self) -> Result<()> {
        let output = self.session.take_output();
        if !output.is_empty() {
            tracing::trace!("typing {:?}", String::from_utf8_lossy(&output));
            self.transport.write(&output).await?;
        }
        self.resolve();
        Ok(())
    }

    fn resolve(&mut self) {
        for completion in self.session.take_completions() {
            if let Some(waiter) = self.waiters.remove(&completion.ticket) {
                let _ = waiter.send(completion.result);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.session.close();
        let farewell = self.session.take_output();
        if !farewell.is_empty() {
            if let Err(e) = self.transport.write(&farewell).await {
                tracing::debug!("could not type quit: {}", e);
            }
        }
        self.resolve();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(BridgeError::Disconnected));
        }
        self.requests.close();
        while let Ok(command) = self.requests.try_recv() {
            match command {
                Command::Submit { reply, .. } => {
                    let _ = reply.send(Err(BridgeError::Disconnected));
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.session.status());
                }
                Command::Disconnect { reply } => {
                    let _ = reply.send(());
                }
            }
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("transport close failed: {}", e);
        }
        tracing::info!("session closed");
    }
}

/// Hand events to their handlers, one at a time, in arrival order
async fn dispatch(handlers: &HashMap<EventKind, Vec<Arc<dyn EventHandler>>>, filter_system: bool, events: Vec<ChatEvent>) {
    for event in events {
        if event.self_origin {
            tracing::trace!("dropping our own echo: {}", event.raw);
            continue;
        }
        if event.kind == EventKind::System && filter_system {
            tracing::debug!("system: {}", event.raw);
            continue;
        }
        let Some(registered) = handlers.get(&event.kind) else {
            continue;
        };
        for handler in registered {
            if let Err(e) = handler.handle(&event).await {
                tracing::warn!("{:?} handler failed: {:#}", event.kind, e);
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ChannelTransport, RemoteEnd};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct Recorder {
        tx: mpsc::UnboundedSender<ChatEvent>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &ChatEvent) -> anyhow::Result<()> {
            let _ = self.tx.send(event.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl EventHandler for Broken {
        async fn handle(&self, _event: &ChatEvent) -> anyhow::Result<()> {
            anyhow::bail!("endpoint down")
        }
    }

    struct Harness {
        handle: BridgeHandle,
        remote: RemoteEnd,
        events: mpsc::UnboundedReceiver<ChatEvent>,
        task: JoinHandle<Result<()>>,
    }

    fn start_with(edit: impl FnOnce(&mut Config)) -> Harness {
        let mut config = Config::default();
        config.identity.username = "me".to_string();
        edit(&mut config);

        let (transport, remote) = ChannelTransport::pair();
        let (tx, events) = mpsc::unbounded_channel();
        let mut bridge = Bridge::new(config, transport).unwrap();
        let recorder: Arc<dyn EventHandler> = Arc::new(Recorder { tx });
        for kind in EventKind::ALL {
            bridge.on(kind, recorder.clone());
        }
        let handle = bridge.handle();
        let task = tokio::spawn(bridge.run());
        Harness {
            handle,
            remote,
            events,
            task,
        }
    }

    fn start() -> Harness {
        start_with(|_| {})
    }

    async fn typed(remote: &mut RemoteEnd) -> String {
        String::from_utf8(remote.recv().await.unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_echo_is_not_dispatched() {
        let mut h = start();

        h.remote.send("[me@sdf] hello\r\n[alice@sdf] hi me\r\n");
        let event = h.events.recv().await.unwrap();

        assert_eq!(event.username.as_deref(), Some("alice"));
        assert_eq!(event.content, "hi me");
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_filter() {
        let mut h = start();

        h.remote.send("*** welcome\r\n[bob@sdf] x\r\n");
        assert_eq!(h.events.recv().await.unwrap().kind, EventKind::Chat);

        let mut h = start_with(|c| c.bridge.filter_system = false);
        h.remote.send("*** welcome\r\n");
        assert_eq!(h.events.recv().await.unwrap().kind, EventKind::System);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_errors_do_not_stop_the_loop() {
        let (transport, remote) = ChannelTransport::pair();
        let mut config = Config::default();
        config.identity.username = "me".to_string();
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut bridge = Bridge::new(config, transport).unwrap();
        bridge
            .on(EventKind::Chat, Arc::new(Broken))
            .on(EventKind::Chat, Arc::new(Recorder { tx }));
        tokio::spawn(bridge.run());

        remote.send("[a@sdf] one\r\n[b@sdf] two\r\n");
        assert_eq!(events.recv().await.unwrap().content, "one");
        assert_eq!(events.recv().await.unwrap().content, "two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_gotos() {
        let mut h = start();

        let first = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.goto_room("anonradio").await }
        });
        assert_eq!(typed(&mut h.remote).await, "g");

        let second = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.goto_room("spacebar").await }
        });
        tokio::task::yield_now().await;

        h.remote.send("\r\ngoto room: ");
        assert_eq!(typed(&mut h.remote).await, "anonradio\n");
        assert!(h.remote.drain().is_empty());

        h.remote.send("anonradio\r\n[you are in 'anonradio' among 3]\r\n");
        first.await.unwrap().unwrap();

        // Second goto starts only after the first finished
        assert_eq!(typed(&mut h.remote).await, "g");
        h.remote.send("\r\ngoto room: ");
        assert_eq!(typed(&mut h.remote).await, "spacebar\n");
        h.remote.send("spacebar\r\n[you are in 'spacebar' among 1]\r\n");
        second.await.unwrap().unwrap();

        assert_eq!(h.handle.status().await.unwrap().room, "spacebar");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_recovery() {
        let mut h = start();

        let started = Instant::now();
        let result = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.goto_room("nowhere").await }
        });
        assert_eq!(typed(&mut h.remote).await, "g");

        let err = result.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(typed(&mut h.remote).await, "\n");

        let chat = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.send_chat("back again").await }
        });
        assert_eq!(typed(&mut h.remote).await, " ");
        h.remote.send(":");
        assert_eq!(typed(&mut h.remote).await, "back again\n");
        chat.await.unwrap().unwrap();

        let status = h.handle.status().await.unwrap();
        assert_eq!(status.room, "lobby");
        assert_eq!(status.in_flight, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_only_mode_resolves_immediately() {
        let mut h = start_with(|c| c.bridge.await_completion = false);

        h.handle.request_who().await.unwrap();
        assert_eq!(typed(&mut h.remote).await, "w");
        assert_eq!(h.handle.status().await.unwrap().in_flight.as_deref(), Some("who"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_rows_reach_handlers() {
        let mut h = start();

        let listing = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.request_room_list().await }
        });
        assert_eq!(typed(&mut h.remote).await, "l");

        h.remote.send("room      users\r\nlobby     12\r\nanonradio 4\r\nspacebar  1\r\n\r\n");
        listing.await.unwrap().unwrap();

        let mut rows = Vec::new();
        for _ in 0..3 {
            rows.push(h.events.recv().await.unwrap());
        }
        assert!(rows.iter().all(|e| e.kind == EventKind::RoomList));
        assert_eq!(rows[1].content, "anonradio 4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_status_is_answered() {
        let mut h = start();

        h.remote.send("ab\x1b[6n");
        assert_eq!(typed(&mut h.remote).await, "\x1b[1;3R");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_pending() {
        let mut h = start();

        let pending = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.goto_room("anonradio").await }
        });
        assert_eq!(typed(&mut h.remote).await, "g");

        h.handle.disconnect().await.unwrap();
        assert!(matches!(pending.await.unwrap(), Err(BridgeError::Disconnected)));
        h.task.await.unwrap().unwrap();
        assert!(matches!(h.handle.send_chat("late").await, Err(BridgeError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_types_quit_key() {
        let mut h = start();

        h.handle.disconnect().await.unwrap();
        h.task.await.unwrap().unwrap();
        assert_eq!(typed(&mut h.remote).await, "q");
        assert_eq!(h.remote.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_who_in_other_room() {
        let mut h = start();

        let listing = tokio::spawn({
            let handle = h.handle.clone();
            async move { handle.request_who_in("spacebar").await }
        });
        assert_eq!(typed(&mut h.remote).await, "Wspacebar\n");

        h.remote.send("username  host\r\nzed       sdf\r\n\r\n");
        listing.await.unwrap().unwrap();
        let row = h.events.recv().await.unwrap();
        assert_eq!(row.kind, EventKind::WhoList);
        assert_eq!(row.username.as_deref(), Some("zed"));
        assert_eq!(h.handle.status().await.unwrap().roster, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_hang_up_ends_run() {
        let mut h = start();

        h.remote.hang_up();
        h.task.await.unwrap().unwrap();
        assert!(matches!(h.handle.status().await, Err(BridgeError::Disconnected)));
    }
}
