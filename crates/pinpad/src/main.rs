mod collector;
mod sink;
mod state_machine;

use anyhow::{Context, Result};
use pinpad_core::config::{self, Config};
use pinpad_core::ipc::{self, ClientMsg, DaemonMsg};
use sink::Recorder;
use state_machine::{Action, StateMachine};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

/// Shared state between the timer loop and IPC handlers.
struct Shared {
    machine: StateMachine,
    recorder: Recorder,
    /// Channels to send messages to connected display clients.
    display_txs: Vec<mpsc::UnboundedSender<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pinpad=info".parse()?),
        )
        .init();

    info!("pinpad starting");

    let config = Config::load().context("loading config")?;
    let sink = sink::from_config(&config.sink).context("building attempt sink")?;
    let recorder = Recorder::new(sink);
    info!(sink = recorder.sink_name(), "attempt sink ready");

    let shared = Arc::new(Mutex::new(Shared {
        machine: StateMachine::new(&config),
        recorder,
        display_txs: Vec::new(),
    }));
    // Woken by IPC handlers whenever a key may have scheduled a transition.
    let wake = Arc::new(Notify::new());

    // Start IPC listener
    let socket_path = config::socket_path();
    // Remove stale socket
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding socket {}", socket_path.display()))?;
    // PIN digits travel over this socket: owner only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600)).ok();
    }
    info!(path = %socket_path.display(), "IPC socket listening");

    let shared_ipc = Arc::clone(&shared);
    let wake_ipc = Arc::clone(&wake);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let shared = Arc::clone(&shared_ipc);
                    let wake = Arc::clone(&wake_ipc);
                    tokio::spawn(handle_ipc_client(stream, shared, wake));
                }
                Err(e) => {
                    warn!(error = %e, "IPC accept error");
                }
            }
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
    };
    run(shared, wake, shutdown).await;

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Sleep until the sequencer's next deadline (no idle wakeups) and fire it,
/// until `shutdown` resolves. Any transition still pending at that point is
/// cancelled.
async fn run(shared: Arc<Mutex<Shared>>, wake: Arc<Notify>, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    loop {
        let deadline = shared.lock().await.machine.next_deadline();
        let sleep_fut = match deadline {
            Some(dl) => tokio::time::sleep_until(tokio::time::Instant::from_std(dl)),
            None => tokio::time::sleep(std::time::Duration::from_secs(86400)),
        };
        let has_deadline = deadline.is_some();

        tokio::select! {
            _ = sleep_fut, if has_deadline => {
                let mut shared = shared.lock().await;
                let actions = shared.machine.check_timer();
                process_actions(&mut shared, actions);
            }
            _ = wake.notified() => {}
            _ = &mut shutdown => break,
        }
    }

    info!("pinpad shutting down");
    if shared.lock().await.machine.cancel_pending() {
        info!("cancelled pending transition");
    }
}

fn process_actions(shared: &mut Shared, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Record(record) => {
                // Detached; the write may land after later transitions.
                let _ = shared.recorder.record(record);
            }
            Action::Render(view) => {
                broadcast(shared, &DaemonMsg::View(view));
            }
            Action::Navigate(target) => {
                info!(destination = %target, "PIN confirmed, navigating");
                broadcast(shared, &DaemonMsg::Navigate { target });
            }
        }
    }
}

fn broadcast(shared: &mut Shared, msg: &DaemonMsg) {
    let line = ipc::encode(msg);
    shared.display_txs.retain(|tx| tx.send(line.clone()).is_ok());
}

async fn handle_ipc_client(stream: UnixStream, shared: Arc<Mutex<Shared>>, wake: Arc<Notify>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Channel for sending messages back to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Writer task
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut is_display = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(msg) = ipc::decode_client(&line) else {
            debug!("ignoring malformed IPC line");
            continue;
        };

        let mut shared = shared.lock().await;

        match msg {
            ClientMsg::Press { key } => {
                let actions = shared.machine.process_key(key);
                let accepted = !actions.is_empty();
                process_actions(&mut shared, actions);
                wake.notify_one();
                let ack = DaemonMsg::Ack {
                    ok: accepted,
                    message: if accepted {
                        format!("pressed {}", key)
                    } else {
                        format!("ignored {}", key)
                    },
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::RegisterDisplay => {
                is_display = true;
                shared.display_txs.push(tx.clone());
                let ack = DaemonMsg::Ack {
                    ok: true,
                    message: "display registered".into(),
                };
                let _ = tx.send(ipc::encode(&ack));
                // Bring the new display up to date immediately.
                let _ = tx.send(ipc::encode(&DaemonMsg::View(shared.machine.view())));
            }
            ClientMsg::Reset => {
                info!("session reset via IPC");
                let actions = shared.machine.reset();
                process_actions(&mut shared, actions);
                wake.notify_one();
                let ack = DaemonMsg::Ack {
                    ok: true,
                    message: "session reset".into(),
                };
                let _ = tx.send(ipc::encode(&ack));
            }
            ClientMsg::GetStatus => {
                let status = DaemonMsg::Status {
                    phase: shared.machine.phase(),
                    feedback: shared.machine.feedback(),
                    filled: shared.machine.pin_len(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                };
                let _ = tx.send(ipc::encode(&status));
            }
        }
    }

    // The writer task owns the receiver; stop it first so our sender reads
    // as closed.
    write_handle.abort();
    let _ = write_handle.await;

    if is_display {
        let mut shared = shared.lock().await;
        shared.display_txs.retain(|t| !t.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::tests::FailingSink;
    use crate::sink::LogSink;
    use pinpad_core::keypad::Key;
    use pinpad_core::view::{Feedback, Phase};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::Lines;
    use tokio::net::unix::OwnedReadHalf;

    fn shared_with(sink: Arc<FailingSink>) -> (Shared, mpsc::UnboundedReceiver<String>) {
        let mut config = Config::default();
        config.timing.confirm_delay_ms = 10;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            machine: StateMachine::new(&config),
            recorder: Recorder::new(sink),
            display_txs: vec![tx],
        };
        (shared, rx)
    }

    fn daemon_state(confirm_delay_ms: u64) -> Arc<Mutex<Shared>> {
        let mut config = Config::default();
        config.timing.confirm_delay_ms = confirm_delay_ms;
        Arc::new(Mutex::new(Shared {
            machine: StateMachine::new(&config),
            recorder: Recorder::new(Arc::new(LogSink)),
            display_txs: Vec::new(),
        }))
    }

    /// Connect a client to a fresh handler task.
    fn connect(
        shared: &Arc<Mutex<Shared>>,
        wake: &Arc<Notify>,
    ) -> (
        Lines<BufReader<OwnedReadHalf>>,
        tokio::net::unix::OwnedWriteHalf,
        tokio::task::JoinHandle<()>,
    ) {
        let (client, server) = UnixStream::pair().unwrap();
        let handler = tokio::spawn(handle_ipc_client(
            server,
            Arc::clone(shared),
            Arc::clone(wake),
        ));
        let (reader, writer) = client.into_split();
        (BufReader::new(reader).lines(), writer, handler)
    }

    async fn send(writer: &mut tokio::net::unix::OwnedWriteHalf, msg: &ClientMsg) {
        writer.write_all(ipc::encode(msg).as_bytes()).await.unwrap();
    }

    async fn next_msg(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> DaemonMsg {
        let line = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("timed out waiting for daemon")
            .unwrap()
            .expect("daemon closed the connection");
        ipc::decode_daemon(&line).expect("undecodable daemon line")
    }

    fn press_all(shared: &mut Shared, digits: &str) {
        for key in Key::parse_digits(digits).unwrap() {
            let actions = shared.machine.process_key(key);
            process_actions(shared, actions);
        }
    }

    fn drain_views(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<DaemonMsg> {
        let mut msgs = Vec::new();
        while let Ok(line) = rx.try_recv() {
            msgs.extend(ipc::decode_daemon(&line));
        }
        msgs
    }

    #[tokio::test]
    async fn sink_failure_does_not_delay_confirm_transition() {
        let sink = Arc::new(FailingSink::default());
        let (mut shared, mut rx) = shared_with(sink.clone());

        press_all(&mut shared, "1234");
        let msgs = drain_views(&mut rx);
        assert_eq!(msgs.len(), 4, "one view per digit");

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let actions = shared.machine.check_timer();
        process_actions(&mut shared, actions);

        assert_eq!(shared.machine.phase(), Phase::Confirming);
        assert_eq!(shared.machine.pin_len(), 0);
        match drain_views(&mut rx).last() {
            Some(DaemonMsg::View(view)) => assert_eq!(view.phase, Phase::Confirming),
            other => panic!("expected view, got {:?}", other),
        }
        // The failed write was attempted exactly once and never retried.
        tokio::task::yield_now().await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_display_channels_are_dropped() {
        let (mut shared, rx) = shared_with(Arc::new(FailingSink::default()));
        drop(rx);
        press_all(&mut shared, "1");
        assert!(shared.display_txs.is_empty());
    }

    #[tokio::test]
    async fn navigate_is_broadcast_to_displays() {
        let (mut shared, mut rx) = shared_with(Arc::new(FailingSink::default()));
        process_actions(&mut shared, vec![Action::Navigate("success.html".into())]);
        match drain_views(&mut rx).as_slice() {
            [DaemonMsg::Navigate { target }] => assert_eq!(target, "success.html"),
            other => panic!("expected one navigate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn mismatch_broadcasts_error_view() {
        let (mut shared, mut rx) = shared_with(Arc::new(FailingSink::default()));
        press_all(&mut shared, "1234");
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let actions = shared.machine.check_timer();
        process_actions(&mut shared, actions);
        drain_views(&mut rx);

        press_all(&mut shared, "9999");
        match drain_views(&mut rx).last() {
            Some(DaemonMsg::View(view)) => {
                assert_eq!(view.feedback, Feedback::Error);
                assert_eq!(view.filled, 4);
            }
            other => panic!("expected error view, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn press_over_socket_acks_and_updates_registered_display() {
        let shared = daemon_state(1500);
        let wake = Arc::new(Notify::new());

        let (mut display_lines, mut display_writer, _display) = connect(&shared, &wake);
        send(&mut display_writer, &ClientMsg::RegisterDisplay).await;
        assert!(matches!(
            next_msg(&mut display_lines).await,
            DaemonMsg::Ack { ok: true, .. }
        ));
        match next_msg(&mut display_lines).await {
            DaemonMsg::View(view) => assert_eq!(view.filled, 0),
            other => panic!("expected initial view, got {:?}", other),
        }

        let (mut keypad_lines, mut keypad_writer, _keypad) = connect(&shared, &wake);
        send(
            &mut keypad_writer,
            &ClientMsg::Press {
                key: Key::digit(1).unwrap(),
            },
        )
        .await;
        match next_msg(&mut keypad_lines).await {
            DaemonMsg::Ack { ok, message } => {
                assert!(ok);
                assert_eq!(message, "pressed 1");
            }
            other => panic!("expected ack, got {:?}", other),
        }
        match next_msg(&mut display_lines).await {
            DaemonMsg::View(view) => {
                assert_eq!(view.filled, 1);
                assert_eq!(view.phase, Phase::Entering);
            }
            other => panic!("expected view, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_over_socket_reports_filled_count() {
        let shared = daemon_state(1500);
        let wake = Arc::new(Notify::new());
        press_all(&mut *shared.lock().await, "12");

        let (mut lines, mut writer, _handler) = connect(&shared, &wake);
        send(&mut writer, &ClientMsg::GetStatus).await;
        match next_msg(&mut lines).await {
            DaemonMsg::Status {
                phase,
                feedback,
                filled,
                ..
            } => {
                assert_eq!(phase, Phase::Entering);
                assert_eq!(feedback, Feedback::Idle);
                assert_eq!(filled, 2);
            }
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnected_display_is_unregistered() {
        let shared = daemon_state(1500);
        let wake = Arc::new(Notify::new());

        let (mut lines, mut writer, handler) = connect(&shared, &wake);
        send(&mut writer, &ClientMsg::RegisterDisplay).await;
        assert!(matches!(next_msg(&mut lines).await, DaemonMsg::Ack { ok: true, .. }));
        assert_eq!(shared.lock().await.display_txs.len(), 1);

        drop(writer);
        drop(lines);
        handler.await.unwrap();

        assert!(shared.lock().await.display_txs.is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_transition() {
        let shared = daemon_state(1500);
        {
            let mut shared = shared.lock().await;
            press_all(&mut shared, "1234");
            assert!(shared.machine.next_deadline().is_some());
        }

        run(Arc::clone(&shared), Arc::new(Notify::new()), async {}).await;

        let shared = shared.lock().await;
        assert_eq!(shared.machine.next_deadline(), None);
        // The confirm transition never ran.
        assert_eq!(shared.machine.phase(), Phase::Entering);
    }

    #[tokio::test]
    async fn run_fires_due_transitions_until_shutdown() {
        let shared = daemon_state(10);
        press_all(&mut *shared.lock().await, "1234");

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        run(Arc::clone(&shared), Arc::new(Notify::new()), shutdown).await;

        let shared = shared.lock().await;
        assert_eq!(shared.machine.phase(), Phase::Confirming);
        assert_eq!(shared.machine.pin_len(), 0);
        assert_eq!(shared.machine.next_deadline(), None);
    }
}
