//! Client playback engine — real-time rendering of streamed synthesis frames.
//!
//! The audio-rendering path lives on a dedicated OS thread (rodio's output
//! stream is tied to the thread that owns it, and decode timing must not be
//! subject to controller jank). All cross-context communication is message
//! passing: the controller feeds raw sample chunks in, the renderer reports
//! back how much it actually played and whether it is padding with silence.
//!
//! Every asynchronous callback — socket message, socket error, socket close,
//! renderer report — holds the [`SessionToken`] captured when it was
//! registered and discards itself when a newer session has started. That is
//! the sole defense against a stopped stream corrupting its replacement.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use futures_util::StreamExt;
use rodio::{OutputStream, Sink, Source};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, error};

use folio_core::session::{SessionCounter, SessionToken};
use folio_core::types::{PlaybackConfig, PlaybackState, PlaybackStatus};
use folio_core::wav::SAMPLE_RATE;

use crate::frame::{Frame, decode_frame, samples_from_bytes};
use crate::synth::{open_stream, send_stop};

/// Samples consumed between renderer progress reports (~50 ms at 24 kHz).
const REPORT_EVERY: usize = 1200;
/// Consecutive silent reports required — with the socket closed and the
/// buffer drained — before a session is declared finished. Debounces
/// transient underruns while audio is still in flight.
const SILENCE_RUN: u32 = 4;
/// How long the renderer waits for data before padding with silence.
const UNDERRUN_WAIT: Duration = Duration::from_millis(10);

// ─── Renderer side ─────────────────────────────────────────────────────────

/// Feedback from the renderer: how many real samples it consumed since the
/// last report, and whether the most recently played frame was silence
/// padding (the buffer had temporarily run dry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderReport {
    pub consumed: usize,
    pub silent: bool,
}

enum RenderCmd {
    Play(ChannelSource),
    Stop,
    Pause,
    Resume,
}

/// A rodio `Source` fed by a channel of PCM chunks.
///
/// Yields real samples while the buffer holds any; on a 10 ms underrun it
/// yields a silence sample instead so the sink never starves. Ends only when
/// the sample sender is dropped and the buffer is drained.
struct ChannelSource {
    rx: std_mpsc::Receiver<Vec<i16>>,
    report_tx: mpsc::UnboundedSender<RenderReport>,
    buffer: VecDeque<i16>,
    pending: usize,
    disconnected: bool,
}

impl ChannelSource {
    fn new(rx: std_mpsc::Receiver<Vec<i16>>, report_tx: mpsc::UnboundedSender<RenderReport>) -> Self {
        Self {
            rx,
            report_tx,
            buffer: VecDeque::with_capacity(8192),
            pending: 0,
            disconnected: false,
        }
    }

    fn consumed(&mut self, sample: i16) -> Option<i16> {
        self.pending += 1;
        if self.pending >= REPORT_EVERY {
            let _ = self.report_tx.send(RenderReport {
                consumed: std::mem::take(&mut self.pending),
                silent: false,
            });
        }
        Some(sample)
    }

    fn pad(&mut self) -> Option<i16> {
        let _ = self.report_tx.send(RenderReport {
            consumed: std::mem::take(&mut self.pending),
            silent: true,
        });
        Some(0)
    }

    fn flush(&mut self) {
        if self.pending > 0 {
            let _ = self.report_tx.send(RenderReport {
                consumed: std::mem::take(&mut self.pending),
                silent: false,
            });
        }
    }
}

impl Iterator for ChannelSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if let Some(sample) = self.buffer.pop_front() {
            return self.consumed(sample);
        }

        // Drain whatever is immediately available.
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.buffer.extend(chunk),
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }

        if self.buffer.is_empty() && !self.disconnected {
            match self.rx.recv_timeout(UNDERRUN_WAIT) {
                Ok(chunk) => self.buffer.extend(chunk),
                Err(std_mpsc::RecvTimeoutError::Timeout) => return self.pad(),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => self.disconnected = true,
            }
        }

        match self.buffer.pop_front() {
            Some(sample) => self.consumed(sample),
            None if self.disconnected => {
                self.flush();
                None
            }
            None => self.pad(),
        }
    }
}

impl Source for ChannelSource {
    fn current_frame_len(&self) -> Option<usize> {
        if self.buffer.is_empty() {
            Some(1)
        } else {
            Some(self.buffer.len())
        }
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Renderer OS thread: owns the output stream, swaps sinks on command.
fn renderer_thread(
    mut cmd_rx: mpsc::UnboundedReceiver<RenderCmd>,
    ready_tx: std_mpsc::Sender<Result<(), String>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to open audio output: {e}")));
            return;
        }
    };
    let mut sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to create audio sink: {e}")));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            RenderCmd::Play(source) => {
                sink.stop();
                sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("renderer: failed to recreate sink: {e}");
                        return;
                    }
                };
                sink.append(source);
                sink.play();
            }
            RenderCmd::Stop => {
                sink.stop();
            }
            RenderCmd::Pause => sink.pause(),
            RenderCmd::Resume => sink.play(),
        }
    }
    sink.stop();
}

// ─── Controller side ───────────────────────────────────────────────────────

/// Apply a status mutation only if `token` still names the live session.
fn update_if_current(
    status_tx: &watch::Sender<PlaybackStatus>,
    token: &SessionToken,
    f: impl FnOnce(&mut PlaybackStatus),
) {
    if token.is_current() {
        status_tx.send_modify(f);
    }
}

/// The session is finished only when all three hold at once: upstream closed
/// (or stop requested), everything buffered has been consumed, and enough
/// consecutive silent reports have arrived to rule out a transient underrun.
fn is_finished(socket_closed: bool, buffered: usize, consumed: usize, silent_run: u32) -> bool {
    socket_closed && buffered == consumed && silent_run >= SILENCE_RUN
}

/// Cloneable handle to the playback engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: PlaybackConfig,
    sessions: SessionCounter,
    render_tx: mpsc::UnboundedSender<RenderCmd>,
    status_tx: watch::Sender<PlaybackStatus>,
    status_rx: watch::Receiver<PlaybackStatus>,
    stop_signal: Notify,
    renderer_error: Option<String>,
}

impl PlaybackEngine {
    /// Spawn the renderer thread and return a handle. A renderer that cannot
    /// open the audio output is remembered; every subsequent `play` reports
    /// `error` immediately without attempting audio.
    pub fn new(config: PlaybackConfig) -> Self {
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        std::thread::Builder::new()
            .name("folio-renderer".into())
            .spawn(move || renderer_thread(render_rx, ready_tx))
            .expect("failed to spawn renderer thread");

        let renderer_error = match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some("renderer did not start".to_string()),
        };
        if let Some(e) = &renderer_error {
            error!("playback renderer unavailable: {e}");
        }

        let (status_tx, status_rx) = watch::channel(PlaybackStatus::idle());
        Self {
            inner: Arc::new(EngineInner {
                config,
                sessions: SessionCounter::new(),
                render_tx,
                status_tx,
                status_rx,
                stop_signal: Notify::new(),
                renderer_error,
            }),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.inner.status_rx.clone()
    }

    /// Start streaming one chunk of text. Returns the new session id; any
    /// previous session becomes stale immediately.
    pub fn play(&self, page_key: &str, text: &str, voice: Option<&str>) -> u64 {
        let token = self.inner.sessions.begin();
        let _ = self.inner.render_tx.send(RenderCmd::Stop);

        if let Some(e) = &self.inner.renderer_error {
            let message = e.clone();
            let key = page_key.to_string();
            self.inner.status_tx.send_modify(|s| {
                *s = PlaybackStatus::idle();
                s.session = token.id();
                s.state = PlaybackState::Error;
                s.page_key = Some(key);
                s.error = Some(message);
            });
            return token.id();
        }

        let key = page_key.to_string();
        self.inner.status_tx.send_modify(|s| {
            *s = PlaybackStatus::idle();
            s.session = token.id();
            s.state = PlaybackState::Connecting;
            s.page_key = Some(key);
        });

        let engine = self.clone();
        let text = text.to_string();
        let voice = voice.map(str::to_string);
        let id = token.id();
        tokio::spawn(async move {
            engine.stream_task(token, text, voice).await;
        });

        id
    }

    /// Stop the active session: best-effort stop message to the peer, local
    /// close, and an immediate state reset that does not wait for either.
    pub fn stop(&self) {
        self.inner.sessions.invalidate();
        self.inner.stop_signal.notify_one();
        let _ = self.inner.render_tx.send(RenderCmd::Stop);
        let session = self.inner.sessions.current();
        self.inner.status_tx.send_modify(|s| {
            s.session = session;
            s.state = PlaybackState::Idle;
            s.error = None;
        });
    }

    /// Suspend rendering without tearing down the connection, so resuming
    /// does not require re-synthesis.
    pub fn pause(&self) {
        self.inner.status_tx.send_modify(|s| {
            if s.state == PlaybackState::Streaming {
                let _ = self.inner.render_tx.send(RenderCmd::Pause);
                s.state = PlaybackState::Paused;
            }
        });
    }

    pub fn resume(&self) {
        self.inner.status_tx.send_modify(|s| {
            if s.state == PlaybackState::Paused {
                let _ = self.inner.render_tx.send(RenderCmd::Resume);
                s.state = PlaybackState::Streaming;
            }
        });
    }

    async fn stream_task(&self, token: SessionToken, text: String, voice: Option<String>) {
        let status_tx = &self.inner.status_tx;

        let mut ws = match open_stream(&self.inner.config.synth, &text, voice.as_deref()).await {
            Ok(ws) => ws,
            Err(e) => {
                update_if_current(status_tx, &token, |s| {
                    s.state = PlaybackState::Error;
                    s.error = Some(e.to_string());
                });
                return;
            }
        };

        if !token.is_current() {
            send_stop(&mut ws).await;
            return;
        }

        let (sample_tx, sample_rx) = std_mpsc::channel::<Vec<i16>>();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<RenderReport>();
        // Appended to the sink only once the first real audio arrives, so the
        // renderer never starts on an empty source.
        let mut source = Some(ChannelSource::new(sample_rx, report_tx));

        let mut buffered = 0usize;
        let mut consumed = 0usize;
        let mut started = false;
        let mut silent_run = 0u32;
        let mut socket_closed = false;
        let mut leftover: Option<u8> = None;

        loop {
            tokio::select! {
                _ = self.inner.stop_signal.notified() => {
                    if !token.is_current() {
                        send_stop(&mut ws).await;
                        return;
                    }
                }

                msg = ws.next(), if !socket_closed => {
                    if !token.is_current() {
                        send_stop(&mut ws).await;
                        return;
                    }
                    match msg {
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) | None => {
                            socket_closed = true;
                            debug!("synthesis stream closed ({buffered} samples buffered)");
                            // Peer closed without ever sending audio: nothing
                            // will reach the renderer, finish right away.
                            if source.is_some() {
                                update_if_current(status_tx, &token, |s| {
                                    s.state = PlaybackState::Idle;
                                });
                                return;
                            }
                        }
                        Some(Ok(msg)) => match decode_frame(&msg) {
                            Frame::Audio(bytes) => {
                                let (samples, carry) = samples_from_bytes(&bytes, leftover.take());
                                leftover = carry;
                                if samples.is_empty() {
                                    continue;
                                }
                                buffered += samples.len();
                                if let Some(src) = source.take() {
                                    let _ = sample_tx.send(samples);
                                    let _ = self.inner.render_tx.send(RenderCmd::Play(src));
                                    update_if_current(status_tx, &token, |s| {
                                        s.state = PlaybackState::Streaming;
                                    });
                                } else {
                                    let _ = sample_tx.send(samples);
                                }
                            }
                            Frame::Progress(seconds) => {
                                update_if_current(status_tx, &token, |s| {
                                    s.model_seconds = seconds;
                                });
                            }
                            Frame::Skip => {}
                        },
                        Some(Err(e)) => {
                            // Transport error mid-stream: error state, but the
                            // played-seconds counter survives.
                            error!("synthesis stream error: {e}");
                            update_if_current(status_tx, &token, |s| {
                                s.state = PlaybackState::Error;
                                s.error = Some(format!("synthesis connection failed: {e}"));
                            });
                            let _ = self.inner.render_tx.send(RenderCmd::Stop);
                            return;
                        }
                    }
                }

                report = report_rx.recv() => {
                    if !token.is_current() {
                        return;
                    }
                    let Some(report) = report else {
                        // Renderer tore the source down underneath us.
                        update_if_current(status_tx, &token, |s| {
                            s.state = if socket_closed { PlaybackState::Idle } else { PlaybackState::Error };
                        });
                        return;
                    };

                    consumed += report.consumed;
                    if report.silent {
                        silent_run += 1;
                    } else {
                        silent_run = 0;
                    }
                    if !started && consumed > 0 {
                        started = true;
                    }
                    if started {
                        update_if_current(status_tx, &token, |s| {
                            s.playback_seconds = consumed as f64 / SAMPLE_RATE as f64;
                        });
                    }

                    if is_finished(socket_closed, buffered, consumed, silent_run) {
                        debug!("playback finished: {consumed} samples rendered");
                        update_if_current(status_tx, &token, |s| {
                            s.state = PlaybackState::Idle;
                        });
                        let _ = self.inner.render_tx.send(RenderCmd::Stop);
                        return;
                    }
                }
            }
        }
    }
}
