//! Thread-safe handle to an [`AudioGraphEngine`]
//!
//! The engine owns a device stream, which must stay on the thread that
//! created it. [`PlayerHandle::spawn`] runs the engine on a dedicated thread
//! and forwards commands over a channel; commands are executed strictly in
//! arrival order, so a multi-step operation (e.g. a paused filter rebuild)
//! can never be interleaved with a concurrent `resume()` or `stop()`.

use crate::audio::decoder::DecodedAudio;
use crate::audio::engine::{AudioGraphEngine, EngineStatus};
use crate::audio::filters::FilterParam;
use crate::audio::lease::DeviceLeases;
use crate::audio::output::AudioOutput;
use crate::error::Result as CoreResult;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<CoreResult<T>>;

/// Commands sent to the engine thread
enum PlayerCommand {
    Load { path: PathBuf, reply: Reply<()> },
    LoadDecoded { audio: DecodedAudio, reply: Reply<()> },
    Play { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Stop { reply: Reply<()> },
    Seek { seconds: f64, reply: Reply<()> },
    SetFilters { params: Vec<FilterParam>, reply: Reply<()> },
    SetEnabled { enabled: bool, reply: Reply<()> },
    Status { reply: oneshot::Sender<EngineStatus> },
}

/// Handle to communicate with the engine thread
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    /// Spawn the engine on a dedicated thread
    ///
    /// `make_output` runs on the engine thread, so the output it returns
    /// never has to cross threads.
    pub fn spawn<F>(make_output: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> CoreResult<Box<dyn AudioOutput>> + Send + 'static,
    {
        Self::spawn_with_leases(make_output, DeviceLeases::new())
    }

    /// Spawn sharing channel claims with other sessions
    pub fn spawn_with_leases<F>(make_output: F, leases: DeviceLeases) -> anyhow::Result<Self>
    where
        F: FnOnce() -> CoreResult<Box<dyn AudioOutput>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<PlayerCommand>(32);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<CoreResult<()>>(1);

        std::thread::Builder::new()
            .name("roomeq-player".to_string())
            .spawn(move || {
                let output = match make_output() {
                    Ok(output) => {
                        let _ = ready_tx.send(Ok(()));
                        output
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let mut engine = AudioGraphEngine::new(output).with_leases(leases);

                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        PlayerCommand::Load { path, reply } => {
                            let _ = reply.send(engine.load(&path));
                        }
                        PlayerCommand::LoadDecoded { audio, reply } => {
                            engine.load_decoded(audio);
                            let _ = reply.send(Ok(()));
                        }
                        PlayerCommand::Play { reply } => {
                            let _ = reply.send(engine.play());
                        }
                        PlayerCommand::Pause { reply } => {
                            let _ = reply.send(engine.pause());
                        }
                        PlayerCommand::Resume { reply } => {
                            let _ = reply.send(engine.resume());
                        }
                        PlayerCommand::Stop { reply } => {
                            let _ = reply.send(engine.stop());
                        }
                        PlayerCommand::Seek { seconds, reply } => {
                            let _ = reply.send(engine.seek(seconds));
                        }
                        PlayerCommand::SetFilters { params, reply } => {
                            let _ = reply.send(engine.set_filters(params));
                        }
                        PlayerCommand::SetEnabled { enabled, reply } => {
                            let _ = reply.send(engine.set_enabled(enabled));
                        }
                        PlayerCommand::Status { reply } => {
                            engine.refresh();
                            let _ = reply.send(engine.status());
                        }
                    }
                }
                tracing::debug!("Player thread exiting");
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("Engine thread died"))??;
        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(Reply<T>) -> PlayerCommand,
    ) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(cmd(reply))
            .await
            .map_err(|_| anyhow::anyhow!("Engine thread died"))?;
        Ok(rx
            .await
            .map_err(|_| anyhow::anyhow!("Engine thread died"))??)
    }

    pub async fn load(&self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        let path = path.into();
        self.request(|reply| PlayerCommand::Load { path, reply }).await
    }

    pub async fn load_decoded(&self, audio: DecodedAudio) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::LoadDecoded { audio, reply })
            .await
    }

    pub async fn play(&self) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::Play { reply }).await
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::Resume { reply }).await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::Stop { reply }).await
    }

    pub async fn seek(&self, seconds: f64) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::Seek { seconds, reply })
            .await
    }

    pub async fn set_filters(&self, params: Vec<FilterParam>) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::SetFilters { params, reply })
            .await
    }

    pub async fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.request(|reply| PlayerCommand::SetEnabled { enabled, reply })
            .await
    }

    /// Current state, position and filter set
    pub async fn status(&self) -> anyhow::Result<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PlayerCommand::Status { reply })
            .await
            .map_err(|_| anyhow::anyhow!("Engine thread died"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Engine thread died"))
    }
}
