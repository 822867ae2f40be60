use chatwidget_voice::config::Config;
use chatwidget_voice::controller::{Collaborators, ControlCommand, VoiceController};
use chatwidget_voice::history::FileSessionStore;
use chatwidget_voice::signaling::HttpSignaling;
use chatwidget_voice::transport::WsConnector;
use chatwidget_voice::ui_bridge::{UiBridge, UiEvent};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

#[cfg(feature = "alsa-backend")]
fn audio_devices() -> anyhow::Result<Arc<dyn chatwidget_voice::audio::AudioDevices>> {
    Ok(Arc::new(chatwidget_voice::audio::AlsaDevices::new()))
}

#[cfg(not(feature = "alsa-backend"))]
fn audio_devices() -> anyhow::Result<Arc<dyn chatwidget_voice::audio::AudioDevices>> {
    anyhow::bail!("built without an audio backend; rebuild with --features alsa-backend")
}

/// `chatwidget-voice [--config path]`
fn config_path() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        }
    }
    "config.toml".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let path = config_path();
    let config = Config::load(&path)?;
    log::info!("Loaded configuration from {}", path);

    let devices = audio_devices()?;

    // UI 进程通道
    let (tx_ui_event, mut rx_ui_event) = mpsc::channel::<UiEvent>(100);
    // 控制器命令通道
    let (tx_cmd, rx_cmd) = mpsc::channel::<ControlCommand>(100);

    // 启动UI桥，与组件UI进程通信
    let ui_bridge = Arc::new(UiBridge::new(&config.ui, tx_ui_event).await?);
    let ui_bridge_clone = ui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = ui_bridge_clone.run().await {
            log::error!("UiBridge error: {}", e);
        }
    });

    let collaborators = Collaborators {
        devices,
        signaling: Arc::new(HttpSignaling::new(&config.network)?),
        connector: Arc::new(WsConnector),
        sink: ui_bridge,
        store: Arc::new(FileSessionStore::new(&config.store.history_path)),
    };
    let controller = VoiceController::new(config, collaborators);
    let controller_handle = tokio::spawn(controller.run(rx_cmd));

    log::info!("Chat widget voice core started");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
            Some(event) = rx_ui_event.recv() => {
                let cmd = match event {
                    UiEvent::StartVoice => ControlCommand::Start,
                    UiEvent::StopVoice => ControlCommand::Stop,
                };
                if tx_cmd.send(cmd).await.is_err() {
                    log::error!("Voice controller exited");
                    break;
                }
            }
        }
    }

    let _ = tx_cmd.send(ControlCommand::Shutdown).await;
    if let Err(e) = controller_handle.await {
        log::error!("Voice controller task failed: {}", e);
    }
    Ok(())
}
