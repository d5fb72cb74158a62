mod cli;

use std::path::PathBuf;
use std::time::Duration;

use cheevos::RaClient;
use clap::Parser;
use easyerr::{Error, ResultExt};
use garnet::modules::cheevos::{CheevosModule, EventKind, HttpRequest, NopCheevosModule};
use garnet::core::CoreBackend;
use garnet::runner::{CooperativeRunner, Runner};
use garnet::{Garnet, HostHandles, Modules};
use retro::LibretroCore;
use retro::pixel::{DMG_PALETTE, PixelProcess};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    CoreLoad { source: retro::CoreLoadError },
    #[error(transparent)]
    GameLoad { source: retro::GameLoadError },
    #[error("failed to access {path}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to build the HTTP client")]
    Http { source: reqwest::Error },
    #[error("failed to persist the battery save")]
    Save { source: garnet::driver::DriverError },
}

fn setup_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("app=info,garnet=info,cheevos=info,retro=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn main() -> Result<(), AppError> {
    setup_tracing();
    let cfg = cli::Config::parse();

    std::fs::create_dir_all(&cfg.save_dir).with_context(|_| AppCtx::Io {
        path: cfg.save_dir.display().to_string(),
    })?;

    let core =
        LibretroCore::load(&cfg.core, &cfg.system_dir, &cfg.save_dir).context(AppCtx::CoreLoad)?;
    let rom = std::fs::read(&cfg.rom).with_context(|_| AppCtx::Io {
        path: cfg.rom.display().to_string(),
    })?;

    let use_ra = !cfg.ra.offline && cfg.ra.user.is_some() && cfg.ra.token.is_some();
    let client = use_ra.then(RaClient::new);
    if !use_ra {
        tracing::info!("achievements disabled (offline or no credentials)");
    }
    let module: Box<dyn CheevosModule> = match &client {
        Some(client) => Box::new(client.clone()),
        None => Box::new(NopCheevosModule),
    };

    let (mut garnet, host) = Garnet::new(Box::new(core), Modules { cheevos: module });
    garnet.driver_mut().core_mut().set_pixel_process(match cfg.pixel {
        cli::PixelMode::Normal => PixelProcess::None,
        cli::PixelMode::Correct => PixelProcess::ColorCorrection,
        cli::PixelMode::Dmg => PixelProcess::Palette(DMG_PALETTE),
    });
    let game_hash = garnet.load_game(&rom).context(AppCtx::GameLoad)?.hash.clone();

    let sav_path = battery_path(&cfg);
    if sav_path.exists() {
        match garnet.driver_mut().load_save_ram_from(&sav_path) {
            Ok(accepted) => {
                tracing::info!(path = %sav_path.display(), bytes = accepted, "battery save restored");
            }
            Err(e) => tracing::warn!(path = %sav_path.display(), "battery restore failed: {e}"),
        }
    }

    if let Some(client) = &client {
        client.set_hardcore(cfg.ra.hardcore);
        client.set_encore(cfg.ra.encore);
        // `use_ra` implies both credentials are present
        let (user, token) = (cfg.ra.user.as_deref().unwrap(), cfg.ra.token.as_deref().unwrap());
        let _ = client.begin_login(user, token);
        let _ = client.begin_load_game(&game_hash);
    }

    let http = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context(AppCtx::Http)?;

    let finished = if cfg.cooperative {
        run_cooperative(garnet, host, client.as_ref(), &http, &cfg)
    } else {
        run_threaded(garnet, host, client.as_ref(), &http, &cfg)
    };

    let Some(mut garnet) = finished else {
        tracing::warn!("emulation thread lost, skipping battery save");
        return Ok(());
    };

    garnet.driver_mut().save_ram_to(&sav_path).context(AppCtx::Save)?;
    tracing::info!(path = %sav_path.display(), "battery save written");

    if let Some(client) = &client {
        let summary = client.summary();
        tracing::info!(
            unlocked = summary.unlocked_count,
            total = summary.achievement_count,
            points = summary.unlocked_points,
            "achievements session summary"
        );
    }

    Ok(())
}

fn battery_path(cfg: &cli::Config) -> PathBuf {
    let stem = cfg.rom.file_stem().unwrap_or(cfg.rom.as_os_str());
    cfg.save_dir.join(stem).with_extension("sav")
}

fn run_threaded(
    garnet: Garnet,
    mut host: HostHandles,
    client: Option<&RaClient>,
    http: &reqwest::blocking::Client,
    cfg: &cli::Config,
) -> Option<Garnet> {
    let runner = Runner::new(garnet);
    runner.set_turbo(cfg.turbo);
    runner.set_frame_skip(cfg.frame_skip);
    runner.start();

    loop {
        service_host(&mut host, client, http);

        let frames = runner.get().frame();
        if cfg.frames != 0 && frames >= cfg.frames {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    runner.stop()
}

fn run_cooperative(
    garnet: Garnet,
    mut host: HostHandles,
    client: Option<&RaClient>,
    http: &reqwest::blocking::Client,
    cfg: &cli::Config,
) -> Option<Garnet> {
    let mut runner = CooperativeRunner::new(garnet);
    runner.set_turbo(cfg.turbo);
    runner.set_frame_skip(cfg.frame_skip);
    runner.start();

    loop {
        runner.tick();
        service_host(&mut host, client, http);

        if cfg.frames != 0 && runner.garnet().frame() >= cfg.frames {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    Some(runner.stop())
}

/// One pass of the control-thread duties: relay I/O, event drain, buffer
/// consumption.
fn service_host(host: &mut HostHandles, client: Option<&RaClient>, http: &reqwest::blocking::Client) {
    if let Some(client) = client {
        pump_relay(client, http);
        drain_events(client);
    }

    if let Some(frame) = host.video.poll() {
        tracing::trace!(width = frame.width, height = frame.height, "frame presented");
    }
    // headless: drain audio so the ring keeps moving
    let mut sink = [0i16; 4096];
    while host.audio.pop(&mut sink) == sink.len() {}
}

/// Performs staged HTTP requests and feeds the responses back. A transport
/// failure is reported as status 0 so the engine can recover.
fn pump_relay(client: &RaClient, http: &reqwest::blocking::Client) {
    while let Some(request) = client.pending_request() {
        let (status, body) = match perform(http, &request) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(id = request.id, url = %request.url, "request failed: {e}");
                (0, Vec::new())
            }
        };
        if client.submit_response(request.id, status, &body).is_err() {
            break;
        }
    }
}

fn perform(
    http: &reqwest::blocking::Client,
    request: &HttpRequest,
) -> reqwest::Result<(u16, Vec<u8>)> {
    let mut builder = match &request.body {
        Some(body) => http.post(&request.url).body(body.clone()),
        None => http.get(&request.url),
    };
    if let Some(content_type) = &request.content_type {
        builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
    }

    let response = builder.send()?;
    let status = response.status().as_u16();
    let body = response.bytes()?.to_vec();
    Ok((status, body))
}

fn drain_events(client: &RaClient) {
    while let Some(event) = client.pending_event() {
        match event.kind() {
            EventKind::AchievementTriggered => {
                tracing::info!(
                    id = event.achievement_id,
                    points = event.achievement_points,
                    title = %event.title(),
                    "achievement unlocked"
                );
            }
            EventKind::GameCompleted => {
                tracing::info!(title = %event.title(), "game completed");
            }
            EventKind::LoginSuccess => {
                tracing::info!(user = %event.title(), "logged in");
            }
            EventKind::LoginFailed | EventKind::GameLoadFailed | EventKind::ServerError => {
                tracing::warn!(
                    kind = %event.kind(),
                    code = event.error_code,
                    "achievements error: {}",
                    event.error_message()
                );
            }
            EventKind::GameLoadSuccess => {
                tracing::info!(game_id = event.achievement_id, title = %event.title(), "game identified");
            }
            kind => tracing::debug!(%kind, "achievements event"),
        }
        client.consume_event();
    }
}
