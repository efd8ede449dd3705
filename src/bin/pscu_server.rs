use clap::{App, Arg};
use pscu::backplane::{self, Backplane};
use pscu::config::PscuConfig;
use pscu::controller::{ControlUnit, PscuController};
use pscu::display::LcdDisplay;
use pscu::i2c::BusTransport;
use pscu::pscu::Pscu;
use pscu::sim::SimBus;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::{signal, time};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("pscu-server")
        .version("0.1.0")
        .author("Detector Systems Engineering Team")
        .about("PSCU control service: periodic polling plus a line-JSON control port")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bus")
                .short("b")
                .long("bus")
                .value_name("DEVICE")
                .help("I2C bus device, e.g. /dev/i2c-2")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDRESS")
                .help("Control port listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("MS")
                .help("Update tick interval in milliseconds")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Interval must be a positive number of milliseconds".into()),
                }),
        )
        .arg(
            Arg::with_name("simulate")
                .long("simulate")
                .help("Run against simulated hardware instead of a real bus"),
        )
        .arg(
            Arg::with_name("backplane")
                .long("backplane")
                .help("Drive a QEM backplane instead of a PSCU"),
        )
        .arg(
            Arg::with_name("no-lcd")
                .long("no-lcd")
                .help("Run without the front-panel display"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => PscuConfig::load(path)?,
        None => PscuConfig::default(),
    };
    if let Some(bus) = matches.value_of("bus") {
        config.bus_path = bus.to_string();
    }
    if let Some(listen) = matches.value_of("listen") {
        config.listen_address = listen.to_string();
    }
    if let Some(interval) = matches.value_of("interval") {
        config.update_interval_ms = interval.parse()?;
    }
    if matches.is_present("no-lcd") {
        config.lcd_device = None;
    }
    config.validate()?;

    let simulate = matches.is_present("simulate");
    let backplane = matches.is_present("backplane");
    info!(
        "Starting {} service on {} ({})",
        if backplane { "backplane" } else { "PSCU" },
        config.listen_address,
        if simulate { "simulated hardware".to_string() } else { config.bus_path.clone() }
    );

    match (simulate, backplane) {
        (true, false) => serve(build_pscu(SimBus::pscu(), &config)?, config).await,
        (true, true) => serve(build_backplane(SimBus::backplane(), &config)?, config).await,
        (false, _) => serve_hardware(backplane, config).await,
    }
}

fn build_pscu<B: embedded_hal::i2c::I2c>(bus: B, config: &PscuConfig) -> Result<Pscu<B>, BoxError> {
    let transport = BusTransport::with_config(bus, config.bus_config());
    let unit = Pscu::new(transport, config.pscu_options())?;
    Ok(match &config.lcd_device {
        Some(device) => unit.with_display(LcdDisplay::open(device, config.lcd_rows, config.lcd_cols)),
        None => unit,
    })
}

fn build_backplane<B: embedded_hal::i2c::I2c>(bus: B, config: &PscuConfig) -> Result<Backplane<B>, BoxError> {
    let transport = BusTransport::with_config(bus, config.bus_config());
    Ok(Backplane::new(transport, backplane::topology::MUX_ADDRESS)?)
}

#[cfg(feature = "linux")]
async fn serve_hardware(backplane: bool, config: PscuConfig) -> Result<(), BoxError> {
    use linux_embedded_hal::I2cdev;

    let bus = I2cdev::new(&config.bus_path)?;
    if backplane {
        serve(build_backplane(bus, &config)?, config).await
    } else {
        serve(build_pscu(bus, &config)?, config).await
    }
}

#[cfg(not(feature = "linux"))]
async fn serve_hardware(_backplane: bool, config: PscuConfig) -> Result<(), BoxError> {
    error!("Cannot open {}: built without the `linux` feature", config.bus_path);
    Err("hardware access requires the `linux` feature; use --simulate".into())
}

async fn serve<U>(unit: U, config: PscuConfig) -> Result<(), BoxError>
where
    U: ControlUnit + Send + 'static,
{
    let controller = Arc::new(Mutex::new(PscuController::new(unit)));
    controller.lock().await.start();

    let listener = TcpListener::bind(&config.listen_address).await?;
    info!("Control port listening on {}", config.listen_address);
    let server_controller = Arc::clone(&controller);
    let server = tokio::spawn(async move {
        accept_clients(listener, server_controller).await;
    });

    let mut interval = time::interval(config.update_interval());
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Failures are logged and counted by the controller; the next tick retries.
                let _ = controller.lock().await.on_tick(Instant::now());
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    server.abort();
    controller.lock().await.shutdown();
    info!("PSCU service stopped");
    Ok(())
}

async fn accept_clients<U>(listener: TcpListener, controller: Arc<Mutex<PscuController<U>>>)
where
    U: ControlUnit + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Client connected: {}", addr);
                let client_controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_controller).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client<U>(stream: TcpStream, controller: Arc<Mutex<PscuController<U>>>) -> Result<(), BoxError>
where
    U: ControlUnit + Send + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = controller.lock().await.handle_line(trimmed);
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
    }
    Ok(())
}
