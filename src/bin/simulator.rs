use satcore::state::NUM_SENSORS;
use satcore::{ground, Controller, GroundCommand, SimBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{error, info, warn};

const TCP_PORT: u16 = 8080;
const MAIN_LOOP_PERIOD_MS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "satcore-data".to_string());

    println!("🛰️  CubeSat Onboard Controller Simulator");
    println!("=======================================");
    println!("   Telemetry files: {data_dir}/");
    println!("   Ground port: {TCP_PORT}");

    let controller = Arc::new(Mutex::new(Controller::new(SimBus::with_storage(&data_dir))));

    let tcp_controller = Arc::clone(&controller);
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(tcp_controller).await {
            error!("TCP server error: {}", e);
        }
    });

    // Main flight loop: one tick per second.
    let mut interval = time::interval(Duration::from_millis(MAIN_LOOP_PERIOD_MS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut guard = controller.lock().await;
                guard.bus_mut().advance_epoch(1);
                simulate_sensors(guard.bus_mut());
                guard.advance(MAIN_LOOP_PERIOD_MS as u32);

                let ticks = guard.stats().ticks;
                if ticks % 30 == 0 {
                    let state = guard.state();
                    info!(
                        epoch = guard.bus().epoch(),
                        statmon = state.ops.stat_mon_state,
                        beacon = %guard.beacon_text(),
                        poll = state.response_poll.len(),
                        "flight status"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    tcp_server.abort();
    println!("🚀 Simulator stopped");
    Ok(())
}

/// Feeds the ADC channels with slowly varying counts so the beacon and
/// aggregates have something to chew on.
fn simulate_sensors(bus: &mut SimBus) {
    let t = bus.epoch() as f32;
    for sensor in 0..NUM_SENSORS {
        let phase = sensor as f32 * 0.37;
        let counts = 2048.0 + 1200.0 * (t * 0.01 + phase).sin();
        bus.set_reading(sensor, counts as u16);
    }
}

async fn start_tcp_server(
    controller: Arc<Mutex<Controller<SimBus>>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{TCP_PORT}")).await?;
    info!("🌐 ground link listening on port {}", TCP_PORT);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 ground station connected: {}", addr);
                let client_controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_controller).await {
                        warn!("client {} error: {}", addr, e);
                    }
                    info!("🔌 ground station disconnected: {}", addr);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    controller: Arc<Mutex<Controller<SimBus>>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<GroundCommand>(trimmed) {
                    Ok(command) => {
                        info!("📨 ground command: {:?}", command);
                        let response = {
                            let mut guard = controller.lock().await;
                            ground::dispatch(&mut guard, command)
                        };
                        let response_json = serde_json::to_string(&response)?;
                        writer.write_all(response_json.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                    }
                    Err(e) => {
                        error!("failed to parse ground command: {}", e);
                        let error_response = serde_json::json!({
                            "id": 0,
                            "status": 0xFF,
                            "message": format!("invalid command format: {e}"),
                            "payload": null,
                        });
                        writer
                            .write_all(error_response.to_string().as_bytes())
                            .await?;
                        writer.write_all(b"\n").await?;
                    }
                }
            }
            Err(e) => {
                error!("error reading from ground station: {}", e);
                break;
            }
        }
    }

    Ok(())
}
