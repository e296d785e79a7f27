use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use satcore::response::{ENTRY_WIRE_BYTES, PENDING_STATUS};
use satcore::{GroundCommand, GroundRequest, GroundResponse};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("satcore")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Ground client for the CubeSat onboard controller simulator")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("🏓 Check the controller is responsive"))
        .subcommand(SubCommand::with_name("status").about("📊 One-line flight status summary"))
        .subcommand(
            SubCommand::with_name("beacon")
                .about("📻 Beacon control")
                .subcommand(SubCommand::with_name("on").about("Enable beacon transmission"))
                .subcommand(SubCommand::with_name("off").about("Disable beacon transmission"))
                .subcommand(
                    SubCommand::with_name("set")
                        .about("Write one software status character")
                        .arg(Arg::with_name("index").required(true).help("Position 0-30"))
                        .arg(
                            Arg::with_name("char")
                                .required(true)
                                .help("Character (0-9, A-Z except E and T)"),
                        ),
                ),
        )
        .subcommand(
            SubCommand::with_name("poll")
                .about("📬 Response poll access")
                .subcommand(SubCommand::with_name("fetch").about("Download the response poll"))
                .subcommand(
                    SubCommand::with_name("clear")
                        .about("Delete one entry, or everything with id 65535")
                        .arg(Arg::with_name("id").required(true).help("Command id")),
                ),
        )
        .subcommand(
            SubCommand::with_name("telemetry")
                .about("📈 Basic telemetry aggregates")
                .subcommand(SubCommand::with_name("fetch").about("Download the 649-byte summary"))
                .subcommand(SubCommand::with_name("reset").about("Clear the running aggregates")),
        )
        .get_matches();

    let request = match build_request(&matches) {
        Some(request) => request,
        None => {
            eprintln!("{}", "No command given; try `satcore ping`.".yellow());
            return Ok(());
        }
    };

    let id = (SystemTime::now()
        .duration_since(UNIX_EPOCH)?
        .as_millis()
        % 0xFFF0) as u16;
    let command = GroundCommand { id, request };

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT);
    let response = send_command(host, port, &command).await?;
    print_response(&command, &response);
    Ok(())
}

fn build_request(matches: &ArgMatches<'_>) -> Option<GroundRequest> {
    match matches.subcommand() {
        ("ping", _) => Some(GroundRequest::Ping),
        ("status", _) => Some(GroundRequest::Status),
        ("beacon", Some(sub)) => match sub.subcommand() {
            ("on", _) => Some(GroundRequest::SetBeacon { enabled: true }),
            ("off", _) => Some(GroundRequest::SetBeacon { enabled: false }),
            ("set", Some(args)) => {
                let index = args.value_of("index")?.parse().ok()?;
                let value = args.value_of("char")?.chars().next()?;
                Some(GroundRequest::SetBeaconChar { index, value })
            }
            _ => None,
        },
        ("poll", Some(sub)) => match sub.subcommand() {
            ("fetch", _) => Some(GroundRequest::FetchResponsePoll),
            ("clear", Some(args)) => {
                let cmd_id = args.value_of("id")?.parse().ok()?;
                Some(GroundRequest::ClearResponsePoll { cmd_id })
            }
            _ => None,
        },
        ("telemetry", Some(sub)) => match sub.subcommand() {
            ("fetch", _) => Some(GroundRequest::FetchBasicTelemetry),
            ("reset", _) => Some(GroundRequest::ResetBasicTelemetry),
            _ => None,
        },
        _ => None,
    }
}

async fn send_command(
    host: &str,
    port: &str,
    command: &GroundCommand,
) -> Result<GroundResponse, Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(format!("{host}:{port}")).await?;
    let (reader, mut writer) = stream.into_split();

    let json = serde_json::to_string(command)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;
    Ok(serde_json::from_str(line.trim())?)
}

fn print_response(command: &GroundCommand, response: &GroundResponse) {
    if response.status == 0 {
        println!("{} id={}", "OK".green().bold(), response.id);
    } else {
        println!(
            "{} id={} status=0x{:02X}",
            "FAILED".red().bold(),
            response.id,
            response.status
        );
    }
    if let Some(message) = &response.message {
        println!("  {message}");
    }
    match (&command.request, &response.payload) {
        (GroundRequest::FetchResponsePoll, Some(bytes)) => print_poll(bytes),
        (_, Some(bytes)) => println!("  payload: {} bytes", bytes.len()),
        _ => {}
    }
}

fn print_poll(bytes: &[u8]) {
    println!("  {} entries:", bytes.len() / ENTRY_WIRE_BYTES);
    for entry in bytes.chunks_exact(ENTRY_WIRE_BYTES) {
        let cmd_id = u16::from_be_bytes([entry[0], entry[1]]);
        let status = entry[2];
        let epoch = u32::from_be_bytes([entry[3], entry[4], entry[5], entry[6]]);
        let kind = if status == PENDING_STATUS {
            "PENDING".yellow()
        } else {
            "COMPLETE".green()
        };
        println!("  cmd 0x{cmd_id:04X}  status 0x{status:02X}  epoch {epoch}  {kind}");
    }
}
