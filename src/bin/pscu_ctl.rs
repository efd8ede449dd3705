use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use pscu::controller::{ApiRequest, ApiResponse};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8888";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let matches = App::new("pscu-ctl")
        .version("0.1.0")
        .author("Detector Systems Engineering Team")
        .about("Command-line client for the PSCU control service")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Service host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Service port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Read a parameter subtree")
                .arg(Arg::with_name("path").help("Parameter path, e.g. fan/target").default_value("")),
        )
        .subcommand(
            SubCommand::with_name("put")
                .about("Write a parameter")
                .arg(Arg::with_name("path").help("Parameter path").required(true))
                .arg(Arg::with_name("value").help("JSON value, e.g. true or 50").required(true)),
        )
        .subcommand(SubCommand::with_name("arm").about("Arm the interlock"))
        .subcommand(SubCommand::with_name("disarm").about("Disarm the interlock"))
        .subcommand(SubCommand::with_name("enable-all").about("Enable every quad output, staggered"))
        .subcommand(SubCommand::with_name("disable-all").about("Cancel pending enables and disable every quad output"))
        .subcommand(
            SubCommand::with_name("fan")
                .about("Set the fan speed target")
                .arg(
                    Arg::with_name("percent")
                        .help("Target speed, 0-100")
                        .required(true)
                        .validator(|v| match v.parse::<f64>() {
                            Ok(p) if (0.0..=100.0).contains(&p) => Ok(()),
                            _ => Err("Fan target must be between 0 and 100".into()),
                        }),
                ),
        )
        .subcommand(SubCommand::with_name("status").about("Show a summary of the unit"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table").to_string();

    let request = match matches.subcommand() {
        ("get", Some(sub)) => ApiRequest::get(sub.value_of("path").unwrap_or("")),
        ("put", Some(sub)) => put_request(sub)?,
        ("arm", _) => ApiRequest::put("armed", Value::Bool(true)),
        ("disarm", _) => ApiRequest::put("armed", Value::Bool(false)),
        ("enable-all", _) => ApiRequest::put("allEnabled", Value::Bool(true)),
        ("disable-all", _) => ApiRequest::put("allEnabled", Value::Bool(false)),
        ("fan", Some(sub)) => {
            let percent: f64 = sub.value_of("percent").unwrap_or("0").parse()?;
            ApiRequest::put("fan/target", serde_json::json!(percent))
        }
        ("status", _) => ApiRequest::get(""),
        _ => return Ok(()),
    };

    let response = send_request(&host, port, &request).await?;
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    } else if !response.is_ok() {
        let message = response.body["error"].as_str().unwrap_or("request rejected");
        println!("{} {}", "✗".red(), message.bright_red());
    } else if matches.subcommand_name() == Some("status") {
        print_status(&response.body);
    } else {
        print_value(&request, &response.body);
    }

    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn put_request(matches: &ArgMatches<'_>) -> Result<ApiRequest, BoxError> {
    let path = matches.value_of("path").unwrap_or("");
    let raw = matches.value_of("value").unwrap_or("null");
    // Bare words that are not JSON go through as strings.
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(ApiRequest::put(path, value))
}

async fn send_request(host: &str, port: u16, request: &ApiRequest) -> Result<ApiResponse, BoxError> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to PSCU service at {}", "✗".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("  Start it with: {}", "pscu-server --simulate".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        if BufReader::new(reader).read_line(&mut reply).await? == 0 {
            return Err("server closed connection".into());
        }
        Ok::<ApiResponse, BoxError>(serde_json::from_str(&reply)?)
    };

    match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} Request timed out after {}s", "✗".yellow(), REQUEST_TIMEOUT.as_secs());
            Err("request timeout".into())
        }
    }
}

fn print_value(request: &ApiRequest, body: &Value) {
    let label = if request.path.is_empty() { "/" } else { request.path.as_str() };
    match &request.body {
        Some(_) => println!("{} {} = {}", "✓".green(), label.bright_white(), compact(body).bright_cyan()),
        None => println!("{}", serde_json::to_string_pretty(body).unwrap_or_default()),
    }
}

/// The value under the single key of a wrapped GET/PUT result.
fn compact(body: &Value) -> String {
    match body.as_object().and_then(|map| map.values().next()) {
        Some(value) => value.to_string(),
        None => body.to_string(),
    }
}

fn flag(value: &Value, good: &str, bad: &str) -> ColoredString {
    if value.as_bool().unwrap_or(false) {
        good.green()
    } else {
        bad.red()
    }
}

fn print_status(tree: &Value) {
    println!("\n{}", "PSCU Status".bright_blue().bold());
    println!("{}", "═══════════".bright_blue());
    println!("Interlock:   {}", flag(&tree["overall"], "HEALTHY", "TRIPPED"));
    println!("Armed:       {}", flag(&tree["armed"], "ARMED", "DISARMED"));
    println!("All enabled: {}", flag(&tree["allEnabled"], "YES", "NO"));
    println!("Latched:     {}", flag(&tree["latched"], "NONE", "LATCHED"));

    println!("\n{}", "Temperatures".bright_white().bold());
    if let Some(sensors) = tree["temperature"]["sensors"].as_array() {
        for (index, sensor) in sensors.iter().enumerate() {
            let name = sensor["name"].as_str().unwrap_or("?");
            if sensor["disabled"].as_bool().unwrap_or(false) {
                println!("  {:>2} {:<12} {}", index, name, "disabled".dimmed());
                continue;
            }
            let value = sensor["temperature"].as_f64().unwrap_or(f64::NAN);
            let set_point = sensor["setpoint"].as_f64().unwrap_or(f64::NAN);
            let reading = format!("{:>6.1}C", value);
            let reading = if sensor["tripped"].as_bool().unwrap_or(false) { reading.red() } else { reading.white() };
            println!("  {:>2} {:<12} {} (set {:.1}C)", index, name, reading, set_point);
        }
    }

    println!("\n{}", "Cooling".bright_white().bold());
    println!(
        "  Fan:  {:>7.0} rpm  target {:.0}%  {}",
        tree["fan"]["currentspeed"].as_f64().unwrap_or(f64::NAN),
        tree["fan"]["target"].as_f64().unwrap_or(f64::NAN),
        flag(&tree["fan"]["overall"], "OK", "TRIPPED")
    );
    println!(
        "  Pump: {:>7.1} l/min           {}",
        tree["pump"]["flow"].as_f64().unwrap_or(f64::NAN),
        flag(&tree["pump"]["overall"], "OK", "TRIPPED")
    );

    println!("\n{}", "Quads".bright_white().bold());
    if let Some(quads) = tree["quad"]["quads"].as_array() {
        for (index, quad) in quads.iter().enumerate() {
            let channels: Vec<String> = quad["channels"]
                .as_array()
                .map(|channels| {
                    channels
                        .iter()
                        .map(|c| {
                            let text = format!("{:>5.1}V", c["voltage"].as_f64().unwrap_or(f64::NAN));
                            if c["fuseblown"].as_bool().unwrap_or(false) || c["fetfailed"].as_bool().unwrap_or(false) {
                                text.red().to_string()
                            } else if c["enabled"].as_bool().unwrap_or(false) {
                                text.green().to_string()
                            } else {
                                text.dimmed().to_string()
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            println!(
                "  Q{} supply {:>5.1}V  {}",
                index + 1,
                quad["supply"].as_f64().unwrap_or(f64::NAN),
                channels.join(" ")
            );
        }
    }
}
