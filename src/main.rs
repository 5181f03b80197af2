use anyhow::Context;
use clap::Parser;
use log::{error, info};
use prefix_top::{
    app::App,
    capture::{InterfaceIdentity, PcapEngine},
    settings::{CliOverrides, Config},
};

#[derive(Parser)]
#[command(name = "prefix-top")]
#[command(about = "Top remote network prefixes by traffic volume")]
struct Cli {
    #[arg(short, long, help = "Interface to listen on [default: eth0]")]
    interface: Option<String>,

    #[arg(long = "no-netstat", help = "Do not detect active connections")]
    no_netstat: bool,

    #[arg(long, help = "Show inbound traffic instead of outbound")]
    inbound: bool,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<String>,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, help = "Print reports as JSON lines")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path).inspect_err(|e| error!("{}", e))?,
        None => Config::default(),
    };
    config.apply_cli(&CliOverrides {
        interface: cli.interface,
        no_netstat: cli.no_netstat,
        inbound: cli.inbound,
        json: cli.json,
    });
    config.validate().inspect_err(|e| error!("{}", e))?;

    let engine = PcapEngine::open(&config.capture)
        .inspect_err(|e| error!("{}", e))
        .context("cannot open capture")?;

    let identity = InterfaceIdentity::lookup(&config.capture.interface)
        .inspect_err(|e| error!("{}", e))
        .context("cannot read interface addresses")?;
    if let Some(mac) = identity.mac() {
        info!("MAC: {}", mac);
    }
    for ip in identity.ips() {
        info!("IP: {}", ip);
    }
    info!(
        "Handle link type: {} ({})",
        engine.link_name(),
        engine.linktype_code()
    );

    println!("Starting...");
    App::new(config, identity)?.run(engine).await
}
