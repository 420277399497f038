use std::env;
use std::error::Error;
use std::time::Duration;

use sane_net_rs::remote::{config::CONFIG_FILE_NAME, Client, ClientConfig};
use tracing::info;

#[derive(Debug, Default)]
struct Args {
    timeout: Option<Duration>,
    hosts: Vec<String>,
    config_file: Option<String>,
    browse: Option<Duration>,
}

fn parse_args() -> Args {
    let mut args = env::args().skip(1);
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--timeout-s" => {
                if let Some(value) = args.next() {
                    parsed.timeout = value.parse().ok().map(Duration::from_secs);
                }
            }
            "--browse-ms" => {
                if let Some(value) = args.next() {
                    parsed.browse = value.parse().ok().map(Duration::from_millis);
                }
            }
            "--config" => parsed.config_file = args.next(),
            _ => parsed.hosts.push(arg),
        }
    }
    parsed
}

#[cfg(feature = "mdns")]
async fn browse_network(client: &mut Client, wait: Duration) -> Result<(), Box<dyn Error>> {
    let browser = sane_net_rs::remote::MdnsBrowser::start()?;
    client.start_discovery(Box::new(browser));
    tokio::time::sleep(wait).await;
    info!(hosts = client.registry().len(), "network browse finished");
    Ok(())
}

#[cfg(not(feature = "mdns"))]
async fn browse_network(_client: &mut Client, _wait: Duration) -> Result<(), Box<dyn Error>> {
    tracing::warn!("built without the mdns feature, not browsing");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let Args {
        timeout,
        hosts,
        config_file,
        browse,
    } = parse_args();

    let mut config = ClientConfig::default();
    config.load_file(config_file.as_deref().unwrap_or(CONFIG_FILE_NAME))?;
    config.apply_env()?;
    if timeout.is_some() {
        config.connect_timeout = timeout;
    }
    config.hosts.extend(hosts);
    info!(hosts = ?config.hosts, "listing remote devices");

    let mut client = Client::init(config, None).await;
    if let Some(wait) = browse {
        browse_network(&mut client, wait).await?;
    }
    let devices = client.get_devices(false).await;
    if devices.is_empty() {
        println!("No remote scanners found.");
    } else {
        println!("{:<32} {:<16} {:<24} {}", "Name", "Vendor", "Model", "Type");
        for dev in &devices {
            println!(
                "{:<32} {:<16} {:<24} {}",
                dev.name, dev.vendor, dev.model, dev.kind
            );
        }
    }
    client.shutdown().await;
    Ok(())
}
