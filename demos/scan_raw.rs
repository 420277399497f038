use std::env;
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use sane_net_rs::remote::{AuthCallback, Client, ClientConfig, Credentials, ReadStatus};
use sane_net_rs::wire::{Action, OptionValue};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct Args {
    device: String,
    output: PathBuf,
    resolution: Option<i32>,
    user: Option<String>,
    password: Option<String>,
}

fn print_usage() {
    eprintln!(
        "usage: scan_raw <host:device> [--out <file>] [--resolution <dpi>] [--user <name> --password <pw>]"
    );
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let mut device = None;
    let mut output = PathBuf::from("scan.raw");
    let mut resolution = None;
    let mut user = None;
    let mut password = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" => output = args.next().ok_or("--out needs a path")?.into(),
            "--resolution" => {
                resolution = Some(args.next().ok_or("--resolution needs a value")?.parse()?)
            }
            "--user" => user = args.next(),
            "--password" => password = args.next(),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => device = Some(arg),
        }
    }
    let Some(device) = device else {
        print_usage();
        return Err("missing device name".into());
    };
    Ok(Args {
        device,
        output,
        resolution,
        user,
        password,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let args = parse_args()?;

    let auth = match (args.user.clone(), args.password.clone()) {
        (Some(user), Some(password)) => {
            let callback = move |resource: &str| {
                info!(%resource, "supplying credentials");
                Some(Credentials::new(user.clone(), password.clone()))
            };
            Some(Arc::new(callback) as Arc<dyn AuthCallback>)
        }
        _ => None,
    };

    let client = Client::init(ClientConfig::from_env()?, auth).await;
    let mut session = client.open(&args.device).await?;

    if let Some(dpi) = args.resolution {
        let index = session
            .option_descriptors()
            .await?
            .iter()
            .position(|d| d.name == "resolution");
        match index {
            Some(index) => {
                let update = session
                    .control_option(index, Action::SetValue, OptionValue::Int(vec![dpi]))
                    .await?;
                info!(value = ?update.value, info = ?update.info, "resolution set");
            }
            None => warn!("device has no resolution option"),
        }
    }

    let params = session.get_parameters().await?;
    println!(
        "format {:?}, {} x {} pixels, depth {}",
        params.format, params.pixels_per_line, params.lines, params.depth
    );

    session.start().await?;
    let mut file = File::create(&args.output)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0usize;
    while let ReadStatus::Data(len) = session.read(&mut buf).await? {
        file.write_all(&buf[..len])?;
        total += len;
    }
    println!("wrote {total} bytes to {}", args.output.display());

    session.close().await?;
    client.shutdown().await;
    Ok(())
}
