use clap::Parser;
use tokio::io::{self, BufReader};
use tracing_subscriber::EnvFilter;

use tftp_crc::{run_shell, Cli, Command, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    match args.command {
        Command::Serve(args) => {
            let workdir = std::fs::canonicalize(&args.directory)?;
            let server = Server::bind(args.addr(), workdir, args.config()).await?;
            server.run().await?;
        }
        Command::Get {
            client,
            remote,
            local,
        } => {
            let client = client.client();
            let size = match local {
                Some(local) => client.download_to(&remote, &local).await?,
                None => client.download(&remote).await?,
            };
            println!("Download complete ({size} bytes)");
        }
        Command::Put {
            client,
            local,
            remote,
        } => {
            let remote = match remote {
                Some(remote) => remote,
                None => local
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or(anyhow::anyhow!("{:?}", local))?
                    .to_string(),
            };
            let size = client.client().upload(&local, &remote).await?;
            println!("Upload complete ({size} bytes)");
        }
        Command::Delete { client, remote } => {
            let msg = client.client().delete(&remote).await?;
            println!("Delete successful: {msg}");
        }
        Command::Ping { client } => {
            let client = client.client();
            let rtt = client.ping().await?;
            println!(
                "{} is alive ({:.1} ms)",
                client.server(),
                rtt.as_secs_f64() * 1000.0
            );
        }
        Command::Shell { client } => {
            run_shell(&client.client(), BufReader::new(io::stdin())).await?;
        }
    }
    Ok(())
}
