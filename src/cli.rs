use anstyle::AnsiColor;
use clap::builder::styling::Styles;
use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::Client;
use crate::config::TransferConfig;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default())
    .usage(AnsiColor::Green.on_default())
    .literal(AnsiColor::Cyan.on_default())
    .placeholder(AnsiColor::Red.on_default());

#[derive(Parser, Debug)]
#[command(name = "tftp-crc")]
#[command(about = "A TFTP client/server with CRC-8 checked blocks", long_about = None)]
#[command(styles = STYLES)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server
    Serve(ServeArgs),
    /// Download a file
    Get {
        #[command(flatten)]
        client: ClientArgs,
        /// Remote file name
        remote: String,
        /// Local path (defaults to the remote name)
        local: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        #[command(flatten)]
        client: ClientArgs,
        /// Local file
        local: PathBuf,
        /// Remote file name (defaults to the local name)
        remote: Option<String>,
    },
    /// Delete a file on the server
    Delete {
        #[command(flatten)]
        client: ClientArgs,
        /// Remote file name
        remote: String,
    },
    /// Check that the server is alive
    Ping {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Interactive menu
    Shell {
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen ip
    #[arg(short, long, default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Listen Port
    #[arg(short, long, default_value_t = crate::DEF_PORT)]
    pub port: u16,

    /// Work directory
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// ACK timeout (ms)
    #[arg(short, long, default_value_t = 1000)]
    pub timeout: u64,

    /// DATA timeout (ms)
    #[arg(long, default_value_t = 3000)]
    pub data_timeout: u64,

    /// Max retries
    #[arg(short, long, default_value_t = crate::MAX_RETRY_COUNT)]
    pub retry: u8,
}

impl ServeArgs {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn config(&self) -> TransferConfig {
        let mut config = TransferConfig::server().with_retries(self.retry);
        config.ack_timeout = Duration::from_millis(self.timeout);
        config.data_timeout = Duration::from_millis(self.data_timeout);
        config
    }
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server ip
    #[arg(short, long, default_value = "127.0.0.1")]
    pub server: IpAddr,

    /// Server Port
    #[arg(short, long, default_value_t = crate::DEF_PORT)]
    pub port: u16,

    /// Timeout (ms)
    #[arg(short, long, default_value_t = 3000)]
    pub timeout: u64,

    /// Max retries
    #[arg(short, long, default_value_t = crate::MAX_RETRY_COUNT)]
    pub retry: u8,
}

impl ClientArgs {
    pub fn client(&self) -> Client {
        let config = TransferConfig::client()
            .with_timeouts(Duration::from_millis(self.timeout))
            .with_retries(self.retry);
        Client::new(SocketAddr::new(self.server, self.port)).with_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["tftp-crc", "serve"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.addr(), "0.0.0.0:6969".parse().unwrap());
        assert_eq!(args.config(), TransferConfig::server());
    }

    #[test]
    fn get_with_overrides() {
        let cli = Cli::parse_from([
            "tftp-crc", "get", "-s", "10.0.0.2", "-p", "7000", "-t", "500", "a.bin",
        ]);
        let Command::Get { client, remote, local } = cli.command else {
            panic!("expected get");
        };
        assert_eq!(remote, "a.bin");
        assert!(local.is_none());
        let client = client.client();
        assert_eq!(client.server(), "10.0.0.2:7000".parse().unwrap());
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["tftp-crc"]).is_err());
    }
}
