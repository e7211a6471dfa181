// CLI definitions using clap

use clap::{Args, Parser, Subcommand};
use hidkit::BackendKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hidkit")]
#[command(author, version, about = "List and talk to HID devices")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: <config dir>/hidkit/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Backend to use instead of the configured/build default
    #[arg(long, global = true, value_name = "KIND")]
    pub backend: Option<BackendKind>,

    /// Log filter (e.g. debug, hidkit=trace); RUST_LOG wins
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached HID devices (default)
    #[command(visible_aliases = ["ls", "l"])]
    List {
        /// Vendor ID filter (0 or omitted matches any)
        #[arg(long, value_parser = parse_id, default_value = "0")]
        vid: u16,
        /// Product ID filter (0 or omitted matches any)
        #[arg(long, value_parser = parse_id, default_value = "0")]
        pid: u16,
        /// Print JSON instead of key : value blocks
        #[arg(long)]
        json: bool,
    },

    /// Open a device and print its descriptor strings
    #[command(visible_alias = "i")]
    Info {
        #[command(flatten)]
        target: Target,
    },

    /// Read input reports and print them in hex
    #[command(visible_alias = "r")]
    Read {
        #[command(flatten)]
        target: Target,
        /// Maximum report length (default from config)
        #[arg(long)]
        len: Option<usize>,
        /// Give up on each read after this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Stop after this many reports (0 = until Ctrl-C)
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Use non-blocking reads
        #[arg(long)]
        nonblocking: bool,
    },

    /// Write a report and poll for a response
    #[command(visible_alias = "p")]
    Poll {
        #[command(flatten)]
        target: Target,
        /// Report to send, hex bytes (first byte is the report ID), e.g. "00 01 ff"
        #[arg(long, value_parser = parse_hex_bytes)]
        report: HexBytes,
        /// Attempts before giving up (0 = until Ctrl-C)
        #[arg(long, default_value_t = 10)]
        attempts: usize,
        /// Delay between attempts
        #[arg(long, value_name = "MS", default_value_t = 100)]
        interval_ms: u64,
        /// Maximum response length (default from config)
        #[arg(long)]
        len: Option<usize>,
    },
}

/// Which device to open.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Platform path from `hidkit list`
    #[arg(long, conflicts_with_all = ["vid", "pid", "serial"])]
    pub path: Option<String>,
    #[arg(long, value_parser = parse_id, requires = "pid")]
    pub vid: Option<u16>,
    #[arg(long, value_parser = parse_id, requires = "vid")]
    pub pid: Option<u16>,
    /// Serial number to disambiguate identical devices
    #[arg(long, requires = "vid")]
    pub serial: Option<String>,
}

/// Parse a 16-bit ID given as `0x`-prefixed hex or decimal.
pub fn parse_id(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("`{s}` is not a 16-bit id (use 0x046d or 1133)"))
}

/// Raw report bytes given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

/// Parse bytes written as hex pairs, optionally separated by spaces or commas.
pub fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|t| t.trim_start_matches("0x"))
        .collect();
    if digits.is_empty() || digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{s}` is not a sequence of hex bytes"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("`{}` is not a hex byte", &digits[i..i + 2]))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(HexBytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ids_accept_hex_and_decimal() {
        assert_eq!(parse_id("0x046d"), Ok(0x046d));
        assert_eq!(parse_id("1133"), Ok(1133));
        assert!(parse_id("0x1ffff").is_err());
        assert!(parse_id("mouse").is_err());
    }

    #[test]
    fn hex_bytes() {
        assert_eq!(parse_hex_bytes("00 01 ff"), Ok(HexBytes(vec![0x00, 0x01, 0xff])));
        assert_eq!(parse_hex_bytes("0x05,0xA0"), Ok(HexBytes(vec![0x05, 0xa0])));
        assert_eq!(parse_hex_bytes("0102"), Ok(HexBytes(vec![0x01, 0x02])));
        assert!(parse_hex_bytes("1").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn list_is_default_and_filters_parse() {
        let cli = Cli::try_parse_from(["hidkit"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["hidkit", "list", "--vid", "0x046d", "--json"]).unwrap();
        match cli.command {
            Some(Commands::List { vid, pid, json }) => {
                assert_eq!((vid, pid, json), (0x046d, 0, true));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn target_rejects_path_with_ids() {
        assert!(Cli::try_parse_from(["hidkit", "info", "--path", "/dev/hidraw0", "--vid", "1", "--pid", "2"]).is_err());
        assert!(Cli::try_parse_from(["hidkit", "info", "--vid", "1"]).is_err());
    }
}
