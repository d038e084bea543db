//! Command-line access to a `u64 -> [u8; 32]` tree file.
//!
//! ```text
//! bptree insert <key> <value>
//! bptree get <key>
//! bptree erase <key>
//! bptree scan
//! bptree check
//! bptree clear
//! ```
//!
//! The file path comes from `BPTREE_PATH` (default `./bptree.db`); the
//! layout comes from the `BPTREE_*` variables read by `TreeConfig::from_env`.

#![cfg_attr(test, allow(clippy::expect_used))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use expect() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::path::PathBuf;

use bptree::{BPlusTree, TreeConfig, TreeError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PATH: &str = "./bptree.db";
const VALUE_SIZE: usize = 32;

type Value = [u8; VALUE_SIZE];
type Tree = BPlusTree<u64, Value>;

const USAGE: &str = "usage: bptree <insert KEY VALUE | get KEY | erase KEY | scan | check | clear>";

#[derive(Debug)]
enum Command {
    Insert(u64, Value),
    Get(u64),
    Erase(u64),
    Scan,
    Check,
    Clear,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["insert", key, value] => Ok(Self::Insert(parse_key(key)?, encode_value(value)?)),
            ["get", key] => Ok(Self::Get(parse_key(key)?)),
            ["erase", key] => Ok(Self::Erase(parse_key(key)?)),
            ["scan"] => Ok(Self::Scan),
            ["check"] => Ok(Self::Check),
            ["clear"] => Ok(Self::Clear),
            _ => Err(USAGE.to_string()),
        }
    }
}

fn parse_key(key: &str) -> Result<u64, String> {
    key.parse()
        .map_err(|_| format!("'{key}' is not a non-negative integer key"))
}

fn encode_value(value: &str) -> Result<Value, String> {
    let bytes = value.as_bytes();
    if bytes.len() > VALUE_SIZE {
        return Err(format!(
            "value is {} bytes, at most {VALUE_SIZE} fit",
            bytes.len()
        ));
    }
    let mut out = [0u8; VALUE_SIZE];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn decode_value(value: &Value) -> String {
    let end = value.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

fn run(tree: &mut Tree, command: Command) -> Result<(), TreeError> {
    match command {
        Command::Insert(key, value) => {
            let (_, inserted) = tree.insert(key, value)?;
            if inserted {
                println!("inserted {key}");
            } else {
                println!("{key} already present");
            }
        }
        Command::Get(key) => match tree.get(&key)? {
            Some(value) => println!("{key}\t{}", decode_value(&value)),
            None => println!("{key} not found"),
        },
        Command::Erase(key) => {
            if tree.erase(&key)? {
                println!("erased {key}");
            } else {
                println!("{key} not found");
            }
        }
        Command::Scan => {
            for entry in tree.iter() {
                let (key, value) = entry?;
                println!("{key}\t{}", decode_value(&value));
            }
        }
        Command::Check => {
            let stats = tree.check_invariants()?;
            println!(
                "ok: {} entries, height {}, {} leaves, {} index nodes, {} stale parent links",
                stats.entries,
                stats.height,
                stats.leaves,
                stats.index_nodes,
                stats.stale_parent_links
            );
        }
        Command::Clear => {
            tree.clear()?;
            println!("cleared");
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    // Load configuration from environment variables
    let config = match TreeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let path = std::env::var("BPTREE_PATH")
        .map_or_else(|_| PathBuf::from(DEFAULT_PATH), PathBuf::from);

    let mut tree = match Tree::open(&path, &config) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to open {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&mut tree, command) {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = tree.close() {
        tracing::error!("Failed to close {}: {e}", path.display());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| (*w).to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert!(matches!(
            Command::parse(&args(&["insert", "7", "seven"])),
            Ok(Command::Insert(7, _))
        ));
        assert!(matches!(Command::parse(&args(&["get", "7"])), Ok(Command::Get(7))));
        assert!(matches!(Command::parse(&args(&["scan"])), Ok(Command::Scan)));
        assert!(Command::parse(&args(&["get"])).is_err());
        assert!(Command::parse(&args(&["get", "-1"])).is_err());
    }

    #[test]
    fn test_value_encoding() {
        let value = encode_value("hello").expect("fits");
        assert_eq!(&value[..5], b"hello");
        assert_eq!(decode_value(&value), "hello");
        assert!(encode_value(&"x".repeat(33)).is_err());
    }
}
