//! Raw index driver: exercises the B+ tree directly from stdin.
//!
//! The first line gives the number of operations; each following line is
//! `insert <key> <value>`, `delete <key> <value>`, `find <key>` or `clear`.
//! `find` prints every value stored under the key in order, or `null`.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Result;
use btree::BPlusTree;
use clap::Parser;
use common::StoreConfig;
use types::FixedString;

type Key = FixedString<64>;

#[derive(Parser, Debug)]
#[command(name = "railway-index", about = "Raw multimap index driver")]
struct Args {
    /// Index file to operate on
    #[arg(long, default_value = "bpt.dat")]
    file: PathBuf,

    /// Number of pages the buffer pool keeps resident
    #[arg(long, default_value_t = 500)]
    cache_capacity: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = StoreConfig::builder()
        .cache_capacity(args.cache_capacity)
        .build();
    let mut tree: BPlusTree<Key, i32> = BPlusTree::open(&args.file, &config)?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let count: usize = match lines.next() {
        Some(line) => line?.trim().parse().unwrap_or(0),
        None => return Ok(()),
    };

    for _ in 0..count {
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("insert") => {
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let Ok(val) = val.parse::<i32>() else {
                    continue;
                };
                tree.insert(Key::new(key), val)?;
            }
            Some("delete") => {
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let Ok(val) = val.parse::<i32>() else {
                    continue;
                };
                tree.erase(&Key::new(key), &val)?;
            }
            Some("find") => {
                let Some(key) = parts.next() else {
                    continue;
                };
                let values = tree.find_all(&Key::new(key))?;
                if values.is_empty() {
                    println!("null");
                } else {
                    let rendered: Vec<String> =
                        values.iter().map(|v| v.to_string()).collect();
                    println!("{}", rendered.join(" "));
                }
            }
            Some("clear") => tree.clear()?,
            _ => println!("unknown operation"),
        }
    }
    Ok(())
}
