//! Command-line front end for the user index.
//!
//! Reads `[timestamp] command (-key value)*` frames from stdin, one per
//! line, and dispatches them to the user manager. Parse errors are reported
//! on stderr and the loop continues; `exit` stops it.

use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use command::{Command, TokenStream};
use common::{StoreConfig, StoreError, StoreResult};
use userbase::UserManager;

#[derive(Parser, Debug)]
#[command(name = "railway", about = "Train-ticketing user index service")]
struct Args {
    /// Directory for the data files
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of pages the buffer pool keeps resident
    #[arg(long, default_value_t = 500)]
    cache_capacity: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    fs::create_dir_all(&args.data_dir)?;

    let config = StoreConfig::builder()
        .cache_capacity(args.cache_capacity)
        .build();
    let mut users = UserManager::open(&args.data_dir.join("user.dat"), &config)?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let mut stream = TokenStream::new(&line);
        if stream.is_empty() {
            continue;
        }
        let cmd = match Command::parse(&mut stream) {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if cmd.name() == "exit" {
            println!("[{}] bye", cmd.timestamp());
            break;
        }
        match dispatch(&mut users, &cmd) {
            Ok(output) => println!("[{}] {output}", cmd.timestamp()),
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

const REJECTED: &str = "-1";
const ACCEPTED: &str = "0";

fn status(ok: bool) -> String {
    if ok { ACCEPTED } else { REJECTED }.to_string()
}

fn dispatch(users: &mut UserManager, cmd: &Command) -> StoreResult<String> {
    match cmd.name() {
        "add_user" => {
            if !cmd.check("cupnmg", "") {
                return Ok(REJECTED.into());
            }
            let Ok(privilege) = cmd.arg('g').unwrap_or_default().parse::<i32>() else {
                return Ok(REJECTED.into());
            };
            let ok = users.add_user(
                cmd.arg('c').unwrap_or_default(),
                cmd.arg('u').unwrap_or_default(),
                cmd.arg('p').unwrap_or_default(),
                cmd.arg('n').unwrap_or_default(),
                cmd.arg('m').unwrap_or_default(),
                privilege,
            )?;
            Ok(status(ok))
        }
        "login" => {
            if !cmd.check("up", "") {
                return Ok(REJECTED.into());
            }
            let ok = users.login(
                cmd.arg('u').unwrap_or_default(),
                cmd.arg('p').unwrap_or_default(),
            )?;
            Ok(status(ok))
        }
        "logout" => {
            if !cmd.check("u", "") {
                return Ok(REJECTED.into());
            }
            Ok(status(users.logout(cmd.arg('u').unwrap_or_default())))
        }
        "query_profile" => {
            if !cmd.check("cu", "") {
                return Ok(REJECTED.into());
            }
            let profile = users.query_profile(
                cmd.arg('c').unwrap_or_default(),
                cmd.arg('u').unwrap_or_default(),
            )?;
            Ok(profile.map_or_else(|| REJECTED.into(), |user| user.profile_line()))
        }
        "modify_profile" => {
            if !cmd.check("cu", "pnmg") {
                return Ok(REJECTED.into());
            }
            let privilege = match cmd.arg('g') {
                Some(text) => match text.parse::<i32>() {
                    Ok(privilege) => Some(privilege),
                    Err(_) => return Ok(REJECTED.into()),
                },
                None => None,
            };
            let profile = users.modify_profile(
                cmd.arg('c').unwrap_or_default(),
                cmd.arg('u').unwrap_or_default(),
                cmd.arg('p'),
                cmd.arg('n'),
                cmd.arg('m'),
                privilege,
            )?;
            Ok(profile.map_or_else(|| REJECTED.into(), |user| user.profile_line()))
        }
        "clean" => {
            users.clean()?;
            Ok(ACCEPTED.into())
        }
        other => Err(StoreError::Parse(format!("unknown command {other}"))),
    }
}
