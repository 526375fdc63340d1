use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use referral_core::{types::now_ms, ConfigPatch, ErrorKind, ReferralGraph};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Attempts per new user before giving up on placing it.
const PLACEMENT_TRIES: usize = 8;

#[derive(Parser)]
#[command(
    name = "refnet-gen",
    version,
    about = "Generate a random referral forest as a refnet state file"
)]
struct Args {
    /// Number of referred users to generate
    #[arg(long, default_value_t = 500)]
    users: usize,
    /// Number of independent trees
    #[arg(long, default_value_t = 3)]
    roots: usize,
    /// Direct-referral cap per user, stored as the network's policy
    #[arg(long)]
    max_children: Option<usize>,
    #[arg(long, default_value_t = 0x00F0_0041)]
    seed: u64,
    #[arg(long, default_value = "refnet.json")]
    out: PathBuf,
}

/// Write `body` to `out`, creating parent directories. Errors name the path
/// that failed.
fn write_state(out: &Path, body: &str) -> Result<(), String> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| format!("{}: {err}", parent.display()))?;
    }
    fs::write(out, body).map_err(|err| format!("{}: {err}", out.display()))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.roots == 0 {
        eprintln!("error: --roots must be > 0");
        std::process::exit(2);
    }

    let mut graph = ReferralGraph::new();
    if let Err(err) = graph.update_config(&ConfigPatch {
        max_referrals_per_user: Some(args.max_children),
        ..ConfigPatch::default()
    }) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut pool: Vec<String> = (0..args.roots).map(|i| format!("root-{i:03}")).collect();
    let base = now_ms();
    let mut skipped = 0usize;

    for i in 0..args.users {
        let candidate = format!("user-{i:05}");
        let mut placed = false;
        for _ in 0..PLACEMENT_TRIES {
            let referrer = &pool[rng.gen_range(0..pool.len())];
            match graph.add_referral_at(referrer, &candidate, Some(base + i as u64)) {
                Ok(()) => {
                    placed = true;
                    break;
                }
                Err(err) if err.kind() == ErrorKind::ReferralLimit => continue,
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(2);
                }
            }
        }
        if placed {
            pool.push(candidate);
        } else {
            skipped += 1;
        }
    }

    let body = match graph.snapshot().and_then(|s| s.to_json_pretty()) {
        Ok(body) => body,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = write_state(&args.out, &body) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }

    let users = graph.all_users().map(|u| u.len()).unwrap_or(0);
    info!(users, skipped, seed = args.seed, "network generated");
    println!("wrote {} ({users} users, {skipped} skipped)", args.out.display());
}
