use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand, ValueEnum};
use referral_core::{
    ConfigPatch, GraphConfig, InfluenceAnalyzer, NetworkSnapshot, ReferralError, ReferralGraph,
    DEFAULT_TOP_K,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

//==================== CLI surface ====================//

#[derive(Parser)]
#[command(
    name = "refnet",
    version,
    about = "Referral network engine: validated referrals, reach and flow-centrality rankings"
)]
struct Cli {
    /// JSON state file holding the network (created on first write)
    #[arg(long, global = true, default_value = "refnet.json")]
    state: PathBuf,
    /// JSON policy file that replaces the config stored in the state file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the Alice/Bob walkthrough on a throwaway network
    Demo,
    /// Record that REFERRER recruited CANDIDATE
    Add { referrer: String, candidate: String },
    /// Remove a user and every referral touching it
    RemoveUser { user: String },
    /// Remove a single referral edge
    RemoveReferral { referrer: String, candidate: String },
    /// List a user's referrals
    Referrals {
        user: String,
        /// Whole subtree instead of direct referrals only
        #[arg(long)]
        all: bool,
    },
    /// List a user's referrers, nearest first
    Upline {
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Rank users by influence
    Top {
        #[arg(long, value_enum, default_value_t = Metric::Reach)]
        by: Metric,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        k: usize,
    },
    /// Network-wide counters
    Stats,
    /// Show or change the referral policy
    Config {
        #[arg(long)]
        allow_self_referrals: Option<bool>,
        #[arg(long)]
        allow_multiple_referrers: Option<bool>,
        #[arg(long)]
        allow_cycles: Option<bool>,
        #[arg(long, conflicts_with = "no_max_network_size")]
        max_network_size: Option<usize>,
        #[arg(long)]
        no_max_network_size: bool,
        #[arg(long, conflicts_with = "no_max_referrals_per_user")]
        max_referrals_per_user: Option<usize>,
        #[arg(long)]
        no_max_referrals_per_user: bool,
    },
    /// Reload the state file through full validation and print its digest
    Verify,
}

#[derive(Clone, Copy, ValueEnum)]
enum Metric {
    Reach,
    Flow,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Graph(#[from] ReferralError),
    #[error("digest mismatch: file {file}, rebuilt {rebuilt}")]
    DigestMismatch { file: String, rebuilt: String },
}

type CliResult<T> = Result<T, CliError>;

//==================== state file ====================//

fn read_file(path: &Path) -> CliResult<Vec<u8>> {
    fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_config(path: &Path) -> CliResult<GraphConfig> {
    let raw = read_file(path)?;
    Ok(GraphConfig::from_json_str(&String::from_utf8_lossy(&raw))?)
}

fn load_snapshot(cli: &Cli) -> CliResult<NetworkSnapshot> {
    let mut snapshot = if cli.state.exists() {
        NetworkSnapshot::from_json_slice(&read_file(&cli.state)?)?
    } else {
        NetworkSnapshot::default()
    };
    if let Some(path) = &cli.config {
        snapshot.config = load_config(path)?;
    }
    Ok(snapshot)
}

fn load_graph(cli: &Cli) -> CliResult<ReferralGraph> {
    Ok(ReferralGraph::import(&load_snapshot(cli)?)?)
}

fn save_graph(path: &Path, graph: &ReferralGraph) -> CliResult<()> {
    let body = graph.snapshot()?.to_json_pretty()?;
    let io_err = |source| CliError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, body).map_err(io_err)
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("error: {err}"),
    }
}

fn print_list(json: bool, key: &str, items: &[String]) {
    if json {
        print_json(&json!({ key: items }));
    } else if items.is_empty() {
        println!("(none)");
    } else {
        for item in items {
            println!("{item}");
        }
    }
}

//==================== commands ====================//

fn demo_cmd(json: bool) -> CliResult<()> {
    let mut graph = ReferralGraph::new();
    let mut log = Vec::new();
    let steps = [
        ("Alice", "Bob"),
        ("Alice", "Charlie"),
        ("Bob", "David"),
        ("Bob", "Eve"),
        ("David", "Alice"),
        ("Frank", "Bob"),
        ("Alice", "Alice"),
    ];
    for (referrer, candidate) in steps {
        let outcome = match graph.add_referral(referrer, candidate) {
            Ok(()) => "OK".to_string(),
            Err(err) => err.kind().to_string(),
        };
        if !json {
            println!("add {referrer:>6} -> {candidate:<8} {outcome}");
        }
        log.push(json!({ "referrer": referrer, "candidate": candidate, "outcome": outcome }));
    }

    let analyzer = InfluenceAnalyzer::snapshot(&graph)?;
    let all_alice = graph.all_referrals("Alice")?;
    let top_reach = analyzer.top_k_by_reach(None);
    let top_flow = analyzer.top_k_by_flow_centrality(None);
    let stats = graph.network_stats()?;

    if json {
        print_json(&json!({
            "steps": log,
            "all_referrals_alice": all_alice,
            "reach": analyzer.reach_scores(),
            "flow_centrality": analyzer.flow_centrality_scores(),
            "top_by_reach": top_reach,
            "top_by_flow": top_flow,
            "stats": stats,
        }));
        return Ok(());
    }
    println!();
    println!("all referrals of Alice: {}", all_alice.join(", "));
    for (user, reach) in analyzer.reach_scores() {
        let flow = analyzer.flow_centrality(&user).unwrap_or(0);
        println!("  {user:<8} reach={reach} flow={flow}");
    }
    println!("top by reach: {}", top_reach.join(", "));
    println!("top by flow : {}", top_flow.join(", "));
    println!(
        "users={} referrals={} max_depth={} avg={:.2}",
        stats.total_users,
        stats.total_referrals,
        stats.max_depth,
        stats.average_referrals_per_user
    );
    Ok(())
}

fn add_cmd(cli: &Cli, referrer: &str, candidate: &str) -> CliResult<()> {
    let mut graph = load_graph(cli)?;
    graph.add_referral(referrer, candidate)?;
    save_graph(&cli.state, &graph)?;
    if cli.json {
        print_json(&json!({ "added": { "referrer": referrer, "candidate": candidate } }));
    } else {
        println!("added {referrer} -> {candidate}");
    }
    Ok(())
}

fn remove_user_cmd(cli: &Cli, user: &str) -> CliResult<()> {
    let mut graph = load_graph(cli)?;
    graph.remove_user(user)?;
    save_graph(&cli.state, &graph)?;
    if cli.json {
        print_json(&json!({ "removed_user": user }));
    } else {
        println!("removed {user}");
    }
    Ok(())
}

fn remove_referral_cmd(cli: &Cli, referrer: &str, candidate: &str) -> CliResult<()> {
    let mut graph = load_graph(cli)?;
    let removed = graph.remove_referral(referrer, candidate)?;
    if removed {
        save_graph(&cli.state, &graph)?;
    }
    if cli.json {
        print_json(&json!({ "removed": removed }));
    } else if removed {
        println!("removed {referrer} -> {candidate}");
    } else {
        println!("no referral {referrer} -> {candidate}");
    }
    Ok(())
}

fn top_cmd(cli: &Cli, by: Metric, k: usize) -> CliResult<()> {
    let graph = load_graph(cli)?;
    let analyzer = InfluenceAnalyzer::snapshot(&graph)?;
    let (label, ranked) = match by {
        Metric::Reach => ("reach", analyzer.top_k_by_reach(Some(k))),
        Metric::Flow => ("flow_centrality", analyzer.top_k_by_flow_centrality(Some(k))),
    };
    let score = |user: &str| match by {
        Metric::Reach => analyzer.reach(user),
        Metric::Flow => analyzer.flow_centrality(user),
    };
    if cli.json {
        let rows: Vec<_> = ranked
            .iter()
            .map(|user| json!({ "user": user, label: score(user) }))
            .collect();
        print_json(&json!({ "metric": label, "ranking": rows }));
        return Ok(());
    }
    if ranked.is_empty() {
        println!("(empty network)");
    }
    for (pos, user) in ranked.iter().enumerate() {
        println!("{:>3}. {user:<16} {label}={}", pos + 1, score(user).unwrap_or(0));
    }
    Ok(())
}

fn stats_cmd(cli: &Cli) -> CliResult<()> {
    let stats = load_graph(cli)?.network_stats()?;
    if cli.json {
        print_json(&json!(stats));
        return Ok(());
    }
    println!("total users              : {}", stats.total_users);
    println!("total referrals          : {}", stats.total_referrals);
    println!("max depth                : {}", stats.max_depth);
    println!("avg referrals per user   : {:.3}", stats.average_referrals_per_user);
    println!("roots / leaves           : {} / {}", stats.root_count, stats.leaf_count);
    println!("referred ratio           : {:.3}", stats.referred_ratio);
    Ok(())
}

fn config_cmd(cli: &Cli, patch: ConfigPatch) -> CliResult<()> {
    let mut graph = load_graph(cli)?;
    if !patch.is_empty() || cli.config.is_some() {
        graph.update_config(&patch)?;
        save_graph(&cli.state, &graph)?;
    }
    let config = graph.config();
    if cli.json {
        print_json(&json!(config));
        return Ok(());
    }
    let limit = |v: Option<usize>| v.map_or_else(|| "none".to_string(), |n| n.to_string());
    println!("allow_self_referrals     : {}", config.allow_self_referrals);
    println!("allow_multiple_referrers : {}", config.allow_multiple_referrers);
    println!("allow_cycles             : {}", config.allow_cycles);
    println!("max_network_size         : {}", limit(config.max_network_size));
    println!("max_referrals_per_user   : {}", limit(config.max_referrals_per_user));
    Ok(())
}

fn verify_cmd(cli: &Cli) -> CliResult<()> {
    let file = load_snapshot(cli)?;
    let graph = ReferralGraph::import(&file)?;
    let rebuilt = graph.snapshot()?;
    if rebuilt.digest() != file.digest() {
        return Err(CliError::DigestMismatch {
            file: file.digest_hex(),
            rebuilt: rebuilt.digest_hex(),
        });
    }
    let forest = graph.config().enforces_forest();
    if cli.json {
        print_json(&json!({
            "users": rebuilt.users.len(),
            "referrals": rebuilt.edges.len(),
            "forest": forest,
            "digest": rebuilt.digest_hex(),
        }));
    } else {
        println!(
            "verify: OK ({} users, {} referrals, forest policy {})",
            rebuilt.users.len(),
            rebuilt.edges.len(),
            if forest { "enforced" } else { "relaxed" }
        );
        println!("digest: {}", rebuilt.digest_hex());
    }
    Ok(())
}

fn run(cli: &Cli) -> CliResult<()> {
    match &cli.command {
        Command::Demo => demo_cmd(cli.json),
        Command::Add {
            referrer,
            candidate,
        } => add_cmd(cli, referrer, candidate),
        Command::RemoveUser { user } => remove_user_cmd(cli, user),
        Command::RemoveReferral {
            referrer,
            candidate,
        } => remove_referral_cmd(cli, referrer, candidate),
        Command::Referrals { user, all } => {
            let graph = load_graph(cli)?;
            let list = if *all {
                graph.all_referrals(user)?
            } else {
                graph.direct_referrals(user)?
            };
            print_list(cli.json, "referrals", &list);
            Ok(())
        }
        Command::Upline { user, limit } => {
            let list = load_graph(cli)?.upline(user, *limit)?;
            print_list(cli.json, "upline", &list);
            Ok(())
        }
        Command::Top { by, k } => top_cmd(cli, *by, *k),
        Command::Stats => stats_cmd(cli),
        Command::Config {
            allow_self_referrals,
            allow_multiple_referrers,
            allow_cycles,
            max_network_size,
            no_max_network_size,
            max_referrals_per_user,
            no_max_referrals_per_user,
        } => {
            let limit_patch = |value: &Option<usize>, clear: bool| {
                if clear {
                    Some(None)
                } else {
                    value.map(Some)
                }
            };
            let patch = ConfigPatch {
                allow_self_referrals: *allow_self_referrals,
                allow_multiple_referrers: *allow_multiple_referrers,
                allow_cycles: *allow_cycles,
                max_network_size: limit_patch(max_network_size, *no_max_network_size),
                max_referrals_per_user: limit_patch(
                    max_referrals_per_user,
                    *no_max_referrals_per_user,
                ),
            };
            config_cmd(cli, patch)
        }
        Command::Verify => verify_cmd(cli),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}
