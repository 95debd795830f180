use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::json;

use peer_compass::presentation::format_distance;
use peer_compass::session_log::SessionLog;
use peer_compass::{FusionConfig, FusionEngine, FusionEvent, SensorEvent};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz] log
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of session logs to batch replay (processes session_*.json[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Optional JSON config overriding the default tuning
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print every fusion event as it happens
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn event_name(event: &FusionEvent) -> &'static str {
    match event {
        FusionEvent::SelfFixRejected { .. } => "self_fix_rejected",
        FusionEvent::HeadingRejected { .. } => "heading_rejected",
        FusionEvent::PeerSampleRejected { .. } => "peer_sample_rejected",
        FusionEvent::PeerAdded { .. } => "peer_added",
        FusionEvent::PeerRemoved { .. } => "peer_removed",
        FusionEvent::PeerHidden { .. } => "peer_hidden",
        FusionEvent::PeerStateDiscarded { .. } => "peer_state_discarded",
        FusionEvent::PeerSubstituted { .. } => "peer_substituted",
        FusionEvent::HeadingSourceChanged { .. } => "heading_source_changed",
        FusionEvent::HeadingHintRaised { .. } => "heading_hint_raised",
        FusionEvent::SamplerSilent { .. } => "sampler_silent",
        FusionEvent::SamplerResumed { .. } => "sampler_resumed",
        FusionEvent::Published { .. } => "published",
        FusionEvent::PublishSuppressed => "publish_suppressed",
    }
}

fn run_once(path: &Path, config: &FusionConfig, verbose: bool) -> anyhow::Result<serde_json::Value> {
    let log = SessionLog::load(path)?;
    if log.is_empty() {
        anyhow::bail!("{} holds no events", path.display());
    }

    let mut engine = FusionEngine::new(config.clone())?;
    engine.start_session(log.self_id.clone());

    let mut inputs: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut publishes = 0u64;
    let mut hint_ms = 0i64;
    let mut last_t: Option<i64> = None;
    let mut hint_up = false;

    for logged in &log.events {
        let kind = match &logged.event {
            SensorEvent::Fix(_) => "fix",
            SensorEvent::Heading(_) => "heading",
            SensorEvent::Peers { .. } => "peers",
        };
        *inputs.entry(kind).or_default() += 1;

        // Time with the hold-steady hint showing, sampled at event boundaries
        if let (Some(prev), true) = (last_t, hint_up) {
            hint_ms += (logged.t_ms - prev).max(0);
        }
        last_t = Some(logged.t_ms);

        let tick = engine.process(logged.event.clone(), logged.t_ms);
        if tick.publish.is_some() {
            publishes += 1;
        }
        hint_up = tick.frame.heading.show_hint;

        for event in &tick.events {
            *counts.entry(event_name(event)).or_default() += 1;
            if verbose {
                println!("[{}] {}", logged.t_ms, serde_json::to_string(event)?);
            }
        }
    }

    let frame = engine.frame();
    let peers: Vec<_> = frame
        .peers
        .iter()
        .map(|p| {
            json!({
                "peer_id": p.peer_id,
                "distance": format_distance(p.distance_m),
                "distance_m": p.distance_m,
                "bearing_deg": p.bearing_deg,
                "rotation_deg": p.rotation_deg,
                "staleness": p.staleness,
            })
        })
        .collect();

    let duration_ms = match (log.events.first(), log.events.last()) {
        (Some(first), Some(last)) => last.t_ms - first.t_ms,
        _ => 0,
    };

    Ok(json!({
        "log": path.display().to_string(),
        "duration_ms": duration_ms,
        "inputs": inputs,
        "events": counts,
        "publishes": publishes,
        "suppressed_publishes": engine.write_gate().suppressed_count(),
        "substitutions": counts.get("peer_substituted").copied().unwrap_or(0),
        "hint_ms": hint_ms,
        "heading_source": frame.heading.source,
        "final_peers": peers,
        "health": engine.health_report(frame.generated_at_ms),
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };

    let mut results = Vec::new();
    if let Some(dir) = args.log_dir.as_ref() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("session_") && (name.ends_with(".json") || name.ends_with(".json.gz")) {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            match run_once(&path, &config, args.verbose) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, args.verbose)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
