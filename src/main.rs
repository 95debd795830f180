use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use peer_compass::live_status::LiveStatus;
use peer_compass::presentation::{format_distance, heading_status_text, last_seen_label};
use peer_compass::sensors::{self, MockCompass, MockGroup, MockWalker};
use peer_compass::session_log::SessionLog;
use peer_compass::{FusionConfig, FusionEngine, FusionEvent, LatLng, SensorEvent};

#[derive(Parser, Debug)]
#[command(name = "peer_compass")]
#[command(about = "Peer compass - live fusion against simulated samplers", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "60")]
    duration: u64,

    /// Optional JSON config overriding the default tuning
    #[arg(long)]
    config: Option<String>,

    /// Output directory for session logs and live status
    #[arg(long, default_value = "peer_compass_sessions")]
    output_dir: String,

    /// Id of the local user, filtered out of peer snapshots
    #[arg(long, default_value = "me")]
    self_id: String,

    /// Simulated walking speed in m/s
    #[arg(long, default_value = "0.0")]
    walk_speed: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Peer Compass Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let config = match args.config.as_ref() {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    let mut engine = FusionEngine::new(config)?;
    engine.start_session(Some(args.self_id.clone()));
    let mut session = SessionLog::new(Some(args.self_id.clone()));

    let origin = LatLng::new(48.8584, 2.2945);
    let (tx, mut rx) = mpsc::channel::<SensorEvent>(256);
    let samplers = vec![
        sensors::spawn_geo_sampler(
            MockWalker::new(origin, args.walk_speed, 45.0),
            Duration::from_millis(1000),
            tx.clone(),
        ),
        sensors::spawn_heading_sampler(MockCompass::new(45.0, 3.0), Duration::from_millis(100), tx.clone()),
        sensors::spawn_peer_feed(MockGroup::demo(origin), Duration::from_millis(3000), tx.clone()),
    ];
    // Samplers hold the only senders from here on
    drop(tx);

    let mut status = LiveStatus::new(sensors::ts_now_ms());
    let start = Utc::now();
    let mut last_save = Utc::now();
    let mut last_status_update = Utc::now();

    println!("[{}] Starting fusion...", ts_now());

    loop {
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        while let Ok(event) = rx.try_recv() {
            let now_ms = sensors::ts_now_ms();
            match &event {
                SensorEvent::Fix(_) => status.fixes += 1,
                SensorEvent::Heading(_) => status.headings += 1,
                SensorEvent::Peers { .. } => status.peer_updates += 1,
            }
            session.record(now_ms, event.clone());

            let tick = engine.process(event, now_ms);
            status.substitutions += tick
                .events
                .iter()
                .filter(|e| matches!(e, FusionEvent::PeerSubstituted { .. }))
                .count() as u64;
            if let Some(record) = tick.publish {
                log::debug!("publish ({:.6}, {:.6}) expires {}", record.lat, record.lng, record.expires_at_ms);
            }
        }

        // Print the dial and update live status every 2 seconds
        let now = Utc::now();
        if (now.signed_duration_since(last_status_update).num_seconds() as u64) >= 2 {
            let now_ms = now.timestamp_millis();
            engine.refresh(now_ms);
            print_frame(&engine, now_ms);

            status.uptime_seconds = now.signed_duration_since(start).num_seconds().max(0) as u64;
            status.update_from(&engine, now_ms);
            let status_path = format!("{}/live_status.json", args.output_dir);
            if let Err(e) = status.save(&status_path) {
                log::warn!("failed to write {}: {}", status_path, e);
            }
            last_status_update = now;
        }

        // Auto-save every 15 seconds
        if (now.signed_duration_since(last_save).num_seconds() as u64) >= 15 {
            let filename = format!("{}/session_{}.json.gz", args.output_dir, ts_now_clean());
            session.save(&filename)?;
            println!("[{}] Auto-saved {} events to {}", ts_now(), session.len(), filename);
            last_save = now;
        }

        sleep(Duration::from_millis(5)).await;
    }

    for handle in samplers {
        let name = handle.name();
        let sent = handle.stop().await;
        println!("[{}] {} sampler stopped after {} samples", ts_now(), name, sent);
    }

    // Final save
    let filename = format!("{}/session_{}_final.json.gz", args.output_dir, ts_now_clean());
    session.save(&filename)?;
    println!("[{}] Final save: {} events to {}", ts_now(), session.len(), filename);

    let now_ms = sensors::ts_now_ms();
    status.uptime_seconds = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
    status.update_from(&engine, now_ms);
    let status_path = format!("{}/live_status_final.json", args.output_dir);
    if let Err(e) = status.save(&status_path) {
        log::warn!("failed to write {}: {}", status_path, e);
    }

    println!("\n=== Final Stats ===");
    println!("Fixes: {}  Headings: {}  Peer updates: {}", status.fixes, status.headings, status.peer_updates);
    println!("Publishes: {}  Suppressed: {}", status.publishes, status.suppressed_publishes);
    println!("{}", engine.health_status(now_ms));

    Ok(())
}

fn print_frame(engine: &FusionEngine, now_ms: i64) {
    let frame = engine.frame();
    println!(
        "[{}] {} | {}",
        ts_now(),
        heading_status_text(&frame.heading, engine.latest_fix(), &engine.config().heading),
        engine.health_status(now_ms)
    );
    for peer in &frame.peers {
        let last_seen = last_seen_label(peer.age_ms)
            .map(|s| format!(" · last {} ago", s))
            .unwrap_or_default();
        println!(
            "  {:<8} {:>8}  {:>5.0}°  {:?}{}",
            peer.peer_id,
            format_distance(peer.distance_m),
            peer.rotation_deg,
            peer.staleness,
            last_seen
        );
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
