use anyhow::{Context, Result};
use clap::Parser;
use dungeontracker::settings::parse_tracker_state;
use dungeontracker::tracker::Tracker;
use dungeontracker_game::{ConnectionSource, DungeonId, GameData};
use log::info;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "data")]
    data: PathBuf,

    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(long)]
    dungeon: Option<String>,

    #[arg(long)]
    show_requirements: bool,

    #[arg(long)]
    show_state: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let game_data = GameData::load(&args.data)?;
    let mut tracker = Tracker::new(&game_data);

    if let Some(state_path) = &args.state {
        let state_str = std::fs::read_to_string(state_path)
            .with_context(|| format!("unable to read {}", state_path.display()))?;
        let state = parse_tracker_state(&state_str)?;
        tracker.apply_state(&state)?;
        info!("Applied tracker state from {}", state_path.display());
    }
    if args.show_state {
        tracker.global().print_debug();
    }

    let dungeon_filter = match &args.dungeon {
        Some(name) => Some(
            DungeonId::from_str(name)
                .ok()
                .with_context(|| format!("Unrecognized dungeon: {name}"))?,
        ),
        None => None,
    };

    for dungeon in tracker.dungeons() {
        if dungeon_filter.is_some_and(|id| id != dungeon.dungeon_id) {
            continue;
        }
        let dungeon_data = game_data.dungeon(dungeon.dungeon_id)?;
        println!("{}", dungeon.dungeon_id);
        for node in dungeon.nodes() {
            println!("  {:<24} {}", node.name, node.accessibility());
            if args.show_requirements {
                for conn in &node.connections {
                    let source = match conn.source {
                        ConnectionSource::Entry(idx) => {
                            format!("entry {}", game_data.entry_isv.keys[idx])
                        }
                        ConnectionSource::Node(idx) => dungeon.node_by_idx(idx).name.clone(),
                    };
                    println!("    from {source}:");
                    conn.requirement.print_pretty(6, dungeon_data);
                    println!();
                }
            }
        }
        let summary: Vec<String> = dungeon
            .accessibility_summary()
            .into_iter()
            .map(|(level, count)| format!("{level}: {count}"))
            .collect();
        info!(
            "{}: {} ({} passes)",
            dungeon.dungeon_id,
            summary.join(", "),
            dungeon.last_stats().passes
        );
    }
    Ok(())
}
