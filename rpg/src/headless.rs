//! The read-eval-narrate loop.
//!
//! Protocol:
//! - Lines starting with `#` are commands (save, saves, status, quit, help)
//! - Everything else is sent to the narrator as the player's action
//! - Ctrl-C during a turn cancels it; at the prompt it exits

use rpg_core::combat::CombatStatus;
use rpg_core::persist::JsonFileGateway;
use rpg_core::world::{AbilityScores, Disposition, Item, ItemKind, Location, Npc, Player, World};
use rpg_core::{DmError, GameSession, SessionConfig, SessionError, SessionId};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command line options.
#[derive(Debug, Clone)]
pub struct Options {
    pub name: String,
    pub class: String,
    pub campaign: String,
    pub resume: Option<String>,
    pub list: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: "Adventurer".to_string(),
            class: "Fighter".to_string(),
            campaign: "The Crossroads".to_string(),
            resume: None,
            list: false,
        }
    }
}

pub fn parse_options(args: &[String]) -> Options {
    let mut options = Options::default();

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--name", Some(name)) => {
                options.name = name;
                i += 1;
            }
            ("--class", Some(class)) => {
                options.class = class;
                i += 1;
            }
            ("--campaign", Some(campaign)) => {
                options.campaign = campaign;
                i += 1;
            }
            ("--resume", Some(id)) => {
                options.resume = Some(id);
                i += 1;
            }
            ("--list", _) => options.list = true,
            _ => {}
        }
        i += 1;
    }
    options
}

pub async fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::from_env(options.campaign.clone())?;
    let saves_config = config.clone();

    if options.list {
        return Ok(list_saves(&config).await?);
    }

    let mut game = match &options.resume {
        Some(raw) => {
            let id: SessionId = raw
                .parse()
                .map_err(|_| SessionError::Config(format!("`{raw}` is not a session id")))?;
            GameSession::resume(config, id).await?
        }
        None => GameSession::new(
            config,
            starting_player(&options.name, &options.class),
            starting_world(),
        )?,
    };
    info!(session = %game.id(), "ready");

    println!("=== {} ===", game.session().campaign_name);
    println!("Session: {}", game.id());
    print_status(&game);
    println!();
    println!("Type #help for commands. Enter your actions (one per line):");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            match command.split_whitespace().next() {
                Some("quit") | Some("exit") => break,
                Some("save") => match game.save().await {
                    Ok(()) => println!("[SAVED] {}", game.id()),
                    Err(e) => println!("[ERROR] Save failed: {e}"),
                },
                Some("saves") => {
                    if let Err(e) = list_saves(&saves_config).await {
                        println!("[ERROR] {e}");
                    }
                }
                Some("status") => print_status(&game),
                Some("help") => print_commands(),
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            continue;
        }

        take_turn(&mut game, line).await;
    }

    if let Err(e) = game.save().await {
        warn!(error = %e, "final save failed");
        println!("[ERROR] Could not save before exit: {e}");
    }
    println!("Goodbye!");
    Ok(())
}

async fn take_turn(game: &mut GameSession, input: &str) {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = game.player_action_with_cancel(input, &cancel).await;
    watcher.abort();

    match result {
        Ok(turn) => {
            println!();
            for para in turn.narration.split("\n\n") {
                println!("{para}");
            }
            println!();
            match turn.combat {
                CombatStatus::Active { round, acting, .. } => println!(
                    "[COMBAT] Round {round}, HP: {}, acting: {}",
                    turn.hit_points,
                    acting.unwrap_or_default()
                ),
                CombatStatus::Resolved(summary) => println!("[COMBAT] {summary}"),
                CombatStatus::NotInCombat => {}
            }
        }
        Err(SessionError::Dm(DmError::Cancelled)) => println!("[CANCELLED] Nothing happened."),
        Err(SessionError::Dm(DmError::Persistence { result, source })) => {
            println!("{}", result.narration);
            println!("[WARNING] Not saved yet ({source}); will retry next turn.");
        }
        Err(e) => println!("[ERROR] {e}. Try again."),
    }
}

fn print_status(game: &GameSession) {
    let state = game.state();
    let player = &state.player;
    println!("[STATUS]");
    println!("  Character: {} the {} (level {})", player.name, player.class, player.level);
    if let Some(location) = state.world.current_location() {
        println!("  Location: {}", location.name);
    }
    println!("  HP: {}", state.player_hit_points());
    println!("  Gold: {}", player.gold);
    match game.combat_status() {
        CombatStatus::Active { round, order, .. } => {
            println!("  In Combat: round {round}");
            for combatant in order {
                println!("    {} {}", combatant.name, combatant.hit_points);
            }
        }
        _ => println!("  In Combat: no"),
    }
    println!("  Turns: {}", game.session().turn_count);
}

fn print_commands() {
    println!("[HELP]");
    println!("  #quit    - Save and exit");
    println!("  #save    - Save now");
    println!("  #saves   - List saved campaigns");
    println!("  #status  - Show character status");
    println!("  #help    - Show this help");
    println!("  (anything else is sent as player action)");
}

async fn list_saves(config: &SessionConfig) -> Result<(), SessionError> {
    let saves = JsonFileGateway::new(&config.save_dir).list_saves().await?;
    if saves.is_empty() {
        println!("No saved campaigns in {}", config.save_dir.display());
    }
    for save in saves {
        println!(
            "{}  {} - {} (level {}) at {}, {} turns{}",
            save.session_id,
            save.campaign_name,
            save.character_name,
            save.level,
            save.location,
            save.turns,
            if save.in_combat { ", in combat" } else { "" }
        );
    }
    Ok(())
}

fn starting_player(name: &str, class: &str) -> Player {
    let mut player = Player::new(name, class, AbilityScores::default(), 12);
    player.gold = 10;

    let weapon = Item::new(
        "Shortsword",
        ItemKind::Weapon {
            damage_die: 6,
            attack_bonus: 0,
            ranged: false,
        },
    );
    let armor = Item::new("Leather Armor", ItemKind::Armor { defense: 1 });
    player.equipped.push(weapon.key());
    player.equipped.push(armor.key());
    player.inventory.add(weapon, 1);
    player.inventory.add(armor, 1);
    player
        .inventory
        .add(Item::new("Healing Potion", ItemKind::Consumable { heal: 6 }), 2);
    player
}

fn starting_world() -> World {
    let mut world = World::new(Location::new(
        "Crossroads Inn",
        "A low-beamed inn where the king's road meets the river road.",
    ));
    world.add_location(Location::new(
        "River Road",
        "A muddy track along the water, heading toward the hills.",
    ));
    world.connect("Crossroads Inn", "River Road");

    let mut innkeeper = Npc::new("Marta", Disposition::Neutral, 8);
    innkeeper.xp_reward = 10;
    world.spawn_npc(innkeeper);
    world
}
