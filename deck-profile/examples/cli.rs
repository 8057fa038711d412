use anyhow::Result;
use deck_profile::{
    DeckProfileDraft, DeckProfileManager, ProfilePatch, PROFILES_FILE,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::{env, fs};
use texture_store::TextureStore;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        println!("Usage:");
        println!(" cargo run --example cli <dir> list");
        println!(" cargo run --example cli <dir> upload <image-path>");
        println!(" cargo run --example cli <dir> create <name> <creator> [card-id texture-key]...");
        println!(" cargo run --example cli <dir> assign <id> <card-id> <texture-key>");
        println!(" cargo run --example cli <dir> activate [id]");
        println!(" cargo run --example cli <dir> delete <id>");
        return Ok(());
    }

    let root = Path::new(&args[1]);
    let textures = Arc::new(TextureStore::new(
        "cli".to_string(),
        &root.join("textures"),
    )?);
    let manager = DeckProfileManager::new(
        "cli".to_string(),
        &root.join(PROFILES_FILE),
        textures.clone(),
    );
    let runtime = tokio::runtime::Runtime::new()?;

    match args[2].as_str() {
        "list" => {
            let active = manager.active_profile_id();
            for profile in manager.profiles() {
                let marker = if Some(&profile.id) == active.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {} {:24} by {} ({} cards)",
                    marker,
                    profile.id,
                    profile.name,
                    profile.creator,
                    profile.card_textures.len()
                );
            }
            Ok(())
        }
        "upload" => {
            let bytes = fs::read(&args[3])?;
            let processed =
                runtime.block_on(textures.process_and_load(&bytes))?;
            println!(
                "{} ({}x{})",
                processed.key, processed.width, processed.height
            );
            Ok(())
        }
        "create" => {
            let mut card_textures = BTreeMap::new();
            for pair in args[5..].chunks(2) {
                if let [card, key] = pair {
                    card_textures.insert(card.clone(), key.clone());
                }
            }
            let draft = DeckProfileDraft {
                name: args[3].clone(),
                creator: args[4].clone(),
                card_textures,
                ..Default::default()
            };
            let id = runtime.block_on(manager.create_profile(draft))?;
            println!("{}", id);
            Ok(())
        }
        "assign" => {
            let mut card_textures = manager
                .profile(&args[3])
                .map(|profile| profile.card_textures)
                .unwrap_or_default();
            card_textures.insert(args[4].clone(), args[5].clone());
            let patch = ProfilePatch {
                card_textures: Some(card_textures),
                ..Default::default()
            };
            runtime.block_on(manager.update_profile(&args[3], patch))?;
            Ok(())
        }
        "activate" => {
            let id = args.get(3).map(|s| s.as_str());
            let applied = runtime.block_on(manager.set_active_profile(id))?;
            println!("{}", if applied { "ok" } else { "superseded" });
            Ok(())
        }
        "delete" => {
            manager.delete_profile(&args[3])?;
            Ok(())
        }
        _ => {
            eprintln!("Invalid command.");
            Ok(())
        }
    }
}
